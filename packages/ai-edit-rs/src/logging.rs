use std::collections::BTreeMap;
use std::sync::{Mutex, mpsc};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Entries beyond this many undrained ones are dropped.
const LOG_BUFFER_CAPACITY: usize = 1024;

static GLOBAL_EMITTER: OnceCell<LogEmitter> = OnceCell::new();

/// Buffers structured log entries until a host drains them.
pub struct LogEmitter {
    sender: mpsc::SyncSender<LogEntry>,
    receiver: Mutex<mpsc::Receiver<LogEntry>>,
}

impl Default for LogEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl LogEmitter {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::sync_channel(LOG_BUFFER_CAPACITY);
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn layer(&self) -> SessionLogLayer {
        SessionLogLayer {
            sender: self.sender.clone(),
        }
    }

    pub fn drain(&self) -> Vec<LogEntry> {
        match self.receiver.lock() {
            Ok(receiver) => receiver.try_iter().collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Installs the process-wide subscriber once: a buffering layer plus a
/// human-readable stderr layer, both capped at `level`. Later calls return
/// the emitter from the first call.
pub fn init(level: LevelFilter) -> &'static LogEmitter {
    GLOBAL_EMITTER.get_or_init(|| {
        let emitter = LogEmitter::new();
        let subscriber = tracing_subscriber::registry()
            .with(emitter.layer())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(level);

        let _ = subscriber.try_init();
        emitter
    })
}

#[derive(Clone)]
pub struct SessionLogLayer {
    sender: mpsc::SyncSender<LogEntry>,
}

impl<S> Layer<S> for SessionLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut fields = visitor.fields;
        let message = fields.remove("message").map(|value| match value {
            Value::String(text) => text,
            other => other.to_string(),
        });

        let entry = LogEntry {
            level: metadata.level().as_str().to_string(),
            target: metadata.target().to_string(),
            message,
            fields,
            timestamp_ms: now_ms(),
        };

        let _ = self.sender.try_send(entry);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: String,
    pub target: String,
    pub message: Option<String>,
    pub fields: BTreeMap<String, Value>,
    pub timestamp_ms: u64,
}

#[derive(Default)]
struct JsonVisitor {
    fields: BTreeMap<String, Value>,
}

impl tracing_subscriber::field::Visit for JsonVisitor {
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        self.fields.insert(field.name().to_string(), value);
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_error(
        &mut self,
        field: &tracing::field::Field,
        value: &(dyn std::error::Error + 'static),
    ) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields.insert(
            field.name().to_string(),
            Value::String(format!("{value:?}")),
        );
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

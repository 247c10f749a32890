//! Incremental reassembly of a line-delimited `data: ` event stream.
//!
//! Chunks may split an event anywhere, including inside a multi-byte UTF-8
//! sequence, or carry several events at once. The assembler keeps the
//! unterminated tail of the last chunk and only interprets complete lines.

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::client::TransportError;

pub const EVENT_PREFIX: &str = "data: ";
pub const STREAM_DONE_MARKER: &str = "[DONE]";

const SKIPPED_PREVIEW_CHARS: usize = 50;

#[derive(Debug, PartialEq, Eq)]
enum StreamEvent {
    Content(String),
    Done,
    Skipped,
    Ignored,
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    accumulated: String,
    carry: String,
    pending_bytes: Vec<u8>,
    done: bool,
    skipped: usize,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulated(&self) -> &str {
        &self.accumulated
    }

    /// True once the `[DONE]` sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of events dropped because their payload did not parse.
    pub fn skipped_events(&self) -> usize {
        self.skipped
    }

    pub fn push(&mut self, chunk: &str) -> bool {
        self.push_with(chunk, |_| {})
    }

    /// Feeds one text chunk. `on_update` sees the full accumulated text after
    /// every appended piece of content. Returns whether anything was appended.
    pub fn push_with<F>(&mut self, chunk: &str, mut on_update: F) -> bool
    where
        F: FnMut(&str),
    {
        if self.done {
            return false;
        }

        let mut buffer = std::mem::take(&mut self.carry);
        buffer.push_str(chunk);

        let mut lines: Vec<&str> = buffer.split('\n').collect();
        let remainder = lines.pop().unwrap_or("").to_string();

        let mut appended = false;
        for line in lines {
            match parse_event_line(line) {
                StreamEvent::Content(content) => {
                    self.accumulated.push_str(&content);
                    on_update(&self.accumulated);
                    appended = true;
                }
                StreamEvent::Done => {
                    self.done = true;
                    return appended;
                }
                StreamEvent::Skipped => self.skipped += 1,
                StreamEvent::Ignored => {}
            }
        }

        self.carry = remainder;
        appended
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        self.push_bytes_with(bytes, |_| {})
    }

    /// Byte variant of [`push_with`](Self::push_with). An incomplete UTF-8
    /// sequence at the end of `bytes` is held until the next call.
    pub fn push_bytes_with<F>(&mut self, bytes: &[u8], on_update: F) -> bool
    where
        F: FnMut(&str),
    {
        if self.done {
            return false;
        }
        self.pending_bytes.extend_from_slice(bytes);
        let text = decode_utf8_prefix(&mut self.pending_bytes);
        self.push_with(&text, on_update)
    }

    pub fn finish(self) -> String {
        self.finish_with(|_| {})
    }

    /// Ends the stream: any leftover bytes are decoded lossily and a trailing
    /// event without a terminating newline gets one last parse.
    pub fn finish_with<F>(mut self, mut on_update: F) -> String
    where
        F: FnMut(&str),
    {
        if self.done {
            return self.accumulated;
        }

        if !self.pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.carry.push_str(&tail);
        }

        if !self.carry.trim().is_empty() && self.carry.starts_with(EVENT_PREFIX) {
            match parse_event_line(&self.carry) {
                StreamEvent::Content(content) => {
                    self.accumulated.push_str(&content);
                    on_update(&self.accumulated);
                }
                StreamEvent::Skipped => self.skipped += 1,
                StreamEvent::Done | StreamEvent::Ignored => {}
            }
        }

        self.accumulated
    }
}

/// Drives `chunks` to completion through a fresh assembler. Stops reading as
/// soon as the sentinel arrives; the stream is dropped on return either way.
pub async fn collect_stream<S, F>(mut chunks: S, mut on_update: F) -> Result<String, TransportError>
where
    S: Stream<Item = Result<Vec<u8>, TransportError>> + Unpin,
    F: FnMut(&str),
{
    let mut assembler = StreamAssembler::new();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        assembler.push_bytes_with(&chunk, &mut on_update);
        if assembler.is_done() {
            break;
        }
    }

    if assembler.skipped_events() > 0 {
        debug!(skipped = assembler.skipped_events(), "stream finished with skipped events");
    }
    Ok(assembler.finish_with(&mut on_update))
}

fn parse_event_line(line: &str) -> StreamEvent {
    let Some(payload) = line.strip_prefix(EVENT_PREFIX) else {
        return StreamEvent::Ignored;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return StreamEvent::Ignored;
    }
    if payload == STREAM_DONE_MARKER {
        return StreamEvent::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => match value.get("content").and_then(Value::as_str) {
            Some(content) if !content.is_empty() => StreamEvent::Content(content.to_string()),
            _ => StreamEvent::Ignored,
        },
        Err(error) => {
            let preview: String = payload.chars().take(SKIPPED_PREVIEW_CHARS).collect();
            debug!(%error, payload = %preview, "skipping malformed stream event");
            StreamEvent::Skipped
        }
    }
}

fn decode_utf8_prefix(pending: &mut Vec<u8>) -> String {
    let mut decoded = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                decoded.push_str(text);
                pending.clear();
                return decoded;
            }
            Err(error) => {
                let valid = error.valid_up_to();
                decoded.push_str(std::str::from_utf8(&pending[..valid]).unwrap_or_default());
                match error.error_len() {
                    Some(invalid) => {
                        decoded.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + invalid);
                    }
                    None => {
                        pending.drain(..valid);
                        return decoded;
                    }
                }
            }
        }
    }
}

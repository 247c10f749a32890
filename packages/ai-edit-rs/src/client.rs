use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::EditorConfig;
use crate::types::GenerationRequest;

/// Raw body chunks in delivery order.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("generation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("stream aborted: {0}")]
    Aborted(String),
}

/// Opens a streamed generation for one request.
///
/// Dropping the returned stream must release the underlying transport.
pub trait GenerationClient: Send + Sync {
    fn open_stream(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<ChunkStream, TransportError>> + Send;
}

pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerationClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &EditorConfig) -> Result<Self, TransportError> {
        Self::new(
            config.endpoint.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GenerationClient for HttpGenerationClient {
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, TransportError> {
        debug!(request_id = %request.request_id, endpoint = %self.endpoint, "opening generation stream");
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(request_id = %request.request_id, status = status.as_u16(), "generation service rejected request");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
        Ok(chunks.boxed())
    }
}

/// Canned reply for one request made to [`ScriptedGenerationClient`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptedReply {
    Chunks { chunks: Vec<String> },
    Status { status: u16 },
    FailAfter { chunks: Vec<String>, message: String },
}

impl ScriptedReply {
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedReply::Chunks {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

/// Deterministic client that replays queued replies in order and records
/// every request it receives.
#[derive(Default)]
pub struct ScriptedGenerationClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Removes the most recently queued reply, e.g. after a submission that
    /// never reached the client.
    pub fn pop_reply(&self) -> Option<ScriptedReply> {
        self.replies.lock().ok()?.pop_back()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl GenerationClient for ScriptedGenerationClient {
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let reply = self
            .replies
            .lock()
            .map_err(|_| TransportError::Aborted("scripted client lock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| TransportError::Aborted("no scripted reply queued".to_string()))?;

        match reply {
            ScriptedReply::Chunks { chunks } => {
                Ok(stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into_bytes()))).boxed())
            }
            ScriptedReply::Status { status } => Err(TransportError::Status {
                status,
                body: String::new(),
            }),
            ScriptedReply::FailAfter { chunks, message } => {
                let delivered = chunks.into_iter().map(|chunk| Ok(chunk.into_bytes()));
                let failure = std::iter::once(Err(TransportError::Aborted(message)));
                Ok(stream::iter(delivered.chain(failure)).boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            request_id: "req-1".to_string(),
            prompt: "p".to_string(),
            markdown: "m".to_string(),
            selected_text: String::new(),
        }
    }

    #[tokio::test]
    async fn scripted_client_replays_chunks_in_order() {
        let client = ScriptedGenerationClient::with_replies([ScriptedReply::chunks(["a", "b"])]);
        let stream = client.open_stream(&request()).await.unwrap();
        let chunks: Vec<_> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn scripted_status_reply_fails_before_streaming() {
        let client = ScriptedGenerationClient::with_replies([ScriptedReply::Status { status: 502 }]);
        let error = client.open_stream(&request()).await.err().unwrap();
        assert!(matches!(error, TransportError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn exhausted_script_is_an_aborted_stream() {
        let client = ScriptedGenerationClient::new();
        let error = client.open_stream(&request()).await.err().unwrap();
        assert!(matches!(error, TransportError::Aborted(_)));
    }

    #[tokio::test]
    async fn popped_reply_is_not_served() {
        let client = ScriptedGenerationClient::new();
        client.push_reply(ScriptedReply::chunks(["first"]));
        client.push_reply(ScriptedReply::chunks(["second"]));

        assert_eq!(client.pop_reply(), Some(ScriptedReply::chunks(["second"])));
        let chunks: Vec<_> = client
            .open_stream(&request())
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![b"first".to_vec()]);
        assert_eq!(client.pop_reply(), None);
    }

    #[test]
    fn scripted_reply_deserializes_from_tagged_json() {
        let reply: ScriptedReply = serde_json::from_str(
            r#"{ "type": "fail_after", "chunks": ["data: x\n"], "message": "reset" }"#,
        )
        .unwrap();
        assert_eq!(
            reply,
            ScriptedReply::FailAfter {
                chunks: vec!["data: x\n".to_string()],
                message: "reset".to_string(),
            }
        );
    }
}

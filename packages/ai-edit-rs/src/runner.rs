use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::client::{GenerationClient, HttpGenerationClient, TransportError};
use crate::config::EditorConfig;
use crate::error::{EditorError, Result};
use crate::session::{EditSession, SubmitOutcome};
use crate::store::FileDocumentStore;
use crate::stream::collect_stream;
use crate::types::{GenerationRequest, SessionView};

/// Async driver for an [`EditSession`]. Clones share the same session.
///
/// The session lock is only taken for state transitions, never across an
/// await, so views and selection changes stay responsive while a generation
/// streams in.
pub struct SessionRunner<C> {
    session: Arc<Mutex<EditSession>>,
    client: Arc<C>,
}

impl<C> Clone for SessionRunner<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            client: Arc::clone(&self.client),
        }
    }
}

impl SessionRunner<HttpGenerationClient> {
    /// File-backed session talking to the configured endpoint.
    pub fn from_config(config: &EditorConfig, initial_markdown: &str) -> Result<Self> {
        let store = FileDocumentStore::new(&config.storage_dir)?;
        let client = HttpGenerationClient::from_config(config)?;
        let session = EditSession::new(initial_markdown, Box::new(store), config);
        Ok(Self::new(session, client))
    }
}

impl<C: GenerationClient> SessionRunner<C> {
    pub fn new(session: EditSession, client: C) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn with_session<R>(&self, action: impl FnOnce(&mut EditSession) -> R) -> Result<R> {
        let mut session = self.session.lock().map_err(|_| EditorError::LockPoisoned)?;
        Ok(action(&mut session))
    }

    pub fn view(&self) -> Result<SessionView> {
        self.with_session(|session| session.view())
    }

    pub fn select(&self, text: &str) -> Result<()> {
        self.with_session(|session| session.select(text))
    }

    /// `false` when nothing was applied; a validation failure is reported in
    /// the session error.
    pub fn accept(&self) -> Result<bool> {
        self.with_session(|session| session.accept().unwrap_or(false))
    }

    pub fn reject(&self) -> Result<bool> {
        self.with_session(EditSession::reject)
    }

    pub fn undo(&self) -> Result<bool> {
        self.with_session(EditSession::undo)
    }

    pub fn redo(&self) -> Result<bool> {
        self.with_session(EditSession::redo)
    }

    pub fn edit_markdown(&self, markdown: &str) -> Result<bool> {
        self.with_session(|session| session.edit_markdown(markdown))
    }

    pub fn dismiss_error(&self) -> Result<()> {
        self.with_session(EditSession::dismiss_error)
    }

    /// Runs one generation to a terminal state. A concurrent call while a
    /// generation is in flight returns [`SubmitOutcome::Ignored`] immediately.
    /// Dropping the returned future aborts the in-flight generation.
    pub async fn submit(&self, prompt: &str) -> Result<SubmitOutcome> {
        let Some(request) = self.with_session(|session| session.begin_submit(prompt))? else {
            return Ok(SubmitOutcome::Ignored);
        };

        let mut guard = InFlightGuard {
            session: &self.session,
            request_id: &request.request_id,
            armed: true,
        };
        let result = self.generate(&request).await;

        let outcome =
            self.with_session(|session| session.finish_stream(&request.request_id, result))?;
        guard.armed = false;
        Ok(outcome)
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, TransportError> {
        let chunks = self.client.open_stream(request).await?;
        let session = &self.session;
        let text = collect_stream(chunks, |accumulated| {
            if let Ok(mut session) = session.lock() {
                session.publish_partial(&request.request_id, accumulated);
            }
        })
        .await?;
        debug!(request_id = %request.request_id, "generation stream closed");
        Ok(text)
    }
}

struct InFlightGuard<'a> {
    session: &'a Mutex<EditSession>,
    request_id: &'a str,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // A poisoned lock must still leave Streaming, or no later submit can run.
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.abort_stream(self.request_id) {
            warn!(request_id = self.request_id, "generation dropped before completion");
        }
    }
}

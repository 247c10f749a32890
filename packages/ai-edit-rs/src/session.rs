//! Orchestration of one editing session: selection, the in-flight generation,
//! the pending proposal and the accept/reject transaction over the history.
//!
//! `EditSession` is synchronous and owns no transport. Something else (see
//! [`crate::runner::SessionRunner`]) opens the stream and reports back through
//! `publish_partial`, `finish_stream` and `abort_stream`, each keyed by the
//! request id handed out by `begin_submit`.

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::TransportError;
use crate::config::EditorConfig;
use crate::history::History;
use crate::store::{DocumentStore, load_or_initial};
use crate::types::{
    ChatEntry, EditProposal, ErrorKind, GenerationRequest, SessionError, SessionPhase, SessionView,
};
use crate::validation::{EditError, validate_edit};

pub const TRANSPORT_FAILURE_MESSAGE: &str =
    "Sorry, I encountered an error processing your request.";

/// Result of one submission as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Blank prompt, a generation already in flight, or a stale completion.
    Ignored,
    Proposal { proposal: EditProposal },
    Failed { error: SessionError },
}

#[derive(Debug)]
struct PendingGeneration {
    request_id: String,
    prompt: String,
    original_text: String,
    streamed: String,
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Streaming(PendingGeneration),
    ProposalReady(EditProposal),
}

pub struct EditSession {
    history: History<String>,
    state: SessionState,
    selection: String,
    error: Option<SessionError>,
    transcript: Vec<ChatEntry>,
    store: Box<dyn DocumentStore>,
    storage_key: String,
}

impl EditSession {
    /// Starts from the stored document when one exists, else `initial_markdown`.
    pub fn new(
        initial_markdown: &str,
        store: Box<dyn DocumentStore>,
        config: &EditorConfig,
    ) -> Self {
        let markdown = load_or_initial(store.as_ref(), &config.storage_key, initial_markdown);
        Self {
            history: History::with_limit(markdown, config.history_limit),
            state: SessionState::Idle,
            selection: String::new(),
            error: None,
            transcript: Vec::new(),
            store,
            storage_key: config.storage_key.clone(),
        }
    }

    pub fn markdown(&self) -> &str {
        self.history.present()
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Streaming(_) => SessionPhase::Streaming,
            SessionState::ProposalReady(_) => SessionPhase::ProposalReady,
        }
    }

    pub fn proposal(&self) -> Option<&EditProposal> {
        match &self.state {
            SessionState::ProposalReady(proposal) => Some(proposal),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn selection(&self) -> &str {
        &self.selection
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn transcript(&self) -> &[ChatEntry] {
        &self.transcript
    }

    pub fn select(&mut self, text: &str) {
        self.selection = text.to_string();
    }

    /// Enters Streaming and returns the request to send, or `None` when the
    /// prompt is blank or a generation is already in flight.
    pub fn begin_submit(&mut self, prompt: &str) -> Option<GenerationRequest> {
        if prompt.trim().is_empty() {
            debug!("ignoring blank prompt");
            return None;
        }
        if let SessionState::Streaming(pending) = &self.state {
            info!(in_flight = %pending.request_id, "submission ignored while streaming");
            return None;
        }

        let original_text = if self.selection.is_empty() {
            self.markdown().to_string()
        } else {
            self.selection.clone()
        };
        let request = GenerationRequest {
            request_id: Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            markdown: self.markdown().to_string(),
            selected_text: self.selection.clone(),
        };

        self.error = None;
        self.transcript.push(ChatEntry::user(prompt));
        self.state = SessionState::Streaming(PendingGeneration {
            request_id: request.request_id.clone(),
            prompt: request.prompt.clone(),
            original_text,
            streamed: String::new(),
        });
        info!(
            request_id = %request.request_id,
            whole_document = request.selected_text.is_empty(),
            "submission accepted"
        );
        Some(request)
    }

    /// Records the text assembled so far for the in-flight request.
    pub fn publish_partial(&mut self, request_id: &str, text: &str) -> bool {
        match &mut self.state {
            SessionState::Streaming(pending) if pending.request_id == request_id => {
                pending.streamed.clear();
                pending.streamed.push_str(text);
                true
            }
            _ => false,
        }
    }

    pub fn finish_stream(
        &mut self,
        request_id: &str,
        result: Result<String, TransportError>,
    ) -> SubmitOutcome {
        let pending = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::Streaming(pending) if pending.request_id == request_id => pending,
            other => {
                self.state = other;
                debug!(request_id, "ignoring completion for a request that is not in flight");
                return SubmitOutcome::Ignored;
            }
        };

        match result {
            Ok(proposed_text) => {
                self.transcript.push(ChatEntry::assistant(proposed_text.as_str()));
                let proposal = EditProposal::new(
                    pending.original_text,
                    proposed_text,
                    pending.prompt,
                    pending.request_id,
                );
                info!(
                    request_id = %proposal.request_id,
                    chars = proposal.proposed_text.chars().count() as u64,
                    "proposal ready"
                );
                self.state = SessionState::ProposalReady(proposal.clone());
                SubmitOutcome::Proposal { proposal }
            }
            Err(error) => {
                warn!(request_id = %pending.request_id, %error, "generation failed");
                let error = SessionError {
                    kind: ErrorKind::TransportError,
                    message: TRANSPORT_FAILURE_MESSAGE.to_string(),
                };
                self.transcript
                    .push(ChatEntry::assistant(TRANSPORT_FAILURE_MESSAGE));
                self.error = Some(error.clone());
                SubmitOutcome::Failed { error }
            }
        }
    }

    /// Treats an abandoned read as a transport failure.
    pub fn abort_stream(&mut self, request_id: &str) -> bool {
        let outcome = self.finish_stream(
            request_id,
            Err(TransportError::Aborted("generation cancelled".to_string())),
        );
        matches!(outcome, SubmitOutcome::Failed { .. })
    }

    /// Applies the pending proposal to the live document. `Ok(false)` when
    /// there is nothing to accept. A rejected proposal is discarded either way.
    pub fn accept(&mut self) -> Result<bool, EditError> {
        let proposal = match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::ProposalReady(proposal) => proposal,
            other => {
                self.state = other;
                return Ok(false);
            }
        };

        match validate_edit(self.markdown(), &proposal) {
            Ok(next) => {
                self.commit(next);
                self.selection.clear();
                self.error = None;
                info!(proposal_id = %proposal.id, "proposal applied");
                Ok(true)
            }
            Err(error) => {
                info!(proposal_id = %proposal.id, kind = error.kind().as_str(), "proposal rejected by validation");
                self.error = Some(SessionError::from(&error));
                Err(error)
            }
        }
    }

    pub fn reject(&mut self) -> bool {
        match std::mem::replace(&mut self.state, SessionState::Idle) {
            SessionState::ProposalReady(proposal) => {
                debug!(proposal_id = %proposal.id, "proposal discarded");
                self.error = None;
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    pub fn undo(&mut self) -> bool {
        let moved = self.history.undo();
        if moved {
            self.persist();
        }
        moved
    }

    pub fn redo(&mut self) -> bool {
        let moved = self.history.redo();
        if moved {
            self.persist();
        }
        moved
    }

    /// Manual edit from the user. Identical text is not a new history entry.
    pub fn edit_markdown(&mut self, markdown: &str) -> bool {
        if markdown == self.markdown() {
            return false;
        }
        self.commit(markdown.to_string());
        true
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
    }

    pub fn view(&self) -> SessionView {
        let streamed = match &self.state {
            SessionState::Streaming(pending) => Some(pending.streamed.clone()),
            _ => None,
        };
        SessionView {
            markdown: self.markdown().to_string(),
            phase: self.phase(),
            proposal: self.proposal().cloned(),
            error: self.error.clone(),
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            streamed,
            selection: self.selection.clone(),
            transcript: self.transcript.clone(),
        }
    }

    fn commit(&mut self, markdown: String) {
        self.history.set(markdown);
        self.persist();
    }

    fn persist(&self) {
        if let Err(error) = self.store.save(&self.storage_key, self.history.present()) {
            warn!(%error, key = %self.storage_key, "failed to persist document");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{MemoryDocumentStore, StoreError, StoreResult};

    fn session_with(markdown: &str) -> (EditSession, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let session = EditSession::new(
            markdown,
            Box::new(Arc::clone(&store)),
            &EditorConfig::default(),
        );
        (session, store)
    }

    fn propose(session: &mut EditSession, prompt: &str, reply: &str) -> EditProposal {
        let request = session.begin_submit(prompt).unwrap();
        match session.finish_stream(&request.request_id, Ok(reply.to_string())) {
            SubmitOutcome::Proposal { proposal } => proposal,
            other => panic!("expected proposal, got {other:?}"),
        }
    }

    #[test]
    fn accepted_selection_edit_is_committed_and_persisted() {
        let (mut session, store) = session_with("# Title\n\nhello world");
        session.select("hello");

        let proposal = propose(&mut session, "capitalize", "Hello");
        assert_eq!(proposal.original_text, "hello");
        assert_eq!(proposal.description, "capitalize");
        assert_eq!(session.phase(), SessionPhase::ProposalReady);

        assert_eq!(session.accept(), Ok(true));
        assert_eq!(session.markdown(), "# Title\n\nHello world");
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.can_undo());
        assert_eq!(session.selection(), "");
        assert_eq!(
            store.entries().unwrap()["markdown-content"],
            "# Title\n\nHello world"
        );
    }

    #[test]
    fn empty_selection_targets_whole_document() {
        let (mut session, _) = session_with("draft");
        let request = session.begin_submit("rewrite").unwrap();
        assert_eq!(request.selected_text, "");
        assert_eq!(request.markdown, "draft");

        session.finish_stream(&request.request_id, Ok("final".to_string()));
        assert_eq!(session.proposal().unwrap().original_text, "draft");
        assert_eq!(session.accept(), Ok(true));
        assert_eq!(session.markdown(), "final");
    }

    #[test]
    fn stale_proposal_surfaces_not_found_and_is_discarded() {
        let (mut session, _) = session_with("alpha beta");
        session.select("beta");
        propose(&mut session, "shout", "BETA");
        session.edit_markdown("alpha gamma");

        assert_eq!(session.accept(), Err(EditError::NotFound));
        assert_eq!(session.markdown(), "alpha gamma");
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.proposal().is_none());
        assert_eq!(session.error().unwrap().kind, ErrorKind::NotFound);
    }

    #[test]
    fn unsafe_proposal_leaves_document_untouched() {
        let (mut session, store) = session_with("note");
        propose(&mut session, "inject", "<script>alert(1)</script>");

        let error = session.accept().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unsafe);
        assert_eq!(session.markdown(), "note");
        assert!(!session.can_undo());
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn reject_discards_proposal_and_clears_error() {
        let (mut session, _) = session_with("text");
        propose(&mut session, "p", "other");
        session.error = Some(SessionError {
            kind: ErrorKind::Ambiguous,
            message: "m".to_string(),
        });

        assert!(session.reject());
        assert_eq!(session.markdown(), "text");
        assert!(session.error().is_none());
        assert!(!session.reject());
        assert_eq!(session.accept(), Ok(false));
    }

    #[test]
    fn second_submit_while_streaming_is_ignored() {
        let (mut session, _) = session_with("doc");
        let first = session.begin_submit("one").unwrap();
        assert!(session.begin_submit("two").is_none());
        assert_eq!(session.transcript().len(), 1);

        let outcome = session.finish_stream(&first.request_id, Ok("DOC".to_string()));
        assert!(matches!(outcome, SubmitOutcome::Proposal { .. }));
    }

    #[test]
    fn prompt_is_sent_as_typed() {
        let (mut session, _) = session_with("doc");
        let request = session.begin_submit("  tighten the intro\n").unwrap();
        assert_eq!(request.prompt, "  tighten the intro\n");

        session.finish_stream(&request.request_id, Ok("DOC".to_string()));
        assert_eq!(session.proposal().unwrap().description, "  tighten the intro\n");
        assert_eq!(session.transcript()[0], ChatEntry::user("  tighten the intro\n"));
    }

    #[test]
    fn blank_prompt_is_ignored() {
        let (mut session, _) = session_with("doc");
        assert!(session.begin_submit("   ").is_none());
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn transport_failure_sets_fixed_message_and_returns_to_idle() {
        let (mut session, _) = session_with("doc");
        let request = session.begin_submit("p").unwrap();
        let outcome = session.finish_stream(
            &request.request_id,
            Err(TransportError::Status {
                status: 500,
                body: String::new(),
            }),
        );

        let SubmitOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ErrorKind::TransportError);
        assert_eq!(error.message, TRANSPORT_FAILURE_MESSAGE);
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.proposal().is_none());
        assert_eq!(
            session.transcript().last(),
            Some(&ChatEntry::assistant(TRANSPORT_FAILURE_MESSAGE))
        );

        session.dismiss_error();
        assert!(session.error().is_none());
    }

    #[test]
    fn completion_for_unknown_request_is_ignored() {
        let (mut session, _) = session_with("doc");
        let request = session.begin_submit("p").unwrap();
        assert_eq!(
            session.finish_stream("other", Ok("x".to_string())),
            SubmitOutcome::Ignored
        );
        assert!(!session.publish_partial("other", "x"));
        assert_eq!(session.phase(), SessionPhase::Streaming);

        assert!(session.abort_stream(&request.request_id));
        assert!(!session.abort_stream(&request.request_id));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn view_exposes_streamed_text_while_streaming() {
        let (mut session, _) = session_with("doc");
        let request = session.begin_submit("p").unwrap();
        session.publish_partial(&request.request_id, "par");
        session.publish_partial(&request.request_id, "partial");

        let view = session.view();
        assert_eq!(view.phase, SessionPhase::Streaming);
        assert_eq!(view.streamed.as_deref(), Some("partial"));

        session.finish_stream(&request.request_id, Ok("partial".to_string()));
        assert_eq!(session.view().streamed, None);
    }

    #[test]
    fn new_submission_replaces_pending_proposal_and_error() {
        let (mut session, _) = session_with("doc");
        propose(&mut session, "first", "one");
        session.error = Some(SessionError {
            kind: ErrorKind::Malformed,
            message: "m".to_string(),
        });

        let request = session.begin_submit("second").unwrap();
        assert!(session.proposal().is_none());
        assert!(session.error().is_none());
        session.finish_stream(&request.request_id, Ok("two".to_string()));
        assert_eq!(session.proposal().unwrap().proposed_text, "two");
    }

    #[test]
    fn undo_redo_and_manual_edits_follow_history() {
        let (mut session, store) = session_with("");
        assert!(session.edit_markdown("A"));
        assert!(session.edit_markdown("B"));
        assert!(!session.edit_markdown("B"));

        assert!(session.undo());
        assert_eq!(session.markdown(), "A");
        assert_eq!(store.entries().unwrap()["markdown-content"], "A");
        assert!(session.redo());
        assert_eq!(session.markdown(), "B");

        session.undo();
        session.edit_markdown("C");
        assert!(!session.can_redo());
        assert!(!session.redo());
    }

    #[test]
    fn stored_document_wins_over_initial_value() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.save("markdown-content", "saved").unwrap();
        let session = EditSession::new("initial", Box::new(store), &EditorConfig::default());
        assert_eq!(session.markdown(), "saved");
        assert!(!session.can_undo());
    }

    struct FailingStore;

    impl DocumentStore for FailingStore {
        fn load(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::LockPoisoned)
        }

        fn save(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Err(StoreError::LockPoisoned)
        }
    }

    #[test]
    fn persistence_failure_keeps_the_commit() {
        let mut session = EditSession::new("start", Box::new(FailingStore), &EditorConfig::default());
        assert_eq!(session.markdown(), "start");
        assert!(session.edit_markdown("next"));
        assert_eq!(session.markdown(), "next");
        assert!(session.can_undo());
    }
}

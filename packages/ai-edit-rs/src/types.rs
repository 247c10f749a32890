use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::EditError;

/// A candidate replacement awaiting the user's accept/reject decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditProposal {
    pub id: String,
    pub original_text: String,
    pub proposed_text: String,
    pub description: String,
    pub request_id: String,
}

impl EditProposal {
    pub fn new(
        original_text: String,
        proposed_text: String,
        description: String,
        request_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            original_text,
            proposed_text,
            description,
            request_id,
        }
    }
}

/// Body posted to the generation service. `request_id` stays local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(skip)]
    pub request_id: String,
    pub prompt: String,
    pub markdown: String,
    pub selected_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
}

impl ChatEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Streaming,
    ProposalReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportError,
    NotFound,
    Ambiguous,
    Unsafe,
    Malformed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransportError => "transport_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::Unsafe => "unsafe",
            ErrorKind::Malformed => "malformed",
        }
    }
}

/// Failure surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EditError> for SessionError {
    fn from(error: &EditError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Read-only projection handed to whatever renders the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub markdown: String,
    pub phase: SessionPhase,
    pub proposal: Option<EditProposal>,
    pub error: Option<SessionError>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub streamed: Option<String>,
    pub selection: String,
    pub transcript: Vec<ChatEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_request_serializes_wire_body_without_request_id() {
        let request = GenerationRequest {
            request_id: "req-1".to_string(),
            prompt: "shorter".to_string(),
            markdown: "# Doc".to_string(),
            selected_text: String::new(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "prompt": "shorter", "markdown": "# Doc", "selectedText": "" })
        );
    }

    #[test]
    fn proposal_uses_camel_case_fields() {
        let proposal = EditProposal::new(
            "a".to_string(),
            "b".to_string(),
            "fix".to_string(),
            "req".to_string(),
        );
        let value = serde_json::to_value(&proposal).unwrap();
        assert_eq!(value["originalText"], "a");
        assert_eq!(value["proposedText"], "b");
        assert_eq!(value["requestId"], "req");
        assert!(!proposal.id.is_empty());
    }
}

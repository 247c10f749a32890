pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod runner;
pub mod session;
pub mod store;
pub mod stream;
pub mod types;
pub mod validation;

#[cfg(feature = "node")]
mod binding;

pub use client::{
    ChunkStream, GenerationClient, HttpGenerationClient, ScriptedGenerationClient, ScriptedReply,
    TransportError,
};
pub use config::{ConfigError, EditorConfig, EditorOptions};
pub use error::EditorError;
pub use history::History;
pub use logging::{LogEmitter, LogEntry};
pub use runner::SessionRunner;
pub use session::{EditSession, SubmitOutcome, TRANSPORT_FAILURE_MESSAGE};
pub use store::{DocumentStore, FileDocumentStore, MemoryDocumentStore, StoreError};
pub use stream::{StreamAssembler, collect_stream};
pub use types::{
    ChatEntry, ChatRole, EditProposal, ErrorKind, GenerationRequest, SessionError, SessionPhase,
    SessionView,
};
pub use validation::{EditError, StructureIssue, UnsafePattern, validate_edit};

use crate::client::TransportError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Failures of the session plumbing itself. Edit rejections and generation
/// failures are reported through the session state instead.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("session lock poisoned")]
    LockPoisoned,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EditorError>;

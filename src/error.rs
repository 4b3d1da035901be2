//! Error types for the synchronization layer.

use thiserror::Error;

/// Main error type for sync operations.
///
/// Most of these never reach a consumer: malformed frames and patches are
/// logged and dropped by the stream that received them. They are returned
/// from the decoding functions so callers can decide.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Malformed patch operation: {0}")]
    MalformedPatch(String),

    #[error("Invalid JSON pointer: {0:?}")]
    InvalidPointer(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Pull request failed: {0}")]
    Pull(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            SyncError::Deserialization(e.to_string())
        } else {
            SyncError::Serialization(e.to_string())
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

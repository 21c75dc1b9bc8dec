//! Snapshot store errors

use thiserror::Error;

/// Errors from checkpoint operations
///
/// Create and rollback failures jeopardize data integrity and are fatal for
/// the task that triggered them; callers must not swallow them.
#[derive(Debug, Error)]
pub enum SnapError {
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Checkpoint {0} is protected")]
    Protected(String),

    #[error("Invalid include pattern {pattern}: {detail}")]
    InvalidPattern { pattern: String, detail: String },

    #[error("Manifest for {id} is unreadable: {detail}")]
    CorruptManifest { id: String, detail: String },

    #[error("Missing blob {hash} for {path}")]
    MissingBlob { hash: String, path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result alias for snapshot operations
pub type SnapResult<T> = Result<T, SnapError>;

//! Store error types

use thiserror::Error;

/// Errors from graph and result store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The on-disk document is unreadable. Fatal: the store refuses to
    /// operate rather than risk losing data.
    #[error("Store document corrupt at {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("Store at {path} is locked by another process")]
    Locked { path: String },

    #[error("Task not found: {0}")]
    UnknownTask(String),

    #[error("Unknown dependency {dep} for task {task}")]
    UnknownDependency { task: String, dep: String },

    #[error("Task {0} cannot depend on itself")]
    SelfDependency(String),

    #[error("Task {task} cannot be done: dependency {dep} is {status}")]
    DependencyNotDone { task: String, dep: String, status: String },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

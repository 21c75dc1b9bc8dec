//! GraphStore - persistent task graph and worker-result storage
//!
//! Two stores under a working directory:
//!
//! ```text
//! .orchd/
//! ├── tasks.json     # task graph document (header + ordered task list)
//! └── results.db     # worker results, one row per submission
//! ```
//!
//! The task document is rewritten atomically (temp file + rename); the
//! result store is a single-file SQLite database with an append-only
//! history per task.

pub mod cli;
mod error;
mod result;
mod resultstore;
mod task;
mod taskstore;

pub use error::{StoreError, StoreResult};
pub use result::{ResultStatus, WorkerResult, WorkerStats};
pub use resultstore::ResultStore;
pub use task::{Subtask, Task, TaskPriority, TaskRef, TaskStatus};
pub use taskstore::{DependencyIssue, DocumentMeta, TaskDocument, TaskStore};

/// Default store directory name under a working directory
pub const STORE_DIR: &str = ".orchd";

/// Task document file name
pub const TASKS_FILE: &str = "tasks.json";

/// Result database file name
pub const RESULTS_FILE: &str = "results.db";

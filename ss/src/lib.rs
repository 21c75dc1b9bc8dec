//! SnapStore - content-addressed filesystem checkpoints
//!
//! Snapshots a working tree into a blob store plus per-checkpoint manifests,
//! and restores it atomically enough to survive a crash mid-restore:
//!
//! - a checkpoint is published by an atomic manifest rename, so it is
//!   either complete or absent;
//! - each unique content hash is stored once as a blob;
//! - rollback orders deletions before overwrites before creations and
//!   journals progress, so an aborted restore resumes where it stopped.

pub mod cli;
mod error;
mod manifest;
mod store;

pub use error::{SnapError, SnapResult};
pub use manifest::{CheckpointKind, Manifest, ManifestEntry, RollbackStrategy};
pub use store::{DEFAULT_MAX_CHECKPOINTS, RollbackReport, SnapStore};

/// Default checkpoint directory under a working directory
pub const CHECKPOINT_DIR: &str = ".orchd/checkpoints";

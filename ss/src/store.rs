//! Core SnapStore implementation
//!
//! Content-addressed snapshots of a working tree:
//!
//! ```text
//! .orchd/checkpoints/
//! ├── blobs/
//! │   └── ab/abcdef…        # one blob per unique content hash
//! └── {checkpoint_id}/
//!     ├── manifest.json     # publish point: exists iff checkpoint exists
//!     └── restore.journal   # present only while a rollback is in flight
//! ```
//!
//! `create` and `rollback` take `&mut self`, which serializes them against
//! each other within one working tree; manifest reads are lock-free.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SnapError, SnapResult};
use crate::manifest::{CheckpointKind, Manifest, ManifestEntry, RollbackStrategy};

/// Default number of checkpoints kept by retention
pub const DEFAULT_MAX_CHECKPOINTS: usize = 20;

const MANIFEST_FILE: &str = "manifest.json";
const JOURNAL_FILE: &str = "restore.journal";
const BLOBS_DIR: &str = "blobs";

/// One step of a rollback, recorded in the restore journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum RestoreOp {
    Delete { path: String },
    Overwrite { path: String, hash: String, mode: u32 },
    Create { path: String, hash: String, mode: u32 },
}

/// Journal persisted across a rollback so an aborted restore can resume
/// from the last successful operation
#[derive(Debug, Serialize, Deserialize)]
struct RestoreJournal {
    ops: Vec<RestoreOp>,
    completed: usize,
}

/// Summary of a rollback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub deleted: usize,
    pub overwritten: usize,
    pub created: usize,
    /// True when the call resumed an interrupted restore
    pub resumed: bool,
}

/// Content-addressed checkpoint store for one working tree
pub struct SnapStore {
    work_dir: PathBuf,
    root: PathBuf,
    max_checkpoints: usize,
    protected: HashSet<String>,
}

impl SnapStore {
    /// Open or create a store rooted at `root` snapshotting `work_dir`
    pub fn open(work_dir: impl AsRef<Path>, root: impl AsRef<Path>) -> SnapResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOBS_DIR))?;
        debug!(root = %root.display(), "Opened snapshot store");
        Ok(Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            root,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            protected: HashSet::new(),
        })
    }

    /// Override the retention limit
    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = max;
        self
    }

    /// Create a checkpoint of all files matching `include_paths`
    /// (glob patterns relative to the working tree; empty means everything).
    ///
    /// Each unique content hash is stored exactly once as a blob. The
    /// manifest is written to a temp file and renamed: the checkpoint is
    /// either complete or absent.
    pub fn create(
        &mut self,
        kind: CheckpointKind,
        description: impl Into<String>,
        include_paths: &[String],
        metadata: HashMap<String, Value>,
    ) -> SnapResult<String> {
        let id = new_checkpoint_id();
        let files = self.enumerate_files(include_paths)?;

        let mut entries = Vec::with_capacity(files.len());
        for (rel, abs) in &files {
            let content = fs::read(abs)?;
            let hash = hex::encode(Sha256::digest(&content));
            self.store_blob(&hash, &content)?;
            entries.push(ManifestEntry {
                path: rel.clone(),
                hash,
                mode: file_mode(abs)?,
            });
        }

        let parent = self.list()?.last().map(|m| m.checkpoint_id.clone());
        let manifest = Manifest {
            checkpoint_id: id.clone(),
            kind,
            timestamp: Utc::now(),
            description: description.into(),
            parent,
            metadata,
            include_paths: include_paths.to_vec(),
            entries,
        };

        let dir = self.root.join(&id);
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, serde_json::to_string_pretty(&manifest)?)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;

        info!(checkpoint_id = %id, files = manifest.entries.len(), %kind, "Created checkpoint");
        self.apply_retention()?;
        Ok(id)
    }

    /// Restore the working tree to a checkpoint.
    ///
    /// Operations are ordered deletions → overwrites → creations so a
    /// rename-like change (delete A, create B with the same content) never
    /// collides. Progress is journaled; if a restore aborts mid-way, calling
    /// `rollback` again resumes from the last completed operation.
    pub fn rollback(&mut self, id: &str, strategy: RollbackStrategy) -> SnapResult<RollbackReport> {
        let manifest = self.get(id)?;
        let journal_path = self.root.join(id).join(JOURNAL_FILE);

        let (mut journal, resumed) = if journal_path.exists() {
            let content = fs::read_to_string(&journal_path)?;
            match serde_json::from_str::<RestoreJournal>(&content) {
                Ok(journal) => {
                    warn!(checkpoint_id = %id, completed = journal.completed, "Resuming interrupted rollback");
                    (journal, true)
                }
                Err(e) => {
                    warn!(checkpoint_id = %id, error = %e, "Discarding unreadable restore journal");
                    (self.plan_rollback(&manifest, &strategy)?, false)
                }
            }
        } else {
            (self.plan_rollback(&manifest, &strategy)?, false)
        };

        let mut report = RollbackReport {
            resumed,
            ..Default::default()
        };

        while journal.completed < journal.ops.len() {
            let op = journal.ops[journal.completed].clone();
            self.execute_op(&op)?;
            match op {
                RestoreOp::Delete { .. } => report.deleted += 1,
                RestoreOp::Overwrite { .. } => report.overwritten += 1,
                RestoreOp::Create { .. } => report.created += 1,
            }
            journal.completed += 1;
            fs::write(&journal_path, serde_json::to_string(&journal)?)?;
        }

        fs::remove_file(&journal_path).ok();
        info!(
            checkpoint_id = %id,
            deleted = report.deleted,
            overwritten = report.overwritten,
            created = report.created,
            "Rollback complete"
        );
        Ok(report)
    }

    /// All checkpoints, oldest first (IDs are timestamp-prefixed)
    pub fn list(&self) -> SnapResult<Vec<Manifest>> {
        let mut manifests = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == BLOBS_DIR {
                continue;
            }
            let manifest_path = entry.path().join(MANIFEST_FILE);
            // A directory without a manifest is an unpublished remnant
            if manifest_path.exists() {
                manifests.push(self.get(&name)?);
            }
        }
        manifests.sort_by(|a, b| a.checkpoint_id.cmp(&b.checkpoint_id));
        Ok(manifests)
    }

    /// Load one checkpoint's manifest
    pub fn get(&self, id: &str) -> SnapResult<Manifest> {
        let path = self.root.join(id).join(MANIFEST_FILE);
        if !path.exists() {
            return Err(SnapError::NotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| SnapError::CorruptManifest {
            id: id.to_string(),
            detail: e.to_string(),
        })
    }

    /// Delete a checkpoint (its manifest directory; blobs are shared and kept)
    pub fn delete(&mut self, id: &str) -> SnapResult<()> {
        if self.protected.contains(id) {
            return Err(SnapError::Protected(id.to_string()));
        }
        let dir = self.root.join(id);
        if !dir.join(MANIFEST_FILE).exists() {
            return Err(SnapError::NotFound(id.to_string()));
        }
        if dir.join(JOURNAL_FILE).exists() {
            // A rollback to this checkpoint is in progress
            return Err(SnapError::Protected(id.to_string()));
        }
        fs::remove_dir_all(&dir)?;
        info!(checkpoint_id = %id, "Deleted checkpoint");
        Ok(())
    }

    /// Mark a checkpoint as exempt from retention and deletion
    pub fn protect(&mut self, id: &str) {
        self.protected.insert(id.to_string());
    }

    /// Remove retention protection
    pub fn unprotect(&mut self, id: &str) {
        self.protected.remove(id);
    }

    /// Drop oldest non-protected checkpoints beyond the retention limit
    fn apply_retention(&mut self) -> SnapResult<()> {
        let manifests = self.list()?;
        if manifests.len() <= self.max_checkpoints {
            return Ok(());
        }
        let mut excess = manifests.len() - self.max_checkpoints;
        // The newest checkpoint is never a pruning candidate
        for manifest in &manifests[..manifests.len() - 1] {
            if excess == 0 {
                break;
            }
            if self.protected.contains(&manifest.checkpoint_id) {
                continue;
            }
            if self.delete(&manifest.checkpoint_id).is_ok() {
                excess -= 1;
            }
        }
        Ok(())
    }

    /// Compute the ordered op list for a rollback
    fn plan_rollback(&self, manifest: &Manifest, strategy: &RollbackStrategy) -> SnapResult<RestoreJournal> {
        let targets: Vec<&ManifestEntry> = match strategy {
            RollbackStrategy::Full => manifest.entries.iter().collect(),
            RollbackStrategy::Partial(prefixes) => manifest
                .entries
                .iter()
                .filter(|e| prefixes.iter().any(|p| e.path == *p || e.path.starts_with(&format!("{}/", p))))
                .collect(),
            RollbackStrategy::Selective(paths) => manifest
                .entries
                .iter()
                .filter(|e| paths.contains(&e.path))
                .collect(),
        };
        let tracked: HashSet<&str> = targets.iter().map(|e| e.path.as_str()).collect();

        let mut ops = Vec::new();

        // Deletions first: files in the working tree but not in the manifest
        match strategy {
            RollbackStrategy::Full => {
                for (rel, _) in self.enumerate_files(&manifest.include_paths)? {
                    if manifest.entry(&rel).is_none() {
                        ops.push(RestoreOp::Delete { path: rel });
                    }
                }
            }
            RollbackStrategy::Partial(prefixes) => {
                for (rel, _) in self.enumerate_files(&manifest.include_paths)? {
                    let in_scope = prefixes
                        .iter()
                        .any(|p| rel == *p || rel.starts_with(&format!("{}/", p)));
                    if in_scope && !tracked.contains(rel.as_str()) {
                        ops.push(RestoreOp::Delete { path: rel });
                    }
                }
            }
            RollbackStrategy::Selective(_) => {}
        }

        // Then overwrites of changed files, then creations of missing ones
        let mut creations = Vec::new();
        for entry in targets {
            let abs = self.work_dir.join(&entry.path);
            if abs.exists() {
                let content = fs::read(&abs)?;
                let hash = hex::encode(Sha256::digest(&content));
                if hash != entry.hash || file_mode(&abs)? != entry.mode {
                    ops.push(RestoreOp::Overwrite {
                        path: entry.path.clone(),
                        hash: entry.hash.clone(),
                        mode: entry.mode,
                    });
                }
            } else {
                creations.push(RestoreOp::Create {
                    path: entry.path.clone(),
                    hash: entry.hash.clone(),
                    mode: entry.mode,
                });
            }
        }
        ops.extend(creations);

        Ok(RestoreJournal { ops, completed: 0 })
    }

    fn execute_op(&self, op: &RestoreOp) -> SnapResult<()> {
        match op {
            RestoreOp::Delete { path } => {
                let abs = self.work_dir.join(path);
                if abs.exists() {
                    fs::remove_file(&abs)?;
                }
                debug!(%path, "Rollback: deleted");
            }
            RestoreOp::Overwrite { path, hash, mode } | RestoreOp::Create { path, hash, mode } => {
                let abs = self.work_dir.join(path);
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent)?;
                }
                let content = self.read_blob(hash).map_err(|_| SnapError::MissingBlob {
                    hash: hash.clone(),
                    path: path.clone(),
                })?;
                fs::write(&abs, content)?;
                set_file_mode(&abs, *mode)?;
                debug!(%path, "Rollback: restored");
            }
        }
        Ok(())
    }

    /// Files under the working tree matching the include patterns, as
    /// (relative path, absolute path). The store directory itself is
    /// always skipped.
    fn enumerate_files(&self, include_paths: &[String]) -> SnapResult<Vec<(String, PathBuf)>> {
        let patterns: Vec<glob::Pattern> = include_paths
            .iter()
            .map(|p| {
                glob::Pattern::new(p).map_err(|e| SnapError::InvalidPattern {
                    pattern: p.clone(),
                    detail: e.to_string(),
                })
            })
            .collect::<SnapResult<_>>()?;

        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.work_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !e.path().starts_with(&self.root))
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.work_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            // The orchestrator's own state lives outside snapshots
            if rel.starts_with(".orchd") {
                continue;
            }
            if patterns.is_empty() || patterns.iter().any(|p| p.matches(&rel)) {
                files.push((rel, entry.path().to_path_buf()));
            }
        }
        Ok(files)
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        let prefix = &hash[..2.min(hash.len())];
        self.root.join(BLOBS_DIR).join(prefix).join(hash)
    }

    /// Store a blob if it is not already present (temp file + rename)
    fn store_blob(&self, hash: &str, content: &[u8]) -> SnapResult<()> {
        let path = self.blob_path(hash);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_blob(&self, hash: &str) -> SnapResult<Vec<u8>> {
        Ok(fs::read(self.blob_path(hash))?)
    }
}

/// Sortable checkpoint ID: UTC timestamp prefix + uuid-v7 suffix
fn new_checkpoint_id() -> String {
    let suffix = Uuid::now_v7().simple().to_string();
    format!(
        "cp-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        &suffix[suffix.len() - 8..]
    )
}

#[cfg(unix)]
fn file_mode(path: &Path) -> std::io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> std::io::Result<u32> {
    Ok(0o644)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

//! Checkpoint manifest types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Why a checkpoint was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Manual,
    Auto,
    PreTask,
    PostTask,
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
            Self::PreTask => write!(f, "pre_task"),
            Self::PostTask => write!(f, "post_task"),
        }
    }
}

/// How much of a checkpoint to restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStrategy {
    /// Restore every tracked path and delete untracked files in scope
    Full,
    /// Restore a named subset of tracked paths (prefix match), deleting
    /// untracked files under those prefixes
    Partial(Vec<String>),
    /// Restore only the exact named paths; never deletes
    Selective(Vec<String>),
}

/// One tracked file in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the working tree root
    pub path: String,
    /// Hex SHA-256 of the file content; doubles as the blob reference
    pub hash: String,
    /// Unix permission bits
    pub mode: u32,
}

/// A checkpoint manifest. Written atomically; a checkpoint exists iff its
/// manifest file does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub checkpoint_id: String,
    #[serde(rename = "type")]
    pub kind: CheckpointKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Include patterns the checkpoint was created with; reused on full
    /// rollback to scope the deletion scan
    #[serde(default)]
    pub include_paths: Vec<String>,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Look up an entry by path
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_form() {
        let json = serde_json::to_string(&CheckpointKind::PreTask).unwrap();
        assert_eq!(json, "\"pre_task\"");
    }

    #[test]
    fn test_manifest_round_trip() {
        let manifest = Manifest {
            checkpoint_id: "cp-1".to_string(),
            kind: CheckpointKind::Manual,
            timestamp: Utc::now(),
            description: "before refactor".to_string(),
            parent: None,
            metadata: HashMap::new(),
            include_paths: vec!["src/**".to_string()],
            entries: vec![ManifestEntry {
                path: "src/main.rs".to_string(),
                hash: "ab".repeat(32),
                mode: 0o644,
            }],
        };

        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"type\":\"manual\""));

        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entries, manifest.entries);
        assert!(back.entry("src/main.rs").is_some());
        assert!(back.entry("nope").is_none());
    }
}

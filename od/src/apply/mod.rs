//! Review application
//!
//! Turns a review's free text into change proposals, validates them,
//! detects conflicts, and applies them to the working tree with optional
//! checkpoint-backed rollback.

mod applier;
mod extract;
mod validate;

pub use applier::{ApplyReport, ChangeDetail, ReviewApplier};
pub use extract::ChangeExtractor;
pub use validate::{ChangeConflict, ChangeValidator, ConflictKind};

use std::collections::HashMap;

/// What kind of filesystem mutation a proposal describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    FileCreate,
    FileEdit,
    FileDelete,
    CodeReplace,
    LineInsert,
    LineDelete,
    Refactor,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FileCreate => "file_create",
            Self::FileEdit => "file_edit",
            Self::FileDelete => "file_delete",
            Self::CodeReplace => "code_replace",
            Self::LineInsert => "line_insert",
            Self::LineDelete => "line_delete",
            Self::Refactor => "refactor",
        };
        write!(f, "{}", s)
    }
}

/// A single proposed filesystem edit extracted from review text
#[derive(Debug, Clone)]
pub struct ChangeProposal {
    pub change_id: String,
    pub change_type: ChangeType,
    pub file_path: String,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    /// 1-based
    pub line_number: Option<usize>,
    /// 1-based inclusive end for ranged changes
    pub end_line: Option<usize>,
    pub description: String,
    pub metadata: HashMap<String, String>,
}

impl ChangeProposal {
    pub fn new(change_id: impl Into<String>, change_type: ChangeType, file_path: impl Into<String>) -> Self {
        Self {
            change_id: change_id.into(),
            change_type,
            file_path: file_path.into(),
            old_content: None,
            new_content: None,
            line_number: None,
            end_line: None,
            description: String::new(),
            metadata: HashMap::new(),
        }
    }

    /// Whether this change touches an existing file (as opposed to
    /// creating one)
    pub fn requires_existing_target(&self) -> bool {
        matches!(
            self.change_type,
            ChangeType::FileEdit
                | ChangeType::CodeReplace
                | ChangeType::LineInsert
                | ChangeType::LineDelete
                | ChangeType::Refactor
        )
    }
}

/// What to do when proposals conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictResolution {
    /// Leave conflicted changes unapplied for a human
    #[default]
    Manual,
    /// Apply the review's changes anyway
    PreferReview,
    /// Keep the current tree; drop conflicted changes
    PreferCurrent,
    /// Keep order-compatible pairs, drop true overlaps
    Merge,
    /// Drop every conflicted change
    Skip,
}

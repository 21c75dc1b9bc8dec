//! Change validation and conflict detection

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use super::{ChangeProposal, ChangeType};

/// Extensions whose proposed content gets a syntax sanity check
const CHECKED_EXTENSIONS: &[&str] = &["rs", "py", "js", "ts", "json", "go", "java", "c", "cpp"];

/// Content patterns that are never applied
const DANGEROUS_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/",
    r"\beval\s*\(",
    r"\bexec\s*\(",
    r"__import__\s*\(",
    r#"subprocess\.call\s*\(\s*["']rm"#,
];

/// A detected conflict between two proposals for the same path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeConflict {
    pub conflict_id: String,
    /// The change that loses under the current resolution strategy
    pub change_id: String,
    pub kind: ConflictKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A file is both created and edited in one batch
    CreateThenEdit,
    /// Two line-ranged changes overlap
    OverlappingLines,
}

/// Validates proposals against the working tree and each other
pub struct ChangeValidator {
    working_dir: PathBuf,
    dangerous: Vec<Regex>,
}

impl ChangeValidator {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            dangerous: DANGEROUS_PATTERNS
                .iter()
                .map(|p| Regex::new(p).expect("static pattern"))
                .collect(),
        }
    }

    /// Validate a single proposal. Returns the reason it is unusable, or
    /// `None` when it is fine. `created_earlier` marks a target that an
    /// earlier proposal in the same batch creates, so edits ordered after
    /// their create still validate.
    pub fn validate(&self, change: &ChangeProposal, created_earlier: bool) -> Option<String> {
        let target = self.working_dir.join(&change.file_path);

        if change.requires_existing_target() && !target.exists() && !created_earlier {
            return Some(format!("File not found: {}", change.file_path));
        }
        if change.change_type == ChangeType::FileCreate && (target.exists() || created_earlier) {
            return Some(format!("File already exists: {}", change.file_path));
        }

        if let Some(content) = &change.new_content {
            for pattern in &self.dangerous {
                if pattern.is_match(content) {
                    return Some(format!("Dangerous pattern detected: {}", pattern.as_str()));
                }
            }

            let extension = Path::new(&change.file_path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if CHECKED_EXTENSIONS.contains(&extension) {
                if let Err(reason) = check_balanced(content) {
                    return Some(format!("Syntax check failed: {}", reason));
                }
            }
        }

        None
    }

    /// Flag conflicting proposals within each path
    pub fn check_conflicts(&self, changes: &[ChangeProposal]) -> Vec<ChangeConflict> {
        let mut conflicts = Vec::new();

        for (i, first) in changes.iter().enumerate() {
            for second in changes.iter().skip(i + 1) {
                if first.file_path != second.file_path {
                    continue;
                }
                if let Some(conflict) = check_pair(first, second) {
                    debug!(
                        first = %first.change_id,
                        second = %second.change_id,
                        ?conflict.kind,
                        "Change conflict"
                    );
                    conflicts.push(conflict);
                }
            }
        }
        conflicts
    }
}

fn check_pair(first: &ChangeProposal, second: &ChangeProposal) -> Option<ChangeConflict> {
    // Create + edit of the same path in one batch
    let create_edit = (first.change_type == ChangeType::FileCreate && second.change_type == ChangeType::FileEdit)
        || (first.change_type == ChangeType::FileEdit && second.change_type == ChangeType::FileCreate);
    if create_edit {
        let loser = if first.change_type == ChangeType::FileEdit {
            first
        } else {
            second
        };
        return Some(ChangeConflict {
            conflict_id: format!("conflict_{}_{}", first.change_id, second.change_id),
            change_id: loser.change_id.clone(),
            kind: ConflictKind::CreateThenEdit,
            description: format!("File {} is both created and edited", first.file_path),
        });
    }

    // Overlapping line ranges between ranged change types
    let ranged = |c: &ChangeProposal| {
        matches!(c.change_type, ChangeType::CodeReplace | ChangeType::LineDelete) && c.line_number.is_some()
    };
    if ranged(first) && ranged(second) {
        let range = |c: &ChangeProposal| {
            let start = c.line_number.unwrap_or(0);
            (start, c.end_line.unwrap_or(start))
        };
        let (a_start, a_end) = range(first);
        let (b_start, b_end) = range(second);
        if a_start <= b_end && b_start <= a_end {
            return Some(ChangeConflict {
                conflict_id: format!("conflict_{}_{}", first.change_id, second.change_id),
                change_id: second.change_id.clone(),
                kind: ConflictKind::OverlappingLines,
                description: format!(
                    "Changes overlap at lines {}-{} and {}-{} in {}",
                    a_start, a_end, b_start, b_end, first.file_path
                ),
            });
        }
    }

    None
}

/// Minimal syntax sanity: brackets, braces, and parens must balance
/// outside string literals. A real parser can replace this check without
/// touching callers.
fn check_balanced(content: &str) -> Result<(), String> {
    let mut stack = Vec::new();
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for ch in content.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match in_string {
            Some(quote) => match ch {
                '\\' => escaped = true,
                c if c == quote => in_string = None,
                _ => {}
            },
            None => match ch {
                '"' | '\'' => in_string = Some(ch),
                '(' | '[' | '{' => stack.push(ch),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(expected) {
                        return Err(format!("unbalanced '{}'", ch));
                    }
                }
                _ => {}
            },
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("unclosed '{}'", open));
    }
    Ok(())
}

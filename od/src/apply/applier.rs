//! Applying change proposals to the working tree

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use snapstore::{CheckpointKind, RollbackStrategy, SnapStore};
use tracing::{debug, error, info, warn};

use crate::text::{normalize_whitespace, similarity_ratio};

use super::extract::ChangeExtractor;
use super::validate::{ChangeConflict, ChangeValidator};
use super::{ChangeProposal, ChangeType, ConflictResolution};

/// Similarity floor for the fuzzy line matcher
const FUZZY_THRESHOLD: f64 = 0.8;

/// Per-change application outcome
#[derive(Debug, Clone)]
pub struct ChangeDetail {
    pub change_id: String,
    pub applied: bool,
    pub message: String,
}

/// Structured result of one apply pass
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub extracted: usize,
    pub applied: usize,
    pub failed: usize,
    pub conflicts: Vec<ChangeConflict>,
    pub validation_errors: Vec<String>,
    pub files_modified: Vec<String>,
    pub checkpoint_id: Option<String>,
    pub rollback_performed: bool,
    pub details: Vec<ChangeDetail>,
}

impl ApplyReport {
    /// The pass counts as successful when nothing failed
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Extracts, validates, and applies review changes with conflict policy
/// and checkpoint-backed rollback
pub struct ReviewApplier {
    working_dir: PathBuf,
    resolution: ConflictResolution,
    extractor: ChangeExtractor,
    validator: ChangeValidator,
}

impl ReviewApplier {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        let working_dir = working_dir.as_ref().to_path_buf();
        Self {
            validator: ChangeValidator::new(&working_dir),
            extractor: ChangeExtractor::new(),
            resolution: ConflictResolution::default(),
            working_dir,
        }
    }

    pub fn with_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Apply every change found in the review text. When a snapshot store
    /// is provided, a pre-application checkpoint is taken first and the
    /// tree is rolled back to it if any change fails after another one
    /// already landed.
    pub fn apply(&self, review_text: &str, mut snap: Option<&mut SnapStore>) -> ApplyReport {
        let mut report = ApplyReport::default();

        let changes = self.extractor.extract(review_text);
        report.extracted = changes.len();
        if changes.is_empty() {
            debug!("No changes found in review text");
            return report;
        }

        if let Some(store) = snap.as_deref_mut() {
            match store.create(
                CheckpointKind::Manual,
                "Before applying review changes",
                &[],
                HashMap::new(),
            ) {
                Ok(id) => report.checkpoint_id = Some(id),
                Err(e) => {
                    // Refuse to touch the tree without the safety net we
                    // were asked to use
                    error!(error = %e, "Pre-apply checkpoint failed");
                    report.failed = changes.len();
                    report
                        .validation_errors
                        .push(format!("checkpoint failed: {}", e));
                    return report;
                }
            }
        }

        // Validation pass; creates earlier in the batch satisfy the
        // existence requirement of later edits to the same path
        let mut invalid: HashMap<String, String> = HashMap::new();
        let mut created_paths: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for change in &changes {
            let created_earlier = created_paths.contains(change.file_path.as_str());
            if let Some(reason) = self.validator.validate(change, created_earlier) {
                report
                    .validation_errors
                    .push(format!("{}: {}", change.change_id, reason));
                invalid.insert(change.change_id.clone(), reason);
            }
            if change.change_type == ChangeType::FileCreate {
                created_paths.insert(change.file_path.as_str());
            }
        }

        // Conflict pass
        report.conflicts = self.validator.check_conflicts(&changes);
        let dropped = self.resolve_conflicts(&report.conflicts);

        for change in &changes {
            if let Some(reason) = invalid.get(&change.change_id) {
                report.failed += 1;
                report.details.push(ChangeDetail {
                    change_id: change.change_id.clone(),
                    applied: false,
                    message: reason.clone(),
                });
                continue;
            }
            if dropped.contains(&change.change_id) {
                report.details.push(ChangeDetail {
                    change_id: change.change_id.clone(),
                    applied: false,
                    message: "skipped: conflicting change".to_string(),
                });
                continue;
            }

            match self.apply_single(change) {
                Ok(()) => {
                    report.applied += 1;
                    if !report.files_modified.contains(&change.file_path) {
                        report.files_modified.push(change.file_path.clone());
                    }
                    report.details.push(ChangeDetail {
                        change_id: change.change_id.clone(),
                        applied: true,
                        message: change.description.clone(),
                    });
                }
                Err(reason) => {
                    warn!(change_id = %change.change_id, %reason, "Change failed to apply");
                    report.failed += 1;
                    report.details.push(ChangeDetail {
                        change_id: change.change_id.clone(),
                        applied: false,
                        message: reason,
                    });
                }
            }
        }

        // Partial application is worse than none: restore the checkpoint
        if report.failed > 0 && report.applied > 0 {
            if let (Some(store), Some(checkpoint_id)) = (snap, report.checkpoint_id.clone()) {
                match store.rollback(&checkpoint_id, RollbackStrategy::Full) {
                    Ok(_) => {
                        warn!(checkpoint_id = %checkpoint_id, "Rolled back partial application");
                        report.rollback_performed = true;
                        report.files_modified.clear();
                    }
                    Err(e) => error!(error = %e, "Rollback after partial application failed"),
                }
            }
        }

        info!(
            extracted = report.extracted,
            applied = report.applied,
            failed = report.failed,
            conflicts = report.conflicts.len(),
            rolled_back = report.rollback_performed,
            "Review application finished"
        );
        report
    }

    /// Change IDs dropped under the current conflict-resolution strategy
    fn resolve_conflicts(&self, conflicts: &[ChangeConflict]) -> Vec<String> {
        use super::validate::ConflictKind;
        match self.resolution {
            ConflictResolution::PreferReview => Vec::new(),
            ConflictResolution::Manual | ConflictResolution::PreferCurrent | ConflictResolution::Skip => {
                conflicts.iter().map(|c| c.change_id.clone()).collect()
            }
            ConflictResolution::Merge => conflicts
                .iter()
                // Create-then-edit pairs apply cleanly in order; real line
                // overlaps are dropped
                .filter(|c| c.kind == ConflictKind::OverlappingLines)
                .map(|c| c.change_id.clone())
                .collect(),
        }
    }

    fn apply_single(&self, change: &ChangeProposal) -> Result<(), String> {
        let target = self.working_dir.join(&change.file_path);
        debug!(change_id = %change.change_id, kind = %change.change_type, path = %change.file_path, "Applying change");

        match change.change_type {
            ChangeType::FileCreate => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(&target, change.new_content.as_deref().unwrap_or(""))
                    .map_err(|e| e.to_string())
            }
            ChangeType::FileEdit => fs::write(&target, change.new_content.as_deref().unwrap_or(""))
                .map_err(|e| e.to_string()),
            ChangeType::FileDelete => {
                if target.exists() {
                    fs::remove_file(&target).map_err(|e| e.to_string())?;
                }
                Ok(())
            }
            ChangeType::CodeReplace => self.apply_replace(change, &target),
            ChangeType::LineInsert => {
                let content = read(&target)?;
                let mut lines: Vec<&str> = content.lines().collect();
                let position = change.line_number.unwrap_or(0);
                if position > lines.len() {
                    return Err(format!("Insert position {} out of range", position));
                }
                let insert = change.new_content.as_deref().unwrap_or("");
                lines.insert(position, insert);
                write_lines(&target, &lines, ends_with_newline(&content))
            }
            ChangeType::LineDelete => {
                let content = read(&target)?;
                let mut lines: Vec<&str> = content.lines().collect();
                let start = change.line_number.unwrap_or(0);
                let end = change.end_line.unwrap_or(start);
                if start == 0 || end < start || end > lines.len() {
                    return Err(format!("Line range {}-{} out of range", start, end));
                }
                lines.drain(start - 1..end);
                write_lines(&target, &lines, ends_with_newline(&content))
            }
            ChangeType::Refactor => {
                let content = read(&target)?;
                let old = change.old_content.as_deref().ok_or("Missing old name")?;
                let new = change.new_content.as_deref().ok_or("Missing new name")?;
                let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(old))).map_err(|e| e.to_string())?;
                let updated = pattern.replace_all(&content, new);
                fs::write(&target, updated.as_bytes()).map_err(|e| e.to_string())
            }
        }
    }

    fn apply_replace(&self, change: &ChangeProposal, target: &Path) -> Result<(), String> {
        let content = read(target)?;
        let old = change.old_content.as_deref().ok_or("Missing old content")?;
        let new = change.new_content.as_deref().ok_or("Missing new content")?;

        if let Some(line_number) = change.line_number {
            let mut lines: Vec<String> = content.lines().map(String::from).collect();
            let index = line_number
                .checked_sub(1)
                .filter(|i| *i < lines.len())
                .ok_or_else(|| format!("Line {} out of range", line_number))?;
            if !lines[index].contains(old) {
                return Err(format!("Line {} does not contain the expected text", line_number));
            }
            lines[index] = lines[index].replace(old, new);
            let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            return write_lines(target, &refs, ends_with_newline(&content));
        }

        if content.contains(old) {
            let updated = content.replacen(old, new, 1);
            return fs::write(target, updated).map_err(|e| e.to_string());
        }

        // Exact match failed; fall back to a whitespace-normalized fuzzy
        // line match
        let normalized_old = normalize_whitespace(old);
        let mut best: Option<(usize, f64)> = None;
        for (i, line) in content.lines().enumerate() {
            let ratio = similarity_ratio(&normalized_old, &normalize_whitespace(line));
            if ratio >= FUZZY_THRESHOLD && best.map(|(_, b)| ratio > b).unwrap_or(true) {
                best = Some((i, ratio));
            }
        }

        match best {
            Some((index, ratio)) => {
                debug!(line = index + 1, ratio, "Fuzzy-matched replacement target");
                let mut lines: Vec<&str> = content.lines().collect();
                lines[index] = new;
                write_lines(target, &lines, ends_with_newline(&content))
            }
            None => Err("Could not find content to replace".to_string()),
        }
    }
}

fn read(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Read failed: {}", e))
}

fn ends_with_newline(content: &str) -> bool {
    content.ends_with('\n')
}

fn write_lines(path: &Path, lines: &[&str], trailing_newline: bool) -> Result<(), String> {
    let mut output = lines.join("\n");
    if trailing_newline && !output.is_empty() {
        output.push('\n');
    }
    fs::write(path, output).map_err(|e| e.to_string())
}

//! Change extraction from review text
//!
//! A pure function from text to proposals. Each recognized form is a
//! small, independent pattern rule; none of them depend on each other.

use regex::Regex;

use super::{ChangeProposal, ChangeType};

/// How far back to scan for create/new-file markers before a code block
const CREATE_MARKER_WINDOW: usize = 200;

const CREATE_MARKERS: &[&str] = &["create", "new file", "add file"];

/// Extracts [`ChangeProposal`]s from free-form review text
pub struct ChangeExtractor {
    file_block: Regex,
    replace_block: Regex,
    line_change: Regex,
    delete_lines: Regex,
    insert_lines: Regex,
    refactor: Regex,
}

impl Default for ChangeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeExtractor {
    pub fn new() -> Self {
        Self {
            // ```lang:path/to/file\n...```
            file_block: Regex::new(r"(?s)```(\w*):([^\n]+)\n(.*?)```").expect("static pattern"),
            // Replace ... in file ```old``` with ```new```
            replace_block: Regex::new(
                r"(?si)(?:Replace|Change|Update).{0,100}?in\s+([^\s:]+).*?```(?:\w+)?\n(.*?)```.*?(?:with|to).*?```(?:\w+)?\n(.*?)```",
            )
            .expect("static pattern"),
            // At file, line N change 'x' to 'y'
            line_change: Regex::new(
                r#"(?i)(?:In|At)\s+([^\s,]+),?\s*line\s+(\d+).{0,50}?(?:change|replace)\s+["']([^"']+)["']\s+(?:to|with)\s+["']([^"']+)["']"#,
            )
            .expect("static pattern"),
            // Delete lines N-M in file
            delete_lines: Regex::new(r"(?i)(?:Delete|Remove)\s+lines?\s+(\d+)(?:\s*-\s*(\d+))?\s+(?:in|from)\s+(\S+)")
                .expect("static pattern"),
            // Insert after line N in file: ```...```
            insert_lines: Regex::new(
                r"(?si)(?:Insert|Add).{0,80}?(?:after|before)\s+line\s+(\d+)\s+(?:in|to)\s+([^\s:]+).*?```(?:\w+)?\n(.*?)```",
            )
            .expect("static pattern"),
            // Refactor function 'old' to 'new' in file
            refactor: Regex::new(
                r#"(?i)Refactor\s+(\w+)\s+["']([^"']+)["']\s+to\s+["']([^"']+)["']\s+in\s+(\S+)"#,
            )
            .expect("static pattern"),
        }
    }

    /// Extract every recognizable change from the text
    pub fn extract(&self, text: &str) -> Vec<ChangeProposal> {
        let mut changes = Vec::new();
        let mut counter = 0usize;
        let next_id = |counter: &mut usize| {
            *counter += 1;
            format!("change_{}", counter)
        };

        for captures in self.file_block.captures_iter(text) {
            let path = captures[2].trim().to_string();
            let content = captures[3].to_string();

            // Surrounding prose decides create vs edit
            let start = captures.get(0).map(|m| m.start()).unwrap_or(0);
            let mut window_start = start.saturating_sub(CREATE_MARKER_WINDOW);
            while window_start > 0 && !text.is_char_boundary(window_start) {
                window_start -= 1;
            }
            let before = text[window_start..start].to_lowercase();
            let is_create = CREATE_MARKERS.iter().any(|m| before.contains(m));

            let change_type = if is_create { ChangeType::FileCreate } else { ChangeType::FileEdit };
            let mut change = ChangeProposal::new(next_id(&mut counter), change_type, &path);
            change.new_content = Some(content);
            change.description = format!(
                "{} file {}",
                if is_create { "Create" } else { "Edit" },
                path
            );
            changes.push(change);
        }

        for captures in self.replace_block.captures_iter(text) {
            let mut change = ChangeProposal::new(next_id(&mut counter), ChangeType::CodeReplace, captures[1].trim());
            change.old_content = Some(captures[2].trim_end().to_string());
            change.new_content = Some(captures[3].trim_end().to_string());
            change.description = "Replace code block".to_string();
            changes.push(change);
        }

        for captures in self.line_change.captures_iter(text) {
            let line: usize = captures[2].parse().unwrap_or(0);
            let mut change = ChangeProposal::new(next_id(&mut counter), ChangeType::CodeReplace, captures[1].trim());
            change.old_content = Some(captures[3].to_string());
            change.new_content = Some(captures[4].to_string());
            change.line_number = Some(line);
            change.description = format!("Change line {}", line);
            changes.push(change);
        }

        for captures in self.delete_lines.captures_iter(text) {
            let start: usize = captures[1].parse().unwrap_or(0);
            let end: usize = captures
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(start);
            let mut change = ChangeProposal::new(next_id(&mut counter), ChangeType::LineDelete, captures[3].trim());
            change.line_number = Some(start);
            change.end_line = Some(end);
            change.description = format!("Delete lines {}-{}", start, end);
            changes.push(change);
        }

        for captures in self.insert_lines.captures_iter(text) {
            let line: usize = captures[1].parse().unwrap_or(0);
            let mut change = ChangeProposal::new(next_id(&mut counter), ChangeType::LineInsert, captures[2].trim());
            change.new_content = Some(captures[3].trim_end().to_string());
            change.line_number = Some(line);
            change.description = format!("Insert after line {}", line);
            changes.push(change);
        }

        for captures in self.refactor.captures_iter(text) {
            let mut change = ChangeProposal::new(next_id(&mut counter), ChangeType::Refactor, captures[4].trim());
            change.old_content = Some(captures[2].to_string());
            change.new_content = Some(captures[3].to_string());
            change
                .metadata
                .insert("refactor_kind".to_string(), captures[1].to_lowercase());
            change.description = format!("Refactor {} from {} to {}", &captures[1], &captures[2], &captures[3]);
            changes.push(change);
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<ChangeProposal> {
        ChangeExtractor::new().extract(text)
    }

    #[test]
    fn test_file_block_edit() {
        let text = "Adjust the handler:\n```rust:src/handler.rs\nfn handle() {}\n```\n";
        let changes = extract(text);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::FileEdit);
        assert_eq!(changes[0].file_path, "src/handler.rs");
        assert_eq!(changes[0].new_content.as_deref(), Some("fn handle() {}\n"));
    }

    #[test]
    fn test_file_block_create_from_prose() {
        let text = "Create a new file for the config:\n```rust:src/config.rs\npub struct Config;\n```\n";
        let changes = extract(text);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::FileCreate);
        assert_eq!(changes[0].file_path, "src/config.rs");
    }

    #[test]
    fn test_create_marker_only_within_window() {
        // The word "create" appears well before the 200-char window
        let filler = "x".repeat(300);
        let text = format!("create\n{}\n```rust:src/a.rs\nfn a() {{}}\n```\n", filler);
        let changes = extract(&text);
        assert_eq!(changes[0].change_type, ChangeType::FileEdit);
    }

    #[test]
    fn test_replace_block() {
        let text = "Replace the loop in src/main.rs\n```rust\nfor x in 0..10 {}\n```\nwith\n```rust\nfor x in 0..20 {}\n```\n";
        let changes = extract(text);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::CodeReplace);
        assert_eq!(changes[0].file_path, "src/main.rs");
        assert_eq!(changes[0].old_content.as_deref(), Some("for x in 0..10 {}"));
        assert_eq!(changes[0].new_content.as_deref(), Some("for x in 0..20 {}"));
        assert!(changes[0].line_number.is_none());
    }

    #[test]
    fn test_line_change() {
        let text = "At src/lib.rs, line 14 change 'let x = 1;' to 'let x = 2;'";
        let changes = extract(text);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::CodeReplace);
        assert_eq!(changes[0].line_number, Some(14));
        assert_eq!(changes[0].old_content.as_deref(), Some("let x = 1;"));
        assert_eq!(changes[0].new_content.as_deref(), Some("let x = 2;"));
    }

    #[test]
    fn test_delete_single_line() {
        let changes = extract("Delete line 7 in src/lib.rs");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::LineDelete);
        assert_eq!(changes[0].line_number, Some(7));
        assert_eq!(changes[0].end_line, Some(7));
    }

    #[test]
    fn test_delete_line_range() {
        let changes = extract("Remove lines 3-5 from src/lib.rs");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].line_number, Some(3));
        assert_eq!(changes[0].end_line, Some(5));
        assert_eq!(changes[0].file_path, "src/lib.rs");
    }

    #[test]
    fn test_insert_after_line() {
        let text = "Insert after line 10 in src/lib.rs:\n```rust\nuse std::fmt;\n```\n";
        let changes = extract(text);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::LineInsert);
        assert_eq!(changes[0].line_number, Some(10));
        assert_eq!(changes[0].new_content.as_deref(), Some("use std::fmt;"));
    }

    #[test]
    fn test_refactor() {
        let changes = extract("Refactor function 'old_name' to 'new_name' in src/lib.rs");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Refactor);
        assert_eq!(changes[0].old_content.as_deref(), Some("old_name"));
        assert_eq!(changes[0].new_content.as_deref(), Some("new_name"));
        assert_eq!(changes[0].metadata.get("refactor_kind").map(String::as_str), Some("function"));
    }

    #[test]
    fn test_multiple_changes_get_distinct_ids() {
        let text = "Delete line 1 in a.txt\nDelete line 2 in b.txt\n";
        let changes = extract(text);
        assert_eq!(changes.len(), 2);
        assert_ne!(changes[0].change_id, changes[1].change_id);
    }

    #[test]
    fn test_plain_text_extracts_nothing() {
        let changes = extract("The work looks good. No changes needed.");
        assert!(changes.is_empty());
    }
}

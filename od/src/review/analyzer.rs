//! Pattern-based file and output analyzers
//!
//! Language-agnostic by design: the reviewer never parses code, it matches
//! patterns. Anything smarter plugs in behind the same interface.

use regex::Regex;

use crate::text::similarity_ratio;

use super::{FindingCategory, ReviewFinding, Severity};

/// Maximum acceptable line length
const MAX_LINE_LENGTH: usize = 120;

/// Lines per function before it counts as long
const MAX_FUNCTION_LINES: usize = 50;

/// Parameters per function before it counts as crowded
const MAX_FUNCTION_PARAMS: usize = 6;

/// Characters before a file counts as oversized
const MAX_FILE_CHARS: usize = 10_000;

/// A produced or modified file under review
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

struct LinePattern {
    name: &'static str,
    regex: Regex,
    category: FindingCategory,
    severity: Severity,
    title: &'static str,
}

/// Scans file contents for security and quality issues
pub struct FileAnalyzer {
    line_patterns: Vec<LinePattern>,
    function_header: Regex,
}

impl Default for FileAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl FileAnalyzer {
    pub fn new() -> Self {
        let line_patterns = vec![
            LinePattern {
                name: "hardcoded_secret",
                regex: Regex::new(r#"(?i)(password|secret|api_key|token)\s*=\s*["'][^"']+["']"#)
                    .expect("static pattern"),
                category: FindingCategory::Security,
                severity: Severity::High,
                title: "Hard-coded secret",
            },
            LinePattern {
                name: "unsafe_sink_concat",
                regex: Regex::new(r"(?i)(query|execute)\s*\([^)]*\+[^)]*\)").expect("static pattern"),
                category: FindingCategory::Security,
                severity: Severity::High,
                title: "String concatenation into query/exec sink",
            },
            LinePattern {
                name: "dynamic_eval",
                regex: Regex::new(r"\b(eval|exec)\s*\(|__import__\s*\(").expect("static pattern"),
                category: FindingCategory::Security,
                severity: Severity::High,
                title: "Dynamic code evaluation",
            },
            LinePattern {
                name: "bare_catch_all",
                regex: Regex::new(r"except\s*:|catch\s*\(\s*\)").expect("static pattern"),
                category: FindingCategory::CodeQuality,
                severity: Severity::Medium,
                title: "Bare catch-all handler",
            },
            LinePattern {
                name: "todo_marker",
                regex: Regex::new(r"\b(TODO|FIXME|HACK|XXX)\b").expect("static pattern"),
                category: FindingCategory::CodeQuality,
                severity: Severity::Low,
                title: "Unresolved work marker",
            },
        ];

        Self {
            line_patterns,
            function_header: Regex::new(r"(?m)^\s*(?:pub\s+)?(?:async\s+)?(?:fn|def|function)\s+(\w+)\s*\(([^)]*)\)")
                .expect("static pattern"),
        }
    }

    /// Analyze one file's content
    pub fn analyze(&self, file: &FileChange) -> Vec<ReviewFinding> {
        let mut findings = Vec::new();

        for (line_no, line) in file.content.lines().enumerate() {
            let line_no = line_no + 1;

            for pattern in &self.line_patterns {
                if pattern.regex.is_match(line) {
                    findings.push(ReviewFinding {
                        finding_id: format!("{}_{}_{}", pattern.name, file.path, line_no),
                        category: pattern.category,
                        severity: pattern.severity,
                        title: pattern.title.to_string(),
                        description: format!("Potential issue: {}", pattern.name),
                        location: Some(format!("{}:{}", file.path, line_no)),
                        suggestion: None,
                        code_snippet: Some(line.trim().to_string()),
                    });
                }
            }

            if line.len() > MAX_LINE_LENGTH {
                findings.push(ReviewFinding {
                    finding_id: format!("long_line_{}_{}", file.path, line_no),
                    category: FindingCategory::CodeQuality,
                    severity: Severity::Low,
                    title: "Line too long".to_string(),
                    description: format!("Line has {} characters, limit is {}", line.len(), MAX_LINE_LENGTH),
                    location: Some(format!("{}:{}", file.path, line_no)),
                    suggestion: None,
                    code_snippet: None,
                });
            }
        }

        findings.extend(self.analyze_functions(file));

        if file.content.len() > MAX_FILE_CHARS {
            findings.push(ReviewFinding {
                finding_id: format!("large_file_{}", file.path),
                category: FindingCategory::Architecture,
                severity: Severity::Medium,
                title: "Oversized file".to_string(),
                description: format!("File is very large ({} chars)", file.content.len()),
                location: Some(file.path.clone()),
                suggestion: Some("Consider splitting into smaller modules".to_string()),
                code_snippet: None,
            });
        }

        findings
    }

    fn analyze_functions(&self, file: &FileChange) -> Vec<ReviewFinding> {
        let mut findings = Vec::new();
        let line_starts: Vec<usize> = {
            let mut starts = vec![0];
            starts.extend(file.content.match_indices('\n').map(|(i, _)| i + 1));
            starts
        };
        let line_of = |offset: usize| line_starts.partition_point(|s| *s <= offset);

        let headers: Vec<(usize, String, String)> = self
            .function_header
            .captures_iter(&file.content)
            .map(|c| {
                let offset = c.get(0).map(|m| m.start()).unwrap_or(0);
                (line_of(offset), c[1].to_string(), c[2].to_string())
            })
            .collect();

        let total_lines = file.content.lines().count();
        for (i, (start_line, name, params)) in headers.iter().enumerate() {
            let end_line = headers.get(i + 1).map(|(l, _, _)| *l - 1).unwrap_or(total_lines);
            let length = end_line.saturating_sub(*start_line);

            if length > MAX_FUNCTION_LINES {
                findings.push(ReviewFinding {
                    finding_id: format!("long_function_{}_{}", file.path, name),
                    category: FindingCategory::CodeQuality,
                    severity: Severity::Medium,
                    title: format!("Long function: {}", name),
                    description: format!("Function spans {} lines, threshold is {}", length, MAX_FUNCTION_LINES),
                    location: Some(format!("{}:{}", file.path, start_line)),
                    suggestion: Some("Break into smaller, focused functions".to_string()),
                    code_snippet: None,
                });
            }

            let param_count = params.split(',').filter(|p| !p.trim().is_empty()).count();
            if param_count > MAX_FUNCTION_PARAMS {
                findings.push(ReviewFinding {
                    finding_id: format!("many_params_{}_{}", file.path, name),
                    category: FindingCategory::CodeQuality,
                    severity: Severity::Low,
                    title: format!("Too many parameters: {}", name),
                    description: format!(
                        "Function takes {} parameters, threshold is {}",
                        param_count, MAX_FUNCTION_PARAMS
                    ),
                    location: Some(format!("{}:{}", file.path, start_line)),
                    suggestion: Some("Group related parameters into a struct".to_string()),
                    code_snippet: None,
                });
            }
        }
        findings
    }
}

const POSITIVE_MARKERS: &[&str] = &["success", "done", "passed"];
const NEGATIVE_MARKERS: &[(&str, Severity)] = &[
    ("error", Severity::High),
    ("exception", Severity::High),
    ("failed", Severity::High),
];
const WARNING_MARKERS: &[(&str, Severity)] = &[("warning", Severity::Medium), ("deprecated", Severity::Low)];
const INCOMPLETE_MARKERS: &[&str] = &["todo", "not implemented", "placeholder"];

/// Marker counts from an output scan
#[derive(Debug, Clone, Default)]
pub struct OutputSignals {
    pub positive: usize,
    pub negative: usize,
    pub warning: usize,
    pub similarity: Option<f64>,
}

/// Scans a worker's output text for success/failure signals
pub struct OutputAnalyzer;

impl OutputAnalyzer {
    /// Analyze output text, optionally comparing against an expected output
    pub fn analyze(output: &str, expected: Option<&str>) -> (Vec<ReviewFinding>, OutputSignals) {
        let lower = output.to_lowercase();
        let mut findings = Vec::new();
        let mut signals = OutputSignals {
            positive: POSITIVE_MARKERS.iter().filter(|m| lower.contains(*m)).count(),
            ..Default::default()
        };

        for (marker, severity) in NEGATIVE_MARKERS {
            let hits = lower.matches(marker).count();
            if hits > 0 {
                signals.negative += hits;
                findings.push(ReviewFinding {
                    finding_id: format!("output_{}", marker),
                    category: FindingCategory::Correctness,
                    severity: *severity,
                    title: format!("Output contains \"{}\"", marker),
                    description: "Task output indicates potential problems".to_string(),
                    location: None,
                    suggestion: Some("Review the reported error and address it".to_string()),
                    code_snippet: None,
                });
            }
        }

        for (marker, severity) in WARNING_MARKERS {
            let hits = lower.matches(marker).count();
            if hits > 0 {
                signals.warning += hits;
                findings.push(ReviewFinding {
                    finding_id: format!("output_{}", marker),
                    category: FindingCategory::Correctness,
                    severity: *severity,
                    title: format!("Output contains \"{}\"", marker),
                    description: "Task output carries warnings".to_string(),
                    location: None,
                    suggestion: None,
                    code_snippet: None,
                });
            }
        }

        for marker in INCOMPLETE_MARKERS {
            if lower.contains(marker) {
                findings.push(ReviewFinding {
                    finding_id: format!("incomplete_{}", marker.replace(' ', "_")),
                    category: FindingCategory::Completeness,
                    severity: Severity::Medium,
                    title: "Incomplete implementation marker".to_string(),
                    description: format!("Output mentions \"{}\"", marker),
                    location: None,
                    suggestion: Some("Finish the marked work before completion".to_string()),
                    code_snippet: None,
                });
            }
        }

        if let Some(expected) = expected {
            let ratio = similarity_ratio(output, expected);
            signals.similarity = Some(ratio);
            if ratio < 0.5 {
                findings.push(ReviewFinding {
                    finding_id: "output_mismatch".to_string(),
                    category: FindingCategory::Correctness,
                    severity: Severity::Medium,
                    title: "Output diverges from expectation".to_string(),
                    description: format!("Similarity to expected output is {:.2}", ratio),
                    location: None,
                    suggestion: None,
                    code_snippet: None,
                });
            }
        }

        (findings, signals)
    }
}

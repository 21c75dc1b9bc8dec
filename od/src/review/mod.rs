//! Review stage
//!
//! Evaluates a completed task's output and file changes, producing a
//! scored [`ReviewReport`] that gates the apply stage.

mod analyzer;
mod reviewer;

pub use analyzer::{FileAnalyzer, FileChange, OutputAnalyzer, OutputSignals};
pub use reviewer::{REVIEW_HIGH_THRESHOLD, Reviewer};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Weight used in the overall score
    pub fn weight(&self) -> u32 {
        match self {
            Self::Critical => 10,
            Self::High => 5,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Info => 0,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// What kind of problem a finding describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Security,
    CodeQuality,
    Correctness,
    Architecture,
    Documentation,
    Testing,
    Completeness,
}

/// One issue discovered by the reviewer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub finding_id: String,
    pub category: FindingCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
}

/// Aggregate review metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewMetrics {
    pub total_findings: usize,
    pub by_severity: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
    pub positive_markers: usize,
    pub negative_markers: usize,
    pub warning_markers: usize,
    /// Similarity to the expected output, when one was given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_similarity: Option<f64>,
}

/// The reviewer's verdict on one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub task_id: String,
    pub reviewer_id: String,
    /// In [0, 1]; 1.0 is flawless
    pub overall_score: f64,
    pub passed: bool,
    pub findings: Vec<ReviewFinding>,
    pub metrics: ReviewMetrics,
    pub recommendations: Vec<String>,
    pub follow_up_required: bool,
}

impl ReviewReport {
    /// Count findings of one severity
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

//! The reviewer: findings → score → verdict

use std::collections::HashMap;

use tracing::{debug, info};

use super::analyzer::{FileAnalyzer, FileChange, OutputAnalyzer};
use super::{FindingCategory, ReviewFinding, ReviewMetrics, ReviewReport, Severity};

/// Maximum high-severity findings that still pass review
pub const REVIEW_HIGH_THRESHOLD: usize = 3;

/// Reviews completed task output and produces a [`ReviewReport`]
pub struct Reviewer {
    reviewer_id: String,
    file_analyzer: FileAnalyzer,
    high_threshold: usize,
}

impl Reviewer {
    pub fn new(reviewer_id: impl Into<String>) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            file_analyzer: FileAnalyzer::new(),
            high_threshold: REVIEW_HIGH_THRESHOLD,
        }
    }

    pub fn with_high_threshold(mut self, threshold: usize) -> Self {
        self.high_threshold = threshold;
        self
    }

    /// Review a task's output text and produced files
    pub fn review(
        &self,
        task_id: &str,
        output: &str,
        files: &[FileChange],
        expected_output: Option<&str>,
    ) -> ReviewReport {
        let mut findings: Vec<ReviewFinding> = Vec::new();

        for file in files {
            findings.extend(self.file_analyzer.analyze(file));
        }

        let (output_findings, signals) = OutputAnalyzer::analyze(output, expected_output);
        findings.extend(output_findings);

        let mut by_severity: HashMap<String, usize> = HashMap::new();
        let mut by_category: HashMap<String, usize> = HashMap::new();
        for finding in &findings {
            *by_severity.entry(finding.severity.to_string()).or_default() += 1;
            *by_category.entry(format!("{:?}", finding.category)).or_default() += 1;
        }

        let critical = findings.iter().filter(|f| f.severity == Severity::Critical).count();
        let high = findings.iter().filter(|f| f.severity == Severity::High).count();

        let total_weight: u32 = findings.iter().map(|f| f.severity.weight()).sum();
        let overall_score = (1.0 - total_weight as f64 / 100.0).clamp(0.0, 1.0);

        let passed = critical == 0 && high <= self.high_threshold;
        let follow_up_required = critical > 0 || high > 2;

        let recommendations = self.recommendations(&findings);

        let metrics = ReviewMetrics {
            total_findings: findings.len(),
            by_severity,
            by_category,
            positive_markers: signals.positive,
            negative_markers: signals.negative,
            warning_markers: signals.warning,
            expected_similarity: signals.similarity,
        };

        info!(
            task_id,
            findings = findings.len(),
            score = format!("{:.2}", overall_score),
            passed,
            "Review complete"
        );
        debug!(task_id, ?metrics, "Review metrics");

        ReviewReport {
            task_id: task_id.to_string(),
            reviewer_id: self.reviewer_id.clone(),
            overall_score,
            passed,
            findings,
            metrics,
            recommendations,
            follow_up_required,
        }
    }

    fn recommendations(&self, findings: &[ReviewFinding]) -> Vec<String> {
        let mut recommendations = Vec::new();

        let security: Vec<&ReviewFinding> = findings
            .iter()
            .filter(|f| f.category == FindingCategory::Security)
            .collect();
        if !security.is_empty() {
            recommendations.push(format!(
                "Address {} security finding(s) before deployment",
                security.len()
            ));
            if security.iter().any(|f| f.severity == Severity::Critical) {
                recommendations.push("CRITICAL: security vulnerabilities require immediate action".to_string());
            }
        }

        let quality = findings
            .iter()
            .filter(|f| f.category == FindingCategory::CodeQuality)
            .count();
        if quality > 5 {
            recommendations.push("Consider refactoring to improve code quality".to_string());
        }
        if quality > 10 {
            recommendations.push("Code quality issues are impacting maintainability".to_string());
        }

        if findings.iter().any(|f| f.category == FindingCategory::Testing) {
            recommendations.push("Add tests to cover the flagged paths".to_string());
        }
        if findings.iter().any(|f| f.category == FindingCategory::Documentation) {
            recommendations.push("Improve documentation for better maintainability".to_string());
        }

        if recommendations.is_empty() && !findings.is_empty() {
            if findings
                .iter()
                .any(|f| matches!(f.severity, Severity::Critical | Severity::High))
            {
                recommendations.push("Address high-priority issues before marking the task complete".to_string());
            } else {
                recommendations.push("Consider addressing remaining issues in follow-up tasks".to_string());
            }
        }

        recommendations
    }
}

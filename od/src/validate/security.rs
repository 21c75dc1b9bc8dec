//! Security scanning of task text

use graphstore::Task;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{IssueCategory, IssueSeverity, ValidationIssue};

const SENSITIVE_PATTERNS: &[&str] = &[
    r"password|passwd|pwd",
    r"secret|token|\bkey\b",
    r"credential|auth",
    r"api[_-]?key",
    r"private[_-]?key",
];

const DESTRUCTIVE_KEYWORDS: &[&str] = &["delete", "remove", "drop", "truncate"];
const ELEVATED_KEYWORDS: &[&str] = &["sudo", "root", "admin"];
const OTHER_RISKY_KEYWORDS: &[&str] = &["deploy", "publish", "release", "execute", "eval", "exec"];

/// Overall plan risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Risk summary across the plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    /// (task id, matched pattern)
    pub sensitive_tasks: Vec<(u64, String)>,
    /// (task id, operation keyword)
    pub risky_operations: Vec<(u64, String)>,
    pub recommendations: Vec<String>,
}

/// Scans task titles and descriptions for security-relevant wording
pub struct SecurityValidator {
    sensitive: Vec<Regex>,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityValidator {
    pub fn new() -> Self {
        Self {
            sensitive: SENSITIVE_PATTERNS
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).expect("static pattern"))
                .collect(),
        }
    }

    /// Validate the plan's security posture
    pub fn validate(&self, tasks: &[Task]) -> (Vec<ValidationIssue>, RiskAssessment) {
        let mut issues = Vec::new();
        let mut assessment = RiskAssessment::default();

        for task in tasks {
            let text = format!("{} {}", task.title, task.description).to_lowercase();

            for (pattern, regex) in SENSITIVE_PATTERNS.iter().zip(&self.sensitive) {
                if regex.is_match(&text) {
                    assessment.sensitive_tasks.push((task.id, pattern.to_string()));
                    issues.push(ValidationIssue {
                        issue_id: format!("sensitive_data_{}", task.id),
                        category: IssueCategory::Security,
                        severity: IssueSeverity::Warning,
                        title: "Sensitive data handling".to_string(),
                        description: format!("Task {} may handle sensitive data ({})", task.id, pattern),
                        affected_tasks: vec![task.id],
                        suggestion: Some("Keep secrets out of logs and task text".to_string()),
                        blocking: false,
                    });
                }
            }

            for keyword in DESTRUCTIVE_KEYWORDS {
                if text.contains(keyword) {
                    assessment.risky_operations.push((task.id, keyword.to_string()));
                    if *keyword != "remove" {
                        issues.push(ValidationIssue {
                            issue_id: format!("destructive_op_{}_{}", task.id, keyword),
                            category: IssueCategory::Security,
                            severity: IssueSeverity::High,
                            title: "Destructive operation".to_string(),
                            description: format!("Task {} performs a destructive operation: {}", task.id, keyword),
                            affected_tasks: vec![task.id],
                            suggestion: Some("Ensure backups exist before destructive steps".to_string()),
                            blocking: false,
                        });
                    }
                }
            }

            for keyword in ELEVATED_KEYWORDS {
                if text.contains(keyword) {
                    assessment.risky_operations.push((task.id, keyword.to_string()));
                    issues.push(ValidationIssue {
                        issue_id: format!("elevated_privs_{}_{}", task.id, keyword),
                        category: IssueCategory::Security,
                        severity: IssueSeverity::High,
                        title: "Elevated privileges required".to_string(),
                        description: format!("Task {} requires elevated privileges ({})", task.id, keyword),
                        affected_tasks: vec![task.id],
                        suggestion: Some("Use the least privilege that still works".to_string()),
                        blocking: false,
                    });
                }
            }

            for keyword in OTHER_RISKY_KEYWORDS {
                if text.contains(keyword) {
                    assessment.risky_operations.push((task.id, keyword.to_string()));
                }
            }
        }

        assessment.risk_level = if assessment.risky_operations.len() > 3 {
            RiskLevel::High
        } else if assessment.sensitive_tasks.len() > 2 || assessment.risky_operations.len() > 1 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        if !assessment.sensitive_tasks.is_empty() {
            assessment
                .recommendations
                .push("Use environment variables for sensitive data".to_string());
            assessment
                .recommendations
                .push("Apply proper access controls".to_string());
        }
        if !assessment.risky_operations.is_empty() {
            assessment
                .recommendations
                .push("Create backups before destructive operations".to_string());
        }

        (issues, assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64, title: &str, description: &str) -> Task {
        Task::new(id, title, description)
    }

    fn validate(tasks: &[Task]) -> (Vec<ValidationIssue>, RiskAssessment) {
        SecurityValidator::new().validate(tasks)
    }

    #[test]
    fn test_benign_plan_is_low_risk() {
        let (issues, assessment) = validate(&[task(1, "Write parser", "implement the config parser")]);
        assert!(issues.is_empty());
        assert_eq!(assessment.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_sensitive_keywords_warn() {
        let (issues, assessment) = validate(&[task(1, "Rotate password", "update the stored password hash")]);
        assert!(issues.iter().any(|i| i.issue_id.starts_with("sensitive_data")));
        assert!(issues.iter().all(|i| !i.blocking));
        assert!(!assessment.sensitive_tasks.is_empty());
    }

    #[test]
    fn test_destructive_keywords_high_severity() {
        let (issues, _) = validate(&[task(1, "Drop staging table", "drop the old table")]);
        let destructive = issues.iter().find(|i| i.issue_id.starts_with("destructive_op")).unwrap();
        assert_eq!(destructive.severity, IssueSeverity::High);
        assert!(!destructive.blocking);
    }

    #[test]
    fn test_elevated_keywords_high_severity() {
        let (issues, _) = validate(&[task(1, "Install daemon", "requires sudo to install the unit")]);
        assert!(issues.iter().any(|i| i.issue_id.starts_with("elevated_privs")));
    }

    #[test]
    fn test_risk_level_escalates_with_operations() {
        let tasks = vec![
            task(1, "Delete old rows", "delete stale rows"),
            task(2, "Drop index", "drop the unused index"),
            task(3, "Truncate log", "truncate the audit log"),
            task(4, "Deploy service", "deploy to production"),
        ];
        let (_, assessment) = validate(&tasks);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert!(!assessment.recommendations.is_empty());
    }

    #[test]
    fn test_two_risky_ops_is_medium() {
        let tasks = vec![task(1, "Delete rows", "delete stale rows"), task(2, "Deploy", "deploy it")];
        let (_, assessment) = validate(&tasks);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
    }
}

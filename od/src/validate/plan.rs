//! The composite plan validator and its report

use std::collections::HashMap;

use graphstore::Task;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::dependency::DependencyValidator;
use super::resources::{ResourceRequirements, ResourceValidator};
use super::security::{RiskAssessment, SecurityValidator};
use super::{IssueCategory, IssueSeverity, ValidationIssue, ValidationOutcome};

/// Minimum meaningful description length (non-whitespace characters)
const MIN_DESCRIPTION_CHARS: usize = 10;

/// Plans past this size draw a warning
const MAX_PLAN_TASKS: usize = 50;

/// Descriptions past this length draw a warning
const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Aggregated counts over a validation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMetrics {
    pub total_tasks: usize,
    pub total_issues: usize,
    pub blocking_issues: usize,
    pub by_category: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}

/// The full validation report handed back to the submitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan_id: String,
    pub outcome: ValidationOutcome,
    pub issues: Vec<ValidationIssue>,
    pub metrics: PlanMetrics,
    pub recommendations: Vec<String>,
    pub estimated_duration_hours: f64,
    pub resource_requirements: ResourceRequirements,
    pub risk_assessment: RiskAssessment,
}

impl PlanReport {
    /// Whether execution may proceed
    pub fn can_execute(&self) -> bool {
        self.outcome.can_execute()
    }
}

/// Runs every sub-validator and derives the outcome
pub struct PlanValidator {
    resource_validator: ResourceValidator,
    security_validator: SecurityValidator,
    /// Warnings promote to errors in strict mode
    strict: bool,
}

impl PlanValidator {
    pub fn new(max_workers: usize, max_memory_gb: u64) -> Self {
        Self {
            resource_validator: ResourceValidator::new(max_workers, max_memory_gb),
            security_validator: SecurityValidator::new(),
            strict: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Validate a complete plan
    pub fn validate(&self, plan_id: &str, tasks: &[Task]) -> PlanReport {
        if tasks.is_empty() {
            let issue = ValidationIssue {
                issue_id: "empty_plan".to_string(),
                category: IssueCategory::Completeness,
                severity: IssueSeverity::Error,
                title: "Empty plan".to_string(),
                description: "No tasks provided in the plan".to_string(),
                affected_tasks: vec![],
                suggestion: None,
                blocking: true,
            };
            return PlanReport {
                plan_id: plan_id.to_string(),
                outcome: ValidationOutcome::Rejected,
                metrics: PlanMetrics {
                    total_issues: 1,
                    blocking_issues: 1,
                    ..Default::default()
                },
                issues: vec![issue],
                recommendations: vec!["Provide at least one task".to_string()],
                estimated_duration_hours: 0.0,
                resource_requirements: ResourceRequirements::default(),
                risk_assessment: RiskAssessment::default(),
            };
        }

        let mut issues = DependencyValidator::validate(tasks);

        let (resource_issues, resource_requirements) = self.resource_validator.validate(tasks);
        issues.extend(resource_issues);

        let (security_issues, risk_assessment) = self.security_validator.validate(tasks);
        issues.extend(security_issues);

        issues.extend(validate_completeness(tasks));
        issues.extend(validate_complexity(tasks));
        issues.extend(validate_consistency(tasks));

        let mut metrics = PlanMetrics {
            total_tasks: tasks.len(),
            total_issues: issues.len(),
            blocking_issues: issues.iter().filter(|i| i.blocking).count(),
            ..Default::default()
        };
        for issue in &issues {
            *metrics
                .by_category
                .entry(format!("{:?}", issue.category).to_lowercase())
                .or_default() += 1;
            *metrics.by_severity.entry(issue.severity.to_string()).or_default() += 1;
        }

        let errors = issues.iter().filter(|i| i.severity == IssueSeverity::Error).count();
        let warnings = issues
            .iter()
            .filter(|i| matches!(i.severity, IssueSeverity::Warning | IssueSeverity::High))
            .count();

        let mut outcome = if metrics.blocking_issues > 0 {
            ValidationOutcome::Rejected
        } else if errors > 0 {
            ValidationOutcome::RequiresModification
        } else if warnings > 0 {
            ValidationOutcome::ApprovedWithWarnings
        } else {
            ValidationOutcome::Approved
        };

        if self.strict && outcome == ValidationOutcome::ApprovedWithWarnings {
            outcome = ValidationOutcome::RequiresModification;
        }

        let recommendations = recommendations_for(outcome, &issues);

        info!(
            plan_id,
            tasks = tasks.len(),
            issues = issues.len(),
            %outcome,
            "Plan validated"
        );

        PlanReport {
            plan_id: plan_id.to_string(),
            outcome,
            issues,
            metrics,
            recommendations,
            estimated_duration_hours: resource_requirements.estimated_duration_hours,
            resource_requirements,
            risk_assessment,
        }
    }
}

fn validate_completeness(tasks: &[Task]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for task in tasks {
        let meaningful = task.description.chars().filter(|c| !c.is_whitespace()).count();
        if meaningful < MIN_DESCRIPTION_CHARS {
            issues.push(ValidationIssue {
                issue_id: format!("incomplete_desc_{}", task.id),
                category: IssueCategory::Completeness,
                severity: IssueSeverity::Warning,
                title: "Incomplete task description".to_string(),
                description: format!("Task {} has an insufficient description", task.id),
                affected_tasks: vec![task.id],
                suggestion: Some("Describe what needs to be done in detail".to_string()),
                blocking: false,
            });
        }
    }

    // Orphans only matter when the plan has structure to be orphaned from
    if tasks.len() > 1 {
        let depended_on: std::collections::HashSet<u64> =
            tasks.iter().flat_map(|t| t.dependencies.iter().copied()).collect();
        for task in tasks {
            if task.dependencies.is_empty() && !depended_on.contains(&task.id) {
                issues.push(ValidationIssue {
                    issue_id: format!("orphaned_task_{}", task.id),
                    category: IssueCategory::Completeness,
                    severity: IssueSeverity::Info,
                    title: "Isolated task".to_string(),
                    description: format!("Task {} has no dependencies and nothing depends on it", task.id),
                    affected_tasks: vec![task.id],
                    suggestion: Some("Check whether this task should connect to others".to_string()),
                    blocking: false,
                });
            }
        }
    }

    issues
}

fn validate_complexity(tasks: &[Task]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if tasks.len() > MAX_PLAN_TASKS {
        issues.push(ValidationIssue {
            issue_id: "plan_too_large".to_string(),
            category: IssueCategory::Complexity,
            severity: IssueSeverity::Warning,
            title: "Large plan".to_string(),
            description: format!("Plan contains {} tasks", tasks.len()),
            affected_tasks: vec![],
            suggestion: Some("Split into multiple smaller plans".to_string()),
            blocking: false,
        });
    }

    for task in tasks {
        if task.description.len() > MAX_DESCRIPTION_CHARS {
            issues.push(ValidationIssue {
                issue_id: format!("complex_task_{}", task.id),
                category: IssueCategory::Complexity,
                severity: IssueSeverity::Warning,
                title: "Complex task".to_string(),
                description: format!("Task {} has a very long description", task.id),
                affected_tasks: vec![task.id],
                suggestion: Some("Break into subtasks".to_string()),
                blocking: false,
            });
        }
    }

    issues
}

fn validate_consistency(tasks: &[Task]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let mut titles: HashMap<&str, u64> = HashMap::new();
    for task in tasks {
        if let Some(&other) = titles.get(task.title.as_str()) {
            issues.push(ValidationIssue {
                issue_id: format!("duplicate_title_{}", task.id),
                category: IssueCategory::Consistency,
                severity: IssueSeverity::Warning,
                title: "Duplicate task title".to_string(),
                description: format!("Task {} has the same title as task {}", task.id, other),
                affected_tasks: vec![task.id, other],
                suggestion: Some("Use a unique, descriptive title per task".to_string()),
                blocking: false,
            });
        } else {
            titles.insert(task.title.as_str(), task.id);
        }
    }

    // Task IDs are numeric here, so the naming-style check applies to tags
    let camel = Regex::new(r"^[a-z]+(?:[A-Z][a-z0-9]*)+$").expect("static pattern");
    let snake = Regex::new(r"^[a-z0-9]+(?:_[a-z0-9]+)+$").expect("static pattern");
    let kebab = Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)+$").expect("static pattern");

    let tags: Vec<&str> = tasks.iter().flat_map(|t| t.tags.iter().map(String::as_str)).collect();
    if !tags.is_empty() {
        let mut styles = [0usize; 3];
        for tag in &tags {
            if camel.is_match(tag) {
                styles[0] += 1;
            } else if snake.is_match(tag) {
                styles[1] += 1;
            } else if kebab.is_match(tag) {
                styles[2] += 1;
            }
        }
        let significant = styles.iter().filter(|&&n| n * 5 > tags.len()).count();
        if significant > 1 {
            issues.push(ValidationIssue {
                issue_id: "inconsistent_naming".to_string(),
                category: IssueCategory::Consistency,
                severity: IssueSeverity::Info,
                title: "Inconsistent naming style".to_string(),
                description: "Multiple naming conventions are used across task tags".to_string(),
                affected_tasks: vec![],
                suggestion: Some("Pick one naming convention".to_string()),
                blocking: false,
            });
        }
    }

    issues
}

fn recommendations_for(outcome: ValidationOutcome, issues: &[ValidationIssue]) -> Vec<String> {
    let mut recommendations = Vec::new();

    match outcome {
        ValidationOutcome::Rejected => {
            recommendations.push("Fix all blocking issues before executing this plan".to_string());
        }
        ValidationOutcome::RequiresModification => {
            recommendations.push("Resolve the reported errors, then resubmit".to_string());
        }
        ValidationOutcome::ApprovedWithWarnings => {
            recommendations.push("Review the warnings; execution can proceed".to_string());
        }
        ValidationOutcome::Approved => {}
    }

    if issues.iter().any(|i| i.category == IssueCategory::Security) {
        recommendations.push("Review the security findings with care".to_string());
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PlanValidator {
        PlanValidator::new(4, 16)
    }

    fn task(id: u64, title: &str, description: &str, deps: Vec<u64>) -> Task {
        let mut task = Task::new(id, title, description);
        task.dependencies = deps;
        task
    }

    #[test]
    fn test_empty_plan_rejected() {
        let report = validator().validate("p1", &[]);
        assert_eq!(report.outcome, ValidationOutcome::Rejected);
        assert_eq!(report.issues[0].issue_id, "empty_plan");
        assert!(!report.can_execute());
    }

    #[test]
    fn test_single_clean_task_approved() {
        let tasks = vec![task(1, "Build parser", "implement the configuration parser module", vec![])];
        let report = validator().validate("p1", &tasks);
        assert_eq!(report.outcome, ValidationOutcome::Approved);
        assert!(report.can_execute());
        assert!(report.estimated_duration_hours > 0.0);
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let tasks = vec![
            task(1, "A", "a longer description", vec![2]),
            task(2, "B", "b longer description", vec![3]),
            task(3, "C", "c longer description", vec![1]),
        ];
        let report = validator().validate("p1", &tasks);

        assert_eq!(report.outcome, ValidationOutcome::Rejected);
        let circular: Vec<&ValidationIssue> = report
            .issues
            .iter()
            .filter(|i| i.issue_id.starts_with("circular_dep"))
            .collect();
        assert_eq!(circular.len(), 1);
        assert!(circular[0].blocking);
        assert_eq!(circular[0].affected_tasks.len(), 4);
    }

    #[test]
    fn test_short_description_warns() {
        let tasks = vec![task(1, "Fix", "short", vec![])];
        let report = validator().validate("p1", &tasks);

        assert!(report.issues.iter().any(|i| i.issue_id.starts_with("incomplete_desc")));
        assert_eq!(report.outcome, ValidationOutcome::ApprovedWithWarnings);
        assert!(report.can_execute());
    }

    #[test]
    fn test_strict_mode_promotes_warnings() {
        let tasks = vec![task(1, "Fix", "short", vec![])];
        let report = PlanValidator::new(4, 16).strict().validate("p1", &tasks);
        assert_eq!(report.outcome, ValidationOutcome::RequiresModification);
        assert!(!report.can_execute());
    }

    #[test]
    fn test_orphan_info_in_multi_task_plan() {
        let tasks = vec![
            task(1, "Base task", "a longer description here", vec![]),
            task(2, "Child task", "another longer description", vec![1]),
            task(3, "Orphan task", "isolated piece of work here", vec![]),
        ];
        let report = validator().validate("p1", &tasks);

        let orphans: Vec<&ValidationIssue> = report
            .issues
            .iter()
            .filter(|i| i.issue_id.starts_with("orphaned_task"))
            .collect();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].affected_tasks, vec![3]);
        assert_eq!(orphans[0].severity, IssueSeverity::Info);
        // Info alone does not block approval
        assert_eq!(report.outcome, ValidationOutcome::Approved);
    }

    #[test]
    fn test_large_plan_warns() {
        let tasks: Vec<Task> = (1..=51)
            .map(|id| {
                let deps = if id == 1 { vec![] } else { vec![id - 1] };
                // Keep chains shallow by depending only on the previous task
                let deps = if id % 5 == 1 { vec![] } else { deps };
                task(id, &format!("Task number {}", id), "a longer description here", deps)
            })
            .collect();
        let report = validator().validate("p1", &tasks);
        assert!(report.issues.iter().any(|i| i.issue_id == "plan_too_large"));
    }

    #[test]
    fn test_long_description_warns() {
        let long = "x".repeat(1500);
        let tasks = vec![task(1, "Big one", &long, vec![])];
        let report = validator().validate("p1", &tasks);
        assert!(report.issues.iter().any(|i| i.issue_id.starts_with("complex_task")));
    }

    #[test]
    fn test_duplicate_titles_warn() {
        let tasks = vec![
            task(1, "Same title", "a longer description here", vec![]),
            task(2, "Same title", "another longer description", vec![1]),
        ];
        let report = validator().validate("p1", &tasks);
        assert!(report.issues.iter().any(|i| i.issue_id.starts_with("duplicate_title")));
    }

    #[test]
    fn test_security_issues_reach_report() {
        let tasks = vec![task(1, "Drop table", "drop the legacy billing table", vec![])];
        let report = validator().validate("p1", &tasks);

        assert!(report.issues.iter().any(|i| i.category == IssueCategory::Security));
        assert!(!report.risk_assessment.risky_operations.is_empty());
        // High severity alone does not reject
        assert_eq!(report.outcome, ValidationOutcome::ApprovedWithWarnings);
    }

    #[test]
    fn test_metrics_counts() {
        let tasks = vec![task(1, "Fix", "short", vec![42])];
        let report = validator().validate("p1", &tasks);

        assert_eq!(report.metrics.total_tasks, 1);
        assert!(report.metrics.blocking_issues >= 1);
        assert_eq!(report.metrics.total_issues, report.issues.len());
        assert!(report.metrics.by_severity.contains_key("error"));
    }
}

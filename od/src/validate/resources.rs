//! Resource feasibility validation

use std::collections::{HashMap, HashSet};

use graphstore::Task;
use serde::{Deserialize, Serialize};

use crate::allocate::RequirementsAnalyzer;

use super::{IssueCategory, IssueSeverity, ValidationIssue};

/// Estimated resource envelope for a plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Workers the plan could keep busy at its widest point
    pub estimated_workers: usize,
    /// Peak single-task memory estimate
    pub estimated_memory_gb: u64,
    pub estimated_duration_hours: f64,
    pub resource_intensive_tasks: Vec<u64>,
}

/// Validates a plan against available workers and memory
pub struct ResourceValidator {
    max_workers: usize,
    max_memory_gb: u64,
    analyzer: RequirementsAnalyzer,
}

impl ResourceValidator {
    pub fn new(max_workers: usize, max_memory_gb: u64) -> Self {
        Self {
            max_workers,
            max_memory_gb,
            analyzer: RequirementsAnalyzer::new(),
        }
    }

    /// Validate resource demands and return the estimated envelope
    pub fn validate(&self, tasks: &[Task]) -> (Vec<ValidationIssue>, ResourceRequirements) {
        let mut issues = Vec::new();
        let mut requirements = ResourceRequirements {
            estimated_workers: Self::max_dag_width(tasks).min(self.max_workers),
            ..Default::default()
        };

        for task in tasks {
            let analyzed = self.analyzer.analyze(&task.title, &task.description);
            let memory = analyzed.estimated_memory_gb();

            if memory > 1 {
                requirements.resource_intensive_tasks.push(task.id);
                if memory > self.max_memory_gb / 2 {
                    issues.push(ValidationIssue {
                        issue_id: format!("high_memory_{}", task.id),
                        category: IssueCategory::Resources,
                        severity: IssueSeverity::Warning,
                        title: "High memory requirement".to_string(),
                        description: format!("Task {} may require {}GB of memory", task.id, memory),
                        affected_tasks: vec![task.id],
                        suggestion: Some("Break into smaller tasks or reduce the working set".to_string()),
                        blocking: false,
                    });
                }
            }

            requirements.estimated_memory_gb = requirements.estimated_memory_gb.max(memory);
            requirements.estimated_duration_hours += analyzed.estimated_duration as f64 / 60.0;
        }

        let width = Self::max_dag_width(tasks);
        if width > self.max_workers * 2 {
            issues.push(ValidationIssue {
                issue_id: "insufficient_workers".to_string(),
                category: IssueCategory::Resources,
                severity: IssueSeverity::Warning,
                title: "High parallelism required".to_string(),
                description: format!(
                    "Plan could use {} workers but only {} are available",
                    width, self.max_workers
                ),
                affected_tasks: vec![],
                suggestion: Some("Tasks will queue; consider more workers".to_string()),
                blocking: false,
            });
        }

        if requirements.estimated_memory_gb > self.max_memory_gb {
            issues.push(ValidationIssue {
                issue_id: "insufficient_memory".to_string(),
                category: IssueCategory::Resources,
                severity: IssueSeverity::Error,
                title: "Insufficient memory".to_string(),
                description: format!(
                    "Plan needs {}GB but only {}GB is available",
                    requirements.estimated_memory_gb, self.max_memory_gb
                ),
                affected_tasks: vec![],
                suggestion: Some("Reduce memory requirements or raise the limit".to_string()),
                blocking: true,
            });
        }

        (issues, requirements)
    }

    /// The widest level of the dependency DAG: how many tasks could run
    /// at once
    pub fn max_dag_width(tasks: &[Task]) -> usize {
        if tasks.is_empty() {
            return 0;
        }

        let mut levels: HashMap<u64, usize> = HashMap::new();

        fn level_of(
            id: u64,
            tasks: &[Task],
            levels: &mut HashMap<u64, usize>,
            visiting: &mut HashSet<u64>,
        ) -> usize {
            if let Some(&level) = levels.get(&id) {
                return level;
            }
            if visiting.contains(&id) {
                return 0;
            }
            visiting.insert(id);

            let level = tasks
                .iter()
                .find(|t| t.id == id)
                .map(|task| {
                    task.dependencies
                        .iter()
                        .filter(|dep| tasks.iter().any(|t| t.id == **dep))
                        .map(|dep| 1 + level_of(*dep, tasks, levels, visiting))
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);

            visiting.remove(&id);
            levels.insert(id, level);
            level
        }

        for task in tasks {
            level_of(task.id, tasks, &mut levels, &mut HashSet::new());
        }

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for level in levels.values() {
            *counts.entry(*level).or_insert(0) += 1;
        }
        counts.values().copied().max().unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64, title: &str, description: &str, deps: Vec<u64>) -> Task {
        let mut task = Task::new(id, title, description);
        task.dependencies = deps;
        task
    }

    #[test]
    fn test_dag_width_linear_chain() {
        let tasks = vec![
            task(1, "a", "d", vec![]),
            task(2, "b", "d", vec![1]),
            task(3, "c", "d", vec![2]),
        ];
        assert_eq!(ResourceValidator::max_dag_width(&tasks), 1);
    }

    #[test]
    fn test_dag_width_fan_out() {
        let tasks = vec![
            task(1, "root", "d", vec![]),
            task(2, "b", "d", vec![1]),
            task(3, "c", "d", vec![1]),
            task(4, "e", "d", vec![1]),
        ];
        assert_eq!(ResourceValidator::max_dag_width(&tasks), 3);
    }

    #[test]
    fn test_parallelism_warning() {
        let validator = ResourceValidator::new(2, 16);
        // Five independent tasks against two workers
        let tasks: Vec<Task> = (1..=5)
            .map(|id| task(id, "work", "plain description text", vec![]))
            .collect();

        let (issues, requirements) = validator.validate(&tasks);
        assert!(issues.iter().any(|i| i.issue_id == "insufficient_workers"));
        assert_eq!(requirements.estimated_workers, 2);
    }

    #[test]
    fn test_memory_blocking_error() {
        let validator = ResourceValidator::new(4, 2);
        let tasks = vec![task(
            1,
            "Process dataset",
            "load a large data cache buffer into memory",
            vec![],
        )];

        let (issues, requirements) = validator.validate(&tasks);
        assert_eq!(requirements.estimated_memory_gb, 4);
        let memory_issue = issues.iter().find(|i| i.issue_id == "insufficient_memory").unwrap();
        assert!(memory_issue.blocking);
        assert_eq!(memory_issue.severity, IssueSeverity::Error);
    }

    #[test]
    fn test_small_plan_is_fine() {
        let validator = ResourceValidator::new(4, 16);
        let tasks = vec![task(1, "Small job", "plain description text", vec![])];

        let (issues, requirements) = validator.validate(&tasks);
        assert!(issues.is_empty());
        assert_eq!(requirements.estimated_memory_gb, 1);
        assert!(requirements.estimated_duration_hours > 0.0);
    }
}

//! Dependency graph validation

use std::collections::{HashMap, HashSet};

use graphstore::Task;

use super::{IssueCategory, IssueSeverity, ValidationIssue};

/// Warn past this dependency-chain depth
const MAX_DEPENDENCY_DEPTH: usize = 5;

/// Checks the dependency graph for missing references, cycles, and
/// excessive depth
pub struct DependencyValidator;

impl DependencyValidator {
    /// Validate every task's dependencies
    pub fn validate(tasks: &[Task]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let task_ids: HashSet<u64> = tasks.iter().map(|t| t.id).collect();

        for task in tasks {
            for dep in &task.dependencies {
                if !task_ids.contains(dep) {
                    issues.push(ValidationIssue {
                        issue_id: format!("missing_dep_{}_{}", task.id, dep),
                        category: IssueCategory::Dependencies,
                        severity: IssueSeverity::Error,
                        title: "Missing dependency".to_string(),
                        description: format!("Task {} depends on {} which is not in the plan", task.id, dep),
                        affected_tasks: vec![task.id],
                        suggestion: Some("Add the missing task or remove the dependency".to_string()),
                        blocking: true,
                    });
                }
            }
        }

        for cycle in Self::find_cycles(tasks) {
            let path = cycle
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(" -> ");
            issues.push(ValidationIssue {
                issue_id: format!(
                    "circular_dep_{}",
                    cycle.iter().map(u64::to_string).collect::<Vec<_>>().join("_")
                ),
                category: IssueCategory::Dependencies,
                severity: IssueSeverity::Error,
                title: "Circular dependency detected".to_string(),
                description: format!("Tasks form a circular dependency: {}", path),
                affected_tasks: cycle,
                suggestion: Some("Restructure tasks to remove the circular dependency".to_string()),
                blocking: true,
            });
        }

        for task in tasks {
            let depth = Self::dependency_depth(task, tasks, &mut HashSet::new());
            if depth > MAX_DEPENDENCY_DEPTH {
                issues.push(ValidationIssue {
                    issue_id: format!("deep_deps_{}", task.id),
                    category: IssueCategory::Dependencies,
                    severity: IssueSeverity::Warning,
                    title: "Deep dependency chain".to_string(),
                    description: format!("Task {} has a dependency depth of {}", task.id, depth),
                    affected_tasks: vec![task.id],
                    suggestion: Some("Consider flattening the dependency structure".to_string()),
                    blocking: false,
                });
            }
        }

        issues
    }

    /// DFS cycle detection. Each reported cycle carries its full path,
    /// closing on the entry node (e.g. `[1, 2, 3, 1]`).
    pub fn find_cycles(tasks: &[Task]) -> Vec<Vec<u64>> {
        let graph: HashMap<u64, &[u64]> = tasks.iter().map(|t| (t.id, t.dependencies.as_slice())).collect();

        let mut visited = HashSet::new();
        let mut cycles = Vec::new();

        fn dfs(
            node: u64,
            graph: &HashMap<u64, &[u64]>,
            visited: &mut HashSet<u64>,
            stack: &mut Vec<u64>,
            on_stack: &mut HashSet<u64>,
            cycles: &mut Vec<Vec<u64>>,
        ) -> bool {
            visited.insert(node);
            on_stack.insert(node);
            stack.push(node);

            for &neighbor in graph.get(&node).copied().unwrap_or(&[]) {
                if !visited.contains(&neighbor) {
                    if dfs(neighbor, graph, visited, stack, on_stack, cycles) {
                        return true;
                    }
                } else if on_stack.contains(&neighbor) {
                    let start = stack.iter().position(|&n| n == neighbor).unwrap_or(0);
                    let mut cycle: Vec<u64> = stack[start..].to_vec();
                    cycle.push(neighbor);
                    cycles.push(cycle);
                    return true;
                }
            }

            stack.pop();
            on_stack.remove(&node);
            false
        }

        for task in tasks {
            if !visited.contains(&task.id) {
                let mut stack = Vec::new();
                let mut on_stack = HashSet::new();
                dfs(task.id, &graph, &mut visited, &mut stack, &mut on_stack, &mut cycles);
            }
        }

        cycles
    }

    fn dependency_depth(task: &Task, tasks: &[Task], visiting: &mut HashSet<u64>) -> usize {
        if visiting.contains(&task.id) {
            return 0;
        }
        visiting.insert(task.id);

        let depth = task
            .dependencies
            .iter()
            .filter_map(|dep| tasks.iter().find(|t| t.id == *dep))
            .map(|dep| 1 + Self::dependency_depth(dep, tasks, visiting))
            .max()
            .unwrap_or(0);

        visiting.remove(&task.id);
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64, deps: Vec<u64>) -> Task {
        let mut task = Task::new(id, format!("Task {}", id), "a task description here");
        task.dependencies = deps;
        task
    }

    #[test]
    fn test_valid_graph_has_no_issues() {
        let tasks = vec![task(1, vec![]), task(2, vec![1]), task(3, vec![1, 2])];
        assert!(DependencyValidator::validate(&tasks).is_empty());
    }

    #[test]
    fn test_missing_dependency_blocks() {
        let tasks = vec![task(1, vec![42])];
        let issues = DependencyValidator::validate(&tasks);

        assert_eq!(issues.len(), 1);
        assert!(issues[0].blocking);
        assert!(issues[0].issue_id.starts_with("missing_dep_"));
    }

    #[test]
    fn test_two_cycle_detected_with_path() {
        let tasks = vec![task(1, vec![2]), task(2, vec![1])];
        let cycles = DependencyValidator::find_cycles(&tasks);

        assert_eq!(cycles.len(), 1);
        // Full path, closed on the entry node
        assert_eq!(cycles[0].first(), cycles[0].last());
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn test_three_cycle_issue() {
        let tasks = vec![task(1, vec![2]), task(2, vec![3]), task(3, vec![1])];
        let issues = DependencyValidator::validate(&tasks);

        let circular: Vec<&ValidationIssue> = issues
            .iter()
            .filter(|i| i.issue_id.starts_with("circular_dep"))
            .collect();
        assert_eq!(circular.len(), 1);
        assert!(circular[0].blocking);
        assert_eq!(circular[0].affected_tasks.len(), 4);
        assert_eq!(circular[0].affected_tasks.first(), circular[0].affected_tasks.last());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let tasks = vec![task(1, vec![1])];
        let cycles = DependencyValidator::find_cycles(&tasks);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], vec![1, 1]);
    }

    #[test]
    fn test_deep_chain_warns() {
        // 1 <- 2 <- 3 <- 4 <- 5 <- 6 <- 7: task 7 sits at depth 6
        let tasks: Vec<Task> = (1..=7)
            .map(|id| task(id, if id == 1 { vec![] } else { vec![id - 1] }))
            .collect();
        let issues = DependencyValidator::validate(&tasks);

        let deep: Vec<&ValidationIssue> = issues.iter().filter(|i| i.issue_id.starts_with("deep_deps")).collect();
        assert_eq!(deep.len(), 1);
        assert_eq!(deep[0].affected_tasks, vec![7]);
        assert!(!deep[0].blocking);
    }
}

//! Worker profiles
//!
//! Stable attributes (capabilities, complexity ceiling, concurrency limit)
//! plus the dynamic metrics the allocator scores against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What a worker can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Code,
    Research,
    Documentation,
    Testing,
    Refactoring,
    Debugging,
    Design,
    Review,
}

impl Capability {
    /// All capabilities, for iteration
    pub const ALL: [Capability; 8] = [
        Capability::Code,
        Capability::Research,
        Capability::Documentation,
        Capability::Testing,
        Capability::Refactoring,
        Capability::Debugging,
        Capability::Design,
        Capability::Review,
    ];
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Code => "code",
            Self::Research => "research",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Refactoring => "refactoring",
            Self::Debugging => "debugging",
            Self::Design => "design",
            Self::Review => "review",
        };
        write!(f, "{}", s)
    }
}

/// Task complexity tier; higher subsumes lower for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trivial => "trivial",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Worker runtime state, owned by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Idle,
    Busy,
    Starting,
    Stopping,
    Failed,
    Offline,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
            Self::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

/// A worker as seen by the registry and allocator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub worker_id: String,
    pub model_name: String,
    pub capabilities: HashSet<Capability>,
    pub max_complexity: Complexity,
    pub max_concurrent_tasks: usize,

    /// Historical performance multiplier, clamped to [0.5, 2.0]
    pub performance_score: f64,
    /// active / max_concurrent
    pub current_load: f64,
    pub current_tasks: Vec<String>,
    pub specialization_boost: HashMap<Capability, f64>,
    pub last_assigned: Option<DateTime<Utc>>,
    pub total_tasks_completed: u64,
    /// EMA over completions, minutes
    pub average_task_duration: f64,
    /// Rolling over the last 10 outcomes
    pub success_rate: f64,
    pub state: WorkerState,
}

impl WorkerProfile {
    pub fn new(
        worker_id: impl Into<String>,
        model_name: impl Into<String>,
        capabilities: HashSet<Capability>,
        max_complexity: Complexity,
        max_concurrent_tasks: usize,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            model_name: model_name.into(),
            capabilities,
            max_complexity,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            performance_score: 1.0,
            current_load: 0.0,
            current_tasks: Vec::new(),
            specialization_boost: HashMap::new(),
            last_assigned: None,
            total_tasks_completed: 0,
            average_task_duration: 30.0,
            success_rate: 1.0,
            state: WorkerState::Idle,
        }
    }

    /// Whether the worker can take one more task
    pub fn is_available(&self) -> bool {
        self.current_tasks.len() < self.max_concurrent_tasks
            && matches!(self.state, WorkerState::Idle | WorkerState::Busy)
    }

    /// Recompute `current_load` from the active task list
    pub fn refresh_load(&mut self) {
        self.current_load = self.current_tasks.len() as f64 / self.max_concurrent_tasks as f64;
    }
}

/// Helper to build a capability set from a slice
pub fn capabilities(caps: &[Capability]) -> HashSet<Capability> {
    caps.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_ordering() {
        assert!(Complexity::Critical > Complexity::High);
        assert!(Complexity::High > Complexity::Medium);
        assert!(Complexity::Medium > Complexity::Low);
        assert!(Complexity::Low > Complexity::Trivial);
    }

    #[test]
    fn test_availability_by_load() {
        let mut profile = WorkerProfile::new("w1", "model-a", capabilities(&[Capability::Code]), Complexity::High, 2);
        assert!(profile.is_available());

        profile.current_tasks.push("t1".to_string());
        assert!(profile.is_available());

        profile.current_tasks.push("t2".to_string());
        assert!(!profile.is_available());
    }

    #[test]
    fn test_failed_worker_not_available() {
        let mut profile = WorkerProfile::new("w1", "model-a", capabilities(&[Capability::Code]), Complexity::High, 2);
        profile.state = WorkerState::Failed;
        assert!(!profile.is_available());

        profile.state = WorkerState::Offline;
        assert!(!profile.is_available());
    }

    #[test]
    fn test_refresh_load() {
        let mut profile = WorkerProfile::new("w1", "m", capabilities(&[Capability::Code]), Complexity::High, 4);
        profile.current_tasks = vec!["a".into(), "b".into()];
        profile.refresh_load();
        assert!((profile.current_load - 0.5).abs() < f64::EPSILON);
    }
}

//! Task domain types
//!
//! A task graph node with status, priority, dependencies, and subtasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Waiting to be picked up
    #[default]
    Pending,
    /// Currently being worked
    InProgress,
    /// Worker output awaiting review
    Review,
    /// Completed and accepted
    Done,
    /// Unrecoverable failure
    Failed,
    /// Postponed by the user
    Deferred,
    /// Soft-deleted
    Cancelled,
}

impl TaskStatus {
    /// Parse a status from its wire form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in-progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "deferred" => Some(Self::Deferred),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Review => write!(f, "review"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Deferred => write!(f, "deferred"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A subtask nested under a parent task
///
/// Addressed as `<parent>.<index>`. Dependencies reference sibling indices,
/// not global task IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    /// Index within the parent (1-based)
    pub id: u64,

    pub title: String,

    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// Sibling indices that must be done first
    #[serde(default)]
    pub dependencies: Vec<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// A node in the task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within a store; immutable
    pub id: u64,

    pub title: String,

    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,

    /// IDs of tasks that must be done before this one
    #[serde(default)]
    pub dependencies: Vec<u64>,

    #[serde(default)]
    pub priority: TaskPriority,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,

    #[serde(default)]
    pub subtasks: Vec<Subtask>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Task {
    /// Create a new pending task
    pub fn new(id: u64, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            priority: TaskPriority::Medium,
            details: None,
            test_strategy: None,
            subtasks: Vec::new(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        }
    }

    /// Update the status, touching `updated_at`
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Check if the task is in a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Check if the task is eligible for scheduling (before dependency checks)
    pub fn is_schedulable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress)
    }

    /// Subtask progress as (done, total)
    pub fn subtask_progress(&self) -> (usize, usize) {
        let done = self.subtasks.iter().filter(|s| s.status == TaskStatus::Done).count();
        (done, self.subtasks.len())
    }
}

/// A task reference: either a top-level task or a `<parent>.<index>` subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRef {
    Task(u64),
    Subtask { parent: u64, index: u64 },
}

impl TaskRef {
    /// Parse `"7"` or `"7.2"`
    pub fn parse(s: &str) -> Option<Self> {
        match s.split_once('.') {
            Some((parent, index)) => Some(Self::Subtask {
                parent: parent.parse().ok()?,
                index: index.parse().ok()?,
            }),
            None => Some(Self::Task(s.parse().ok()?)),
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(id) => write!(f, "{}", id),
            Self::Subtask { parent, index } => write!(f, "{}.{}", parent, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Review,
            TaskStatus::Done,
            TaskStatus::Failed,
            TaskStatus::Deferred,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_status_serde_wire_form() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn test_task_ref_parse() {
        assert_eq!(TaskRef::parse("7"), Some(TaskRef::Task(7)));
        assert_eq!(TaskRef::parse("7.2"), Some(TaskRef::Subtask { parent: 7, index: 2 }));
        assert_eq!(TaskRef::parse("x"), None);
        assert_eq!(TaskRef::parse("7.x"), None);
    }

    #[test]
    fn test_subtask_progress() {
        let mut task = Task::new(1, "Parent", "With subtasks");
        assert_eq!(task.subtask_progress(), (0, 0));

        let now = Utc::now();
        for (i, status) in [TaskStatus::Done, TaskStatus::Pending].iter().enumerate() {
            task.subtasks.push(Subtask {
                id: i as u64 + 1,
                title: format!("sub {}", i + 1),
                description: String::new(),
                status: *status,
                dependencies: vec![],
                details: None,
                created_at: now,
                updated_at: now,
            });
        }

        assert_eq!(task.subtask_progress(), (1, 2));
    }

    #[test]
    fn test_task_serde_camel_case() {
        let task = Task::new(1, "Title", "Description");
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"updatedAt\""));
        // Optional fields are omitted when unset
        assert!(!json.contains("testStrategy"));
    }
}

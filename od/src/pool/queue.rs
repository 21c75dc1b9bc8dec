//! Pool task queue types

use std::time::Instant;

use tokio::sync::oneshot;

use crate::allocate::TaskRequirements;

/// A task waiting for a worker
pub struct QueuedTask {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub requirements: Option<TaskRequirements>,
    /// 1-10, higher first
    pub priority: u8,
    pub enqueued_at: Instant,
    /// Present when a caller is blocked on the assignment
    pub waiter: Option<oneshot::Sender<String>>,
}

impl QueuedTask {
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        priority: u8,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: description.into(),
            requirements: None,
            priority,
            enqueued_at: Instant::now(),
            waiter: None,
        }
    }
}

impl Eq for QueuedTask {}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task_id == other.task_id
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Higher priority first, then earlier enqueue
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask")
            .field("task_id", &self.task_id)
            .field("priority", &self.priority)
            .field("has_waiter", &self.waiter.is_some())
            .finish()
    }
}

/// Outcome of a non-blocking assignment attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    /// A worker took the task immediately
    Assigned(String),
    /// No worker was available; queued at this position (1-based)
    Queued(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn test_priority_ordering() {
        let low = QueuedTask::new("low", "t", "d", 2);
        std::thread::sleep(std::time::Duration::from_millis(1));
        let high = QueuedTask::new("high", "t", "d", 8);

        assert!(high > low);
    }

    #[test]
    fn test_fifo_within_priority() {
        let first = QueuedTask::new("first", "t", "d", 5);
        std::thread::sleep(std::time::Duration::from_millis(1));
        let second = QueuedTask::new("second", "t", "d", 5);

        // Earlier submission wins the heap
        assert!(first > second);
    }

    #[test]
    fn test_heap_pop_order() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedTask::new("a", "t", "d", 3));
        heap.push(QueuedTask::new("b", "t", "d", 9));
        heap.push(QueuedTask::new("c", "t", "d", 5));

        assert_eq!(heap.pop().unwrap().task_id, "b");
        assert_eq!(heap.pop().unwrap().task_id, "c");
        assert_eq!(heap.pop().unwrap().task_id, "a");
    }
}

//! Per-task process lifecycle
//!
//! The worker/review/apply trajectory of a single task, persisted on every
//! transition so a crashed orchestrator can resume where it stopped. State
//! changes are broadcast for observers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use graphstore::WorkerResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::review::ReviewReport;

/// Default retry limit per task
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default age after which a non-terminal context counts as stuck
pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// States in the worker-reviewer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Pending,
    WorkerAssigned,
    WorkerExecuting,
    WorkerCompleted,
    ReviewPending,
    ReviewInProgress,
    ReviewCompleted,
    ApplyingChanges,
    Completed,
    Failed,
    RetryPending,
}

impl ProcessState {
    /// The transitions permitted from this state
    pub fn allowed_transitions(&self) -> &'static [ProcessState] {
        use ProcessState::*;
        match self {
            Pending => &[WorkerAssigned, Failed],
            WorkerAssigned => &[WorkerExecuting, Failed],
            WorkerExecuting => &[WorkerCompleted, Failed],
            WorkerCompleted => &[ReviewPending, RetryPending],
            ReviewPending => &[ReviewInProgress, Failed],
            ReviewInProgress => &[ReviewCompleted, Failed],
            ReviewCompleted => &[ApplyingChanges, RetryPending],
            ApplyingChanges => &[Completed, Failed],
            Failed => &[RetryPending],
            RetryPending => &[Pending],
            Completed => &[],
        }
    }

    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Completed and Failed stop the machine (Failed only once retries are
    /// exhausted; the retry rule moves it on otherwise)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Completed | ProcessState::Failed)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::WorkerAssigned => "worker_assigned",
            Self::WorkerExecuting => "worker_executing",
            Self::WorkerCompleted => "worker_completed",
            Self::ReviewPending => "review_pending",
            Self::ReviewInProgress => "review_in_progress",
            Self::ReviewCompleted => "review_completed",
            Self::ApplyingChanges => "applying_changes",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RetryPending => "retry_pending",
        };
        write!(f, "{}", s)
    }
}

/// Per-task lifecycle context, persisted across restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleContext {
    pub task_id: String,
    pub state: ProcessState,
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_result: Option<WorkerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewReport>,
    pub retry_count: u32,
    pub error_history: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LifecycleContext {
    fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            state: ProcessState::Pending,
            worker_id: None,
            worker_result: None,
            review: None,
            retry_count: 0,
            error_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Task not tracked: {0}")]
    UnknownTask(String),

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: ProcessState,
        to: ProcessState,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Broadcast on every state change
#[derive(Debug, Clone)]
pub struct StateChange {
    pub task_id: String,
    pub from: ProcessState,
    pub to: ProcessState,
    pub timestamp: DateTime<Utc>,
}

/// Owns every task's lifecycle context and the transition rules
pub struct LifecycleManager {
    path: PathBuf,
    contexts: HashMap<String, LifecycleContext>,
    events: broadcast::Sender<StateChange>,
    max_retries: u32,
    stuck_timeout: Duration,
}

impl LifecycleManager {
    /// Open the manager, loading any persisted contexts
    pub fn open(path: impl AsRef<Path>) -> LifecycleResult<Self> {
        let path = path.as_ref().to_path_buf();
        let contexts = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        let (events, _) = broadcast::channel(256);
        debug!(path = %path.display(), contexts = contexts.len(), "Opened lifecycle manager");
        Ok(Self {
            path,
            contexts,
            events,
            max_retries: DEFAULT_MAX_RETRIES,
            stuck_timeout: DEFAULT_STUCK_TIMEOUT,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_stuck_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_timeout = timeout;
        self
    }

    /// Subscribe to state-change broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Start tracking a task in `pending`. Re-initializing an already
    /// tracked task is a no-op.
    pub fn init_task(&mut self, task_id: &str) -> LifecycleResult<()> {
        if self.contexts.contains_key(task_id) {
            return Ok(());
        }
        info!(task_id, "Initialized lifecycle");
        self.contexts.insert(task_id.to_string(), LifecycleContext::new(task_id));
        self.save()
    }

    /// Transition a task, enforcing the allowed-transitions table
    pub fn transition(&mut self, task_id: &str, to: ProcessState) -> LifecycleResult<()> {
        let context = self
            .contexts
            .get_mut(task_id)
            .ok_or_else(|| LifecycleError::UnknownTask(task_id.to_string()))?;

        let from = context.state;
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to,
            });
        }

        context.state = to;
        context.updated_at = Utc::now();
        self.save()?;

        info!(task_id, %from, %to, "Lifecycle transition");
        let _ = self.events.send(StateChange {
            task_id: task_id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record the assigned worker and move to `worker_assigned`
    pub fn assign_worker(&mut self, task_id: &str, worker_id: &str) -> LifecycleResult<()> {
        let context = self
            .contexts
            .get_mut(task_id)
            .ok_or_else(|| LifecycleError::UnknownTask(task_id.to_string()))?;
        context.worker_id = Some(worker_id.to_string());
        self.transition(task_id, ProcessState::WorkerAssigned)
    }

    /// Attach the worker's result to the context
    pub fn attach_result(&mut self, task_id: &str, result: WorkerResult) -> LifecycleResult<()> {
        let context = self
            .contexts
            .get_mut(task_id)
            .ok_or_else(|| LifecycleError::UnknownTask(task_id.to_string()))?;
        context.worker_result = Some(result);
        context.updated_at = Utc::now();
        self.save()
    }

    /// Attach the review report to the context
    pub fn attach_review(&mut self, task_id: &str, review: ReviewReport) -> LifecycleResult<()> {
        let context = self
            .contexts
            .get_mut(task_id)
            .ok_or_else(|| LifecycleError::UnknownTask(task_id.to_string()))?;
        context.review = Some(review);
        context.updated_at = Utc::now();
        self.save()
    }

    /// Handle a failure with the retry policy: if retries remain the task
    /// lands back in `pending` with the count incremented, otherwise it
    /// stays `failed`. Returns the resulting state.
    pub fn fail(&mut self, task_id: &str, reason: &str) -> LifecycleResult<ProcessState> {
        let context = self
            .contexts
            .get_mut(task_id)
            .ok_or_else(|| LifecycleError::UnknownTask(task_id.to_string()))?;
        context.error_history.push(reason.to_string());
        let state = context.state;
        let retries_left = context.retry_count < self.max_retries;

        // Some states route failures straight to retry_pending; the rest go
        // through failed first
        if state.can_transition_to(ProcessState::Failed) {
            self.transition(task_id, ProcessState::Failed)?;
        } else if !state.can_transition_to(ProcessState::RetryPending) {
            return Err(LifecycleError::InvalidTransition {
                task_id: task_id.to_string(),
                from: state,
                to: ProcessState::Failed,
            });
        }

        if retries_left {
            if let Some(context) = self.contexts.get_mut(task_id) {
                context.retry_count += 1;
            }
            self.transition(task_id, ProcessState::RetryPending)?;
            self.transition(task_id, ProcessState::Pending)?;
            let count = self.contexts[task_id].retry_count;
            info!(task_id, retry = count, max = self.max_retries, reason, "Retrying task");
            Ok(ProcessState::Pending)
        } else {
            // Exhausted: make sure the context lands in failed even from a
            // state whose only table exit is retry_pending
            let mut forced_from = None;
            if let Some(context) = self.contexts.get_mut(task_id) {
                if context.state != ProcessState::Failed {
                    forced_from = Some(context.state);
                    context.state = ProcessState::Failed;
                    context.updated_at = Utc::now();
                }
            }
            if let Some(from) = forced_from {
                let _ = self.events.send(StateChange {
                    task_id: task_id.to_string(),
                    from,
                    to: ProcessState::Failed,
                    timestamp: Utc::now(),
                });
                self.save()?;
            }
            warn!(task_id, reason, "Task failed permanently");
            Ok(ProcessState::Failed)
        }
    }

    /// A copy of one context
    pub fn get(&self, task_id: &str) -> Option<LifecycleContext> {
        self.contexts.get(task_id).cloned()
    }

    /// Copies of all contexts
    pub fn all(&self) -> Vec<LifecycleContext> {
        self.contexts.values().cloned().collect()
    }

    /// Tasks whose context is not terminal
    pub fn non_terminal(&self) -> Vec<String> {
        self.contexts
            .values()
            .filter(|c| !c.state.is_terminal())
            .map(|c| c.task_id.clone())
            .collect()
    }

    /// Tasks not updated within the stuck timeout and not terminal
    pub fn stuck_tasks(&self) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stuck_timeout).unwrap_or_else(|_| chrono::Duration::minutes(30));
        self.contexts
            .values()
            .filter(|c| !c.state.is_terminal() && c.updated_at < cutoff)
            .map(|c| c.task_id.clone())
            .collect()
    }

    /// Force stuck tasks to `failed` (reason "timeout"), then apply the
    /// retry rule. Returns the affected task IDs.
    pub fn recover_stuck(&mut self) -> LifecycleResult<Vec<String>> {
        let stuck = self.stuck_tasks();
        for task_id in &stuck {
            warn!(task_id = %task_id, "Recovering stuck task");
            if let Some(context) = self.contexts.get_mut(task_id) {
                // Forced transition: a stuck state may have no legal path to
                // failed, so the table is bypassed deliberately
                let from = context.state;
                context.state = ProcessState::Failed;
                context.updated_at = Utc::now();
                let _ = self.events.send(StateChange {
                    task_id: task_id.clone(),
                    from,
                    to: ProcessState::Failed,
                    timestamp: Utc::now(),
                });
            }
            self.fail(task_id, "timeout")?;
        }
        if !stuck.is_empty() {
            self.save()?;
        }
        Ok(stuck)
    }

    /// Count of contexts per state
    pub fn statistics(&self) -> HashMap<ProcessState, usize> {
        let mut stats = HashMap::new();
        for context in self.contexts.values() {
            *stats.entry(context.state).or_insert(0) += 1;
        }
        stats
    }

    /// Drop a task's context entirely
    pub fn forget(&mut self, task_id: &str) -> LifecycleResult<()> {
        self.contexts.remove(task_id);
        self.save()
    }

    /// Atomic persist: temp file + rename
    fn save(&self) -> LifecycleResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.contexts)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

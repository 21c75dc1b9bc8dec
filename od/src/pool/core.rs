//! Worker pool implementation
//!
//! One pool owns a set of workers, a priority queue of waiting tasks, and
//! the autoscaling/health loop. Worker runtime state lives in the registry
//! but only the owning pool writes it.

use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, oneshot, watch};
use tracing::{debug, info, warn};

use crate::allocate::Allocator;
use crate::worker::{WorkerProfile, WorkerState};

use super::config::{PoolConfig, ScalingPolicy};
use super::queue::{AssignOutcome, QueuedTask};

/// EMA factor for per-worker response time
const RESPONSE_ALPHA: f64 = 0.1;

/// Errors from pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker not in pool: {0}")]
    UnknownWorker(String),

    #[error("Worker {0} is busy; use force to remove")]
    WorkerBusy(String),

    #[error("Pool is shutting down")]
    ShuttingDown,
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Per-worker health bookkeeping
#[derive(Debug, Clone)]
pub struct PoolWorkerMetrics {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub error_count: u32,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub last_heartbeat: Instant,
    pub avg_response_secs: f64,
    pub idle_since: Option<Instant>,
    /// Set when the worker went failed/offline, for recovery timing
    pub down_since: Option<Instant>,
}

impl PoolWorkerMetrics {
    fn new() -> Self {
        Self {
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            error_count: 0,
            consecutive_errors: 0,
            last_error: None,
            last_heartbeat: Instant::now(),
            avg_response_secs: 0.0,
            idle_since: Some(Instant::now()),
            down_since: None,
        }
    }
}

/// Pool-wide state counts; the state counts always sum to `total`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    pub starting: usize,
    pub stopping: usize,
    pub failed: usize,
    pub offline: usize,
    pub queued: usize,
    pub utilization: f64,
    pub scaling_events: usize,
    pub tasks_processed: u64,
}

/// A recorded scaling action
#[derive(Debug, Clone)]
pub struct ScalingEvent {
    pub timestamp: DateTime<Utc>,
    pub action: ScaleAction,
    pub count: usize,
    pub total_after: usize,
    pub utilization: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    Up,
    Down,
    IdleReap,
}

struct ActiveTask {
    worker_id: String,
    started_at: Instant,
}

struct PoolInner {
    members: BTreeSet<String>,
    metrics: HashMap<String, PoolWorkerMetrics>,
    queue: BinaryHeap<QueuedTask>,
    active: HashMap<String, ActiveTask>,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    scaling_history: Vec<ScalingEvent>,
    spawn_counter: usize,
    tasks_processed: u64,
    shutting_down: bool,
}

/// A managed set of workers with a shared queue and scaling policy
pub struct WorkerPool {
    name: String,
    config: PoolConfig,
    allocator: Arc<Allocator>,
    inner: Mutex<PoolInner>,
    notify: Notify,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, config: PoolConfig, allocator: Arc<Allocator>) -> Self {
        let name = name.into();
        info!(pool = %name, min = config.min_workers, max = config.max_workers, "Created worker pool");
        Self {
            name,
            config,
            allocator,
            inner: Mutex::new(PoolInner {
                members: BTreeSet::new(),
                metrics: HashMap::new(),
                queue: BinaryHeap::new(),
                active: HashMap::new(),
                last_scale_up: None,
                last_scale_down: None,
                scaling_history: Vec::new(),
                spawn_counter: 0,
                tasks_processed: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Add a worker to the pool. Returns false if already a member.
    pub async fn add_worker(&self, profile: WorkerProfile) -> bool {
        let mut inner = self.inner.lock().await;
        let added = Self::add_worker_locked(&mut inner, &self.allocator, profile).await;
        if added {
            drop(inner);
            // New capacity may satisfy queued tasks
            let mut inner = self.inner.lock().await;
            self.process_queue(&mut inner).await;
            self.notify.notify_waiters();
        }
        added
    }

    async fn add_worker_locked(inner: &mut PoolInner, allocator: &Arc<Allocator>, profile: WorkerProfile) -> bool {
        if inner.members.contains(&profile.worker_id) {
            warn!(worker_id = %profile.worker_id, "Worker already in pool");
            return false;
        }
        let worker_id = profile.worker_id.clone();
        allocator.registry().register(profile).await;
        allocator.registry().mark_state(&worker_id, WorkerState::Idle).await;
        inner.members.insert(worker_id.clone());
        inner.metrics.insert(worker_id.clone(), PoolWorkerMetrics::new());
        debug!(worker_id = %worker_id, "Worker joined pool");
        true
    }

    /// Remove a worker. A busy worker is only removed with `force`, which
    /// fails its active tasks first.
    pub async fn remove_worker(&self, worker_id: &str, force: bool) -> PoolResult<()> {
        let busy_tasks: Vec<String> = {
            let inner = self.inner.lock().await;
            if !inner.members.contains(worker_id) {
                return Err(PoolError::UnknownWorker(worker_id.to_string()));
            }
            inner
                .active
                .iter()
                .filter(|(_, a)| a.worker_id == worker_id)
                .map(|(task_id, _)| task_id.clone())
                .collect()
        };

        if !busy_tasks.is_empty() {
            if !force {
                return Err(PoolError::WorkerBusy(worker_id.to_string()));
            }
            // Stopping keeps the queue drain from handing it new work while
            // its tasks are being cancelled
            self.allocator.registry().mark_state(worker_id, WorkerState::Stopping).await;
            for task_id in busy_tasks {
                self.complete(&task_id, worker_id, false, None, Some("worker removed".to_string()))
                    .await;
            }
        }

        let mut inner = self.inner.lock().await;
        inner.members.remove(worker_id);
        inner.metrics.remove(worker_id);
        drop(inner);
        self.allocator.registry().unregister(worker_id).await;
        info!(pool = %self.name, worker_id, "Removed worker");
        Ok(())
    }

    /// Try to hand a task to a worker right now; queue it otherwise.
    /// Never waits for a worker to become free.
    pub async fn assign(&self, task: QueuedTask) -> PoolResult<AssignOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.shutting_down {
            return Err(PoolError::ShuttingDown);
        }

        match self
            .allocator
            .allocate(&task.task_id, &task.title, &task.description, task.requirements.clone())
            .await
        {
            Some(worker_id) => {
                self.mark_assigned(&mut inner, &task.task_id, &worker_id).await;
                info!(pool = %self.name, task_id = %task.task_id, worker_id = %worker_id, "Assigned task");
                Ok(AssignOutcome::Assigned(worker_id))
            }
            None => {
                inner.queue.push(task);
                let position = inner.queue.len();
                debug!(pool = %self.name, position, "Task queued, no available workers");
                Ok(AssignOutcome::Queued(position))
            }
        }
    }

    /// Assign a task, waiting until a worker takes it. Queued callers are
    /// served in (priority desc, enqueued asc) order as capacity frees up.
    pub async fn acquire(&self, mut task: QueuedTask) -> PoolResult<String> {
        let rx = {
            let mut inner = self.inner.lock().await;
            if inner.shutting_down {
                return Err(PoolError::ShuttingDown);
            }

            match self
                .allocator
                .allocate(&task.task_id, &task.title, &task.description, task.requirements.clone())
                .await
            {
                Some(worker_id) => {
                    self.mark_assigned(&mut inner, &task.task_id, &worker_id).await;
                    return Ok(worker_id);
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    task.waiter = Some(tx);
                    inner.queue.push(task);
                    rx
                }
            }
        };

        rx.await.map_err(|_| PoolError::ShuttingDown)
    }

    async fn mark_assigned(&self, inner: &mut PoolInner, task_id: &str, worker_id: &str) {
        self.allocator.registry().mark_state(worker_id, WorkerState::Busy).await;
        if let Some(metrics) = inner.metrics.get_mut(worker_id) {
            metrics.idle_since = None;
        }
        inner.active.insert(
            task_id.to_string(),
            ActiveTask {
                worker_id: worker_id.to_string(),
                started_at: Instant::now(),
            },
        );
    }

    /// Track an assignment made outside the pool (e.g. by the router,
    /// which claims workers through the allocator directly).
    pub async fn adopt(&self, task_id: &str, worker_id: &str) {
        let mut inner = self.inner.lock().await;
        self.mark_assigned(&mut inner, task_id, worker_id).await;
    }

    /// Record a task completion: update worker health, release the worker
    /// in the allocator, and drain the queue into the freed capacity.
    pub async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        success: bool,
        duration_secs: Option<f64>,
        error: Option<String>,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.active.remove(task_id).is_none() {
            warn!(pool = %self.name, task_id, "Completion for unknown active task");
            return false;
        }
        inner.tasks_processed += 1;

        let failure_threshold = self.config.failure_threshold;
        let mut worker_failed = false;
        if let Some(metrics) = inner.metrics.get_mut(worker_id) {
            metrics.total_tasks += 1;
            metrics.last_heartbeat = Instant::now();
            if success {
                metrics.successful_tasks += 1;
                metrics.consecutive_errors = 0;
            } else {
                metrics.failed_tasks += 1;
                metrics.error_count += 1;
                metrics.consecutive_errors += 1;
                metrics.last_error = error.clone();
                if metrics.consecutive_errors >= failure_threshold {
                    worker_failed = true;
                    metrics.down_since = Some(Instant::now());
                }
            }
            if let Some(duration) = duration_secs {
                metrics.avg_response_secs = if metrics.avg_response_secs == 0.0 {
                    duration
                } else {
                    RESPONSE_ALPHA * duration + (1.0 - RESPONSE_ALPHA) * metrics.avg_response_secs
                };
            }
        }

        self.allocator
            .release(worker_id, task_id, success, duration_secs.map(|s| s / 60.0))
            .await;

        // Worker state after release: failed beats idle beats still-busy;
        // a stopping worker stays stopping
        if worker_failed {
            warn!(pool = %self.name, worker_id, "Worker exceeded failure threshold");
            self.allocator.registry().mark_state(worker_id, WorkerState::Failed).await;
        } else {
            let profile = self.allocator.registry().get(worker_id).await;
            let still_active = profile.as_ref().map(|w| !w.current_tasks.is_empty()).unwrap_or(false);
            let stopping = profile.map(|w| w.state == WorkerState::Stopping).unwrap_or(false);
            if !still_active && !stopping {
                self.allocator.registry().mark_state(worker_id, WorkerState::Idle).await;
                if let Some(metrics) = inner.metrics.get_mut(worker_id) {
                    metrics.idle_since = Some(Instant::now());
                }
            }
        }

        self.process_queue(&mut inner).await;
        drop(inner);
        self.notify.notify_waiters();

        debug!(pool = %self.name, task_id, worker_id, success, "Task completed");
        true
    }

    /// Drain queued tasks into available workers, best-priority first
    async fn process_queue(&self, inner: &mut PoolInner) {
        while let Some(top) = inner.queue.peek() {
            let allocated = self
                .allocator
                .allocate(&top.task_id, &top.title, &top.description, top.requirements.clone())
                .await;

            let Some(worker_id) = allocated else {
                break;
            };

            let Some(mut task) = inner.queue.pop() else {
                break;
            };
            self.mark_assigned(inner, &task.task_id, &worker_id).await;

            if let Some(waiter) = task.waiter.take() {
                if waiter.send(worker_id.clone()).is_err() {
                    // Caller went away; undo the claim without polluting metrics
                    inner.active.remove(&task.task_id);
                    self.allocator.registry().release_slot(&worker_id, &task.task_id).await;
                    let still_active = self
                        .allocator
                        .registry()
                        .get(&worker_id)
                        .await
                        .map(|w| !w.current_tasks.is_empty())
                        .unwrap_or(false);
                    if !still_active {
                        self.allocator.registry().mark_state(&worker_id, WorkerState::Idle).await;
                    }
                    continue;
                }
            }
            info!(pool = %self.name, task_id = %task.task_id, worker_id = %worker_id, "Assigned queued task");
        }
    }

    /// Record a heartbeat from a worker
    pub async fn heartbeat(&self, worker_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(metrics) = inner.metrics.get_mut(worker_id) {
            metrics.last_heartbeat = Instant::now();
        }
    }

    /// One monitoring pass: health checks, recovery, scaling, idle reap.
    /// The background monitor calls this on every interval; tests call it
    /// directly.
    pub async fn tick(&self) {
        self.perform_health_checks().await;
        self.recover_downed_workers().await;
        self.check_scaling().await;
        self.reap_idle_workers().await;
    }

    /// Run the monitoring loop until shutdown is signalled
    pub async fn run_monitor(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.health_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(pool = %self.name, "Monitor stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn perform_health_checks(&self) {
        let stale_after = self.config.health_check_interval * 2;
        let mut stale = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            let members: Vec<String> = inner.members.iter().cloned().collect();
            for worker_id in members {
                let Some(metrics) = inner.metrics.get_mut(&worker_id) else {
                    continue;
                };
                if metrics.last_heartbeat.elapsed() > stale_after && metrics.down_since.is_none() {
                    metrics.down_since = Some(Instant::now());
                    stale.push(worker_id);
                }
            }
        }
        for worker_id in stale {
            let state = self.allocator.registry().get(&worker_id).await.map(|w| w.state);
            if !matches!(state, Some(WorkerState::Failed) | Some(WorkerState::Offline)) {
                warn!(pool = %self.name, worker_id = %worker_id, "Worker unresponsive, marking offline");
                self.allocator.registry().mark_state(&worker_id, WorkerState::Offline).await;
            }
        }
    }

    async fn recover_downed_workers(&self) {
        let mut recovered = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            let members: Vec<String> = inner.members.iter().cloned().collect();
            for worker_id in members {
                let Some(metrics) = inner.metrics.get_mut(&worker_id) else {
                    continue;
                };
                if let Some(down_since) = metrics.down_since {
                    if down_since.elapsed() > self.config.recovery_timeout {
                        metrics.down_since = None;
                        metrics.consecutive_errors = 0;
                        metrics.last_heartbeat = Instant::now();
                        metrics.idle_since = Some(Instant::now());
                        recovered.push(worker_id);
                    }
                }
            }
        }
        for worker_id in recovered {
            info!(pool = %self.name, worker_id = %worker_id, "Rehabilitating worker");
            self.allocator.registry().mark_state(&worker_id, WorkerState::Idle).await;
        }
        if !self.inner.lock().await.queue.is_empty() {
            let mut inner = self.inner.lock().await;
            self.process_queue(&mut inner).await;
        }
    }

    async fn check_scaling(&self) {
        let stats = self.stats().await;
        let now = Instant::now();

        let mut inner = self.inner.lock().await;
        if inner.shutting_down {
            return;
        }

        let past_up_cooldown = inner
            .last_scale_up
            .map(|t| now.duration_since(t) > self.config.scale_up_cooldown)
            .unwrap_or(true);
        let past_down_cooldown = inner
            .last_scale_down
            .map(|t| now.duration_since(t) > self.config.scale_down_cooldown)
            .unwrap_or(true);

        if stats.utilization > self.config.scale_up_threshold
            && stats.total < self.config.max_workers
            && past_up_cooldown
        {
            let gap = self.config.max_workers - stats.total;
            let count = match self.config.scaling_policy {
                ScalingPolicy::Conservative => 1,
                ScalingPolicy::Balanced => 2.min(gap),
                ScalingPolicy::Aggressive => inner.queue.len().div_ceil(2).max(1).min(gap),
            };

            for _ in 0..count {
                inner.spawn_counter += 1;
                let template = &self.config.template;
                let profile = WorkerProfile::new(
                    format!("{}-worker-{}", self.name, inner.spawn_counter),
                    template.model_name.clone(),
                    template.capabilities.clone(),
                    template.max_complexity,
                    template.max_concurrent_tasks,
                );
                Self::add_worker_locked(&mut inner, &self.allocator, profile).await;
            }

            inner.last_scale_up = Some(now);
            let total_after = inner.members.len();
            inner.scaling_history.push(ScalingEvent {
                timestamp: Utc::now(),
                action: ScaleAction::Up,
                count,
                total_after,
                utilization: stats.utilization,
            });
            info!(pool = %self.name, count, total = total_after, "Scaled up");

            self.process_queue(&mut inner).await;
            drop(inner);
            self.notify.notify_waiters();
        } else if stats.utilization < self.config.scale_down_threshold
            && stats.total > self.config.min_workers
            && past_down_cooldown
        {
            let headroom = stats.total - self.config.min_workers;
            let count = match self.config.scaling_policy {
                ScalingPolicy::Conservative | ScalingPolicy::Balanced => 1.min(headroom),
                ScalingPolicy::Aggressive => 2.min(headroom),
            };

            let mut removed = 0;
            let candidates: Vec<String> = inner.members.iter().cloned().collect();
            drop(inner);
            for worker_id in candidates {
                if removed >= count {
                    break;
                }
                let idle = self
                    .allocator
                    .registry()
                    .get(&worker_id)
                    .await
                    .map(|w| w.state == WorkerState::Idle)
                    .unwrap_or(false);
                if idle && self.remove_worker(&worker_id, false).await.is_ok() {
                    removed += 1;
                }
            }

            if removed > 0 {
                let mut inner = self.inner.lock().await;
                inner.last_scale_down = Some(now);
                let total_after = inner.members.len();
                inner.scaling_history.push(ScalingEvent {
                    timestamp: Utc::now(),
                    action: ScaleAction::Down,
                    count: removed,
                    total_after,
                    utilization: stats.utilization,
                });
                info!(pool = %self.name, removed, total = total_after, "Scaled down");
            }
        }
    }

    async fn reap_idle_workers(&self) {
        let candidates: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .members
                .iter()
                .filter(|id| {
                    inner
                        .metrics
                        .get(*id)
                        .and_then(|m| m.idle_since)
                        .map(|t| t.elapsed() > self.config.max_idle_time)
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };

        for worker_id in candidates {
            let total = self.inner.lock().await.members.len();
            if total <= self.config.min_workers {
                break;
            }
            if self.remove_worker(&worker_id, false).await.is_ok() {
                let mut inner = self.inner.lock().await;
                let total_after = inner.members.len();
                inner.scaling_history.push(ScalingEvent {
                    timestamp: Utc::now(),
                    action: ScaleAction::IdleReap,
                    count: 1,
                    total_after,
                    utilization: 0.0,
                });
                info!(pool = %self.name, worker_id = %worker_id, "Reaped idle worker");
            }
        }
    }

    /// Current pool statistics; state counts sum to `total`
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        let mut stats = PoolStats {
            total: inner.members.len(),
            queued: inner.queue.len(),
            scaling_events: inner.scaling_history.len(),
            tasks_processed: inner.tasks_processed,
            ..Default::default()
        };
        let members = inner.members.clone();
        drop(inner);

        for worker_id in &members {
            let Some(worker) = self.allocator.registry().get(worker_id).await else {
                continue;
            };
            match worker.state {
                WorkerState::Busy => stats.busy += 1,
                WorkerState::Idle => stats.idle += 1,
                WorkerState::Starting => stats.starting += 1,
                WorkerState::Stopping => stats.stopping += 1,
                WorkerState::Failed => stats.failed += 1,
                WorkerState::Offline => stats.offline += 1,
            }
        }
        if stats.total > 0 {
            stats.utilization = stats.busy as f64 / stats.total as f64;
        }
        stats
    }

    /// Scaling event history
    pub async fn scaling_history(&self) -> Vec<ScalingEvent> {
        self.inner.lock().await.scaling_history.clone()
    }

    /// Per-worker health metrics
    pub async fn worker_metrics(&self, worker_id: &str) -> Option<PoolWorkerMetrics> {
        self.inner.lock().await.metrics.get(worker_id).cloned()
    }

    /// How long the oldest active task has been running
    pub async fn longest_running(&self) -> Option<(String, std::time::Duration)> {
        let inner = self.inner.lock().await;
        inner
            .active
            .iter()
            .map(|(task_id, active)| (task_id.clone(), active.started_at.elapsed()))
            .max_by_key(|(_, elapsed)| *elapsed)
    }

    /// Begin a cooperative stop: refuse new work, wake queued waiters with
    /// an error, and mark workers stopping.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutting_down = true;
        // Dropping queue entries drops their waiter senders, which fails
        // pending acquire() calls with ShuttingDown
        inner.queue.clear();
        let members: Vec<String> = inner.members.iter().cloned().collect();
        drop(inner);

        for worker_id in &members {
            self.allocator.registry().mark_state(worker_id, WorkerState::Stopping).await;
        }
        self.notify.notify_waiters();
        info!(pool = %self.name, "Pool shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{Capability, Complexity, WorkerRegistry, capabilities};
    use std::time::Duration;

    fn worker(id: &str) -> WorkerProfile {
        WorkerProfile::new(id, "model", capabilities(&[Capability::Code]), Complexity::High, 1)
    }

    fn pool_with_config(config: PoolConfig) -> WorkerPool {
        let registry = Arc::new(WorkerRegistry::new());
        let allocator = Arc::new(Allocator::new(registry));
        WorkerPool::new("test-pool", config, allocator)
    }

    fn task(id: &str, priority: u8) -> QueuedTask {
        QueuedTask::new(id, "Implement feature", "write the code for the feature", priority)
    }

    #[tokio::test]
    async fn test_assign_and_complete() {
        let pool = pool_with_config(PoolConfig::default());
        pool.add_worker(worker("w1")).await;

        let outcome = pool.assign(task("t1", 5)).await.unwrap();
        assert_eq!(outcome, AssignOutcome::Assigned("w1".to_string()));

        let stats = pool.stats().await;
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.idle, 0);

        assert!(pool.complete("t1", "w1", true, Some(10.0), None).await);
        let stats = pool.stats().await;
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.tasks_processed, 1);
    }

    #[tokio::test]
    async fn test_assign_queues_when_full() {
        let pool = pool_with_config(PoolConfig::default());
        pool.add_worker(worker("w1")).await;

        pool.assign(task("t1", 5)).await.unwrap();
        let outcome = pool.assign(task("t2", 5)).await.unwrap();
        assert_eq!(outcome, AssignOutcome::Queued(1));

        // Completion drains the queue
        pool.complete("t1", "w1", true, None, None).await;
        let stats = pool.stats().await;
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_queue_respects_priority() {
        let pool = pool_with_config(PoolConfig::default());
        pool.add_worker(worker("w1")).await;

        pool.assign(task("running", 5)).await.unwrap();
        pool.assign(task("low", 2)).await.unwrap();
        pool.assign(task("high", 9)).await.unwrap();

        pool.complete("running", "w1", true, None, None).await;

        // The high-priority task got the freed worker
        let inner = pool.inner.lock().await;
        assert!(inner.active.contains_key("high"));
        assert!(!inner.active.contains_key("low"));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_capacity() {
        let registry = Arc::new(WorkerRegistry::new());
        let allocator = Arc::new(Allocator::new(registry));
        let pool = Arc::new(WorkerPool::new("p", PoolConfig::default(), allocator));
        pool.add_worker(worker("w1")).await;

        let first = pool.acquire(task("t1", 5)).await.unwrap();
        assert_eq!(first, "w1");

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(task("t2", 5)).await })
        };
        // Give the waiter time to enqueue
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.complete("t1", "w1", true, None, None).await;
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second, "w1");
    }

    #[tokio::test]
    async fn test_failure_threshold_marks_worker_failed() {
        let pool = pool_with_config(PoolConfig {
            failure_threshold: 2,
            min_workers: 0,
            ..Default::default()
        });
        pool.add_worker(worker("w1")).await;

        for i in 0..2 {
            let id = format!("t{}", i);
            pool.assign(task(&id, 5)).await.unwrap();
            pool.complete(&id, "w1", false, None, Some("boom".to_string())).await;
        }

        let stats = pool.stats().await;
        assert_eq!(stats.failed, 1);

        // Failed workers receive no assignments
        let outcome = pool.assign(task("t9", 5)).await.unwrap();
        assert!(matches!(outcome, AssignOutcome::Queued(_)));
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_errors() {
        let pool = pool_with_config(PoolConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        pool.add_worker(worker("w1")).await;

        for (i, success) in [false, false, true, false].iter().enumerate() {
            let id = format!("t{}", i);
            pool.assign(task(&id, 5)).await.unwrap();
            pool.complete(&id, "w1", *success, None, None).await;
        }

        // Never hit three consecutive failures
        let metrics = pool.worker_metrics("w1").await.unwrap();
        assert_eq!(metrics.consecutive_errors, 1);
        assert_eq!(pool.stats().await.failed, 0);
    }

    #[tokio::test]
    async fn test_remove_busy_worker_requires_force() {
        let pool = pool_with_config(PoolConfig::default());
        pool.add_worker(worker("w1")).await;
        pool.assign(task("t1", 5)).await.unwrap();

        assert!(matches!(
            pool.remove_worker("w1", false).await,
            Err(PoolError::WorkerBusy(_))
        ));

        pool.remove_worker("w1", true).await.unwrap();
        assert_eq!(pool.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_health_check_marks_offline() {
        let pool = pool_with_config(PoolConfig {
            health_check_interval: Duration::from_millis(10),
            ..Default::default()
        });
        pool.add_worker(worker("w1")).await;

        // Let the heartbeat go stale past 2x the interval
        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.tick().await;

        assert_eq!(pool.stats().await.offline, 1);
    }

    #[tokio::test]
    async fn test_recovery_rehabilitates_offline_worker() {
        let pool = pool_with_config(PoolConfig {
            health_check_interval: Duration::from_millis(5),
            recovery_timeout: Duration::from_millis(20),
            ..Default::default()
        });
        pool.add_worker(worker("w1")).await;

        tokio::time::sleep(Duration::from_millis(15)).await;
        pool.tick().await;
        assert_eq!(pool.stats().await.offline, 1);

        tokio::time::sleep(Duration::from_millis(25)).await;
        pool.tick().await;
        assert_eq!(pool.stats().await.idle, 1);
    }

    #[tokio::test]
    async fn test_autoscaling_up_and_down() {
        let pool = pool_with_config(PoolConfig {
            min_workers: 2,
            max_workers: 6,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_up_cooldown: Duration::ZERO,
            scale_down_cooldown: Duration::ZERO,
            scaling_policy: ScalingPolicy::Balanced,
            ..Default::default()
        });
        pool.add_worker(worker("w1")).await;
        pool.add_worker(worker("w2")).await;

        // Saturate: 2 assigned, 8 queued
        for i in 0..10 {
            pool.assign(task(&format!("t{}", i), 5)).await.unwrap();
        }
        assert!((pool.stats().await.utilization - 1.0).abs() < f64::EPSILON);

        // Two balanced scale-ups reach the max of 6; scaled-up workers
        // immediately absorb queued tasks
        pool.tick().await;
        assert_eq!(pool.stats().await.total, 4);
        pool.tick().await;
        let stats = pool.stats().await;
        assert_eq!(stats.total, 6);
        assert_eq!(stats.busy, 6);

        // Never exceeds max
        pool.tick().await;
        assert_eq!(pool.stats().await.total, 6);

        // Drain everything
        loop {
            let active: Vec<(String, String)> = {
                let inner = pool.inner.lock().await;
                inner
                    .active
                    .iter()
                    .map(|(t, a)| (t.clone(), a.worker_id.clone()))
                    .collect()
            };
            if active.is_empty() {
                break;
            }
            for (task_id, worker_id) in active {
                pool.complete(&task_id, &worker_id, true, None, None).await;
            }
        }

        // Scale-down ticks walk back toward min, one worker per tick
        for _ in 0..10 {
            pool.tick().await;
        }
        let stats = pool.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.idle, 2);
    }

    #[tokio::test]
    async fn test_state_counts_sum_to_total() {
        let pool = pool_with_config(PoolConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        pool.add_worker(worker("w1")).await;
        pool.add_worker(worker("w2")).await;
        pool.add_worker(worker("w3")).await;

        pool.assign(task("t1", 5)).await.unwrap();
        pool.assign(task("t2", 5)).await.unwrap();
        pool.complete("t2", "w2", false, None, Some("err".to_string())).await;

        let stats = pool.stats().await;
        assert_eq!(
            stats.busy + stats.idle + stats.failed + stats.offline + stats.starting + stats.stopping,
            stats.total
        );
    }

    #[tokio::test]
    async fn test_idle_reap_respects_min() {
        let pool = pool_with_config(PoolConfig {
            min_workers: 1,
            max_idle_time: Duration::from_millis(5),
            scale_down_cooldown: Duration::from_secs(3600),
            ..Default::default()
        });
        pool.add_worker(worker("w1")).await;
        pool.add_worker(worker("w2")).await;
        pool.add_worker(worker("w3")).await;

        tokio::time::sleep(Duration::from_millis(15)).await;
        pool.tick().await;

        // Reaped down to min, never below
        assert_eq!(pool.stats().await.total, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = pool_with_config(PoolConfig::default());
        pool.add_worker(worker("w1")).await;
        pool.shutdown().await;

        assert!(matches!(pool.assign(task("t1", 5)).await, Err(PoolError::ShuttingDown)));
        assert_eq!(pool.stats().await.stopping, 1);
    }
}

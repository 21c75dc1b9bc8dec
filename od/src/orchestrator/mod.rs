//! Top-level orchestration
//!
//! Composes the stores and components bottom-up (stores first, then
//! registry/allocator, then router and pool) and drives the main loop:
//! pick a runnable task, checkpoint, route, execute, review, apply, and
//! feed outcomes back through the lifecycle.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use eyre::{Context as _, Result, eyre};
use graphstore::{RESULTS_FILE, ResultStatus, ResultStore, TASKS_FILE, Task, TaskStatus, TaskStore, WorkerResult};
use serde::{Deserialize, Serialize};
use snapstore::{CheckpointKind, RollbackStrategy, SnapStore};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::allocate::Allocator;
use crate::apply::{ChangeExtractor, ReviewApplier};
use crate::config::Config;
use crate::lifecycle::{LifecycleContext, LifecycleManager, ProcessState};
use crate::pool::{QueuedTask, WorkerPool};
use crate::review::{FileChange, ReviewReport, Reviewer};
use crate::route::{RouteTask, TaskRouter};
use crate::validate::{PlanReport, PlanValidator};
use crate::worker::{ScriptedWorker, Worker, WorkerProfile, WorkerRequest};

/// One task in a submitted plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    /// IDs the tasks will hold in the store; earlier entries first
    #[serde(default)]
    pub dependencies: Vec<u64>,
    #[serde(default)]
    pub priority: Option<graphstore::TaskPriority>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub test_strategy: Option<String>,
}

/// Result of a submission: the validation report plus the IDs persisted
/// when the plan was accepted
#[derive(Debug)]
pub struct SubmitOutcome {
    pub report: PlanReport,
    pub task_ids: Vec<u64>,
}

/// Combined view of one task for status queries
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub task: Option<Task>,
    pub lifecycle: Option<LifecycleContext>,
}

/// The orchestrator: owns the stores and drives tasks to completion
#[derive(Clone)]
pub struct Orchestrator {
    work_dir: PathBuf,
    config: Config,
    tasks: Arc<Mutex<TaskStore>>,
    results: Arc<Mutex<ResultStore>>,
    snaps: Arc<Mutex<SnapStore>>,
    lifecycle: Arc<Mutex<LifecycleManager>>,
    allocator: Arc<Allocator>,
    router: Arc<TaskRouter>,
    pool: Arc<WorkerPool>,
    workers: Arc<Mutex<HashMap<String, Arc<dyn Worker>>>>,
    default_worker: Arc<dyn Worker>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    cancel: watch::Sender<bool>,
}

impl Orchestrator {
    /// Build the orchestrator over a working directory. Lower components
    /// are constructed first; upper ones receive handles.
    pub fn new(work_dir: impl AsRef<Path>, config: Config) -> Result<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();
        let store_dir = work_dir.join(&config.storage.store_dir);

        let tasks = TaskStore::open(store_dir.join(TASKS_FILE), &config.orchestrator.project_name)
            .context("Failed to open task store")?;
        let results = ResultStore::open(store_dir.join(RESULTS_FILE)).context("Failed to open result store")?;
        let snaps = SnapStore::open(&work_dir, store_dir.join("checkpoints"))
            .context("Failed to open checkpoint store")?
            .with_max_checkpoints(config.orchestrator.max_checkpoints);
        let lifecycle = LifecycleManager::open(store_dir.join("lifecycle.json"))
            .context("Failed to open lifecycle store")?
            .with_max_retries(config.lifecycle.max_retries)
            .with_stuck_timeout(std::time::Duration::from_secs(config.lifecycle.stuck_timeout_secs));

        let registry = Arc::new(crate::worker::WorkerRegistry::new());
        let allocator = Arc::new(Allocator::new(registry));
        let router = Arc::new(TaskRouter::new(allocator.clone()));
        let pool = Arc::new(WorkerPool::new("main", config.pool_config(), allocator.clone()));

        let (cancel, _) = watch::channel(false);

        info!(work_dir = %work_dir.display(), "Orchestrator ready");
        Ok(Self {
            work_dir,
            config,
            tasks: Arc::new(Mutex::new(tasks)),
            results: Arc::new(Mutex::new(results)),
            snaps: Arc::new(Mutex::new(snaps)),
            lifecycle: Arc::new(Mutex::new(lifecycle)),
            allocator,
            router,
            pool,
            workers: Arc::new(Mutex::new(HashMap::new())),
            default_worker: Arc::new(ScriptedWorker::echo()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        })
    }

    /// Replace the fallback worker implementation used when a worker ID
    /// has no dedicated implementation (autoscaled workers, tests)
    pub fn with_default_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.default_worker = worker;
        self
    }

    /// Add a worker to the pool, optionally with its own implementation
    pub async fn add_worker(&self, profile: WorkerProfile, implementation: Option<Arc<dyn Worker>>) {
        let worker_id = profile.worker_id.clone();
        self.pool.add_worker(profile).await;
        if let Some(implementation) = implementation {
            self.workers.lock().await.insert(worker_id, implementation);
        }
    }

    /// The pool, for status queries and tests
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Validate a plan and persist it when approved. Nothing is persisted
    /// for a rejected plan.
    pub async fn submit(&self, specs: Vec<TaskSpec>) -> Result<SubmitOutcome> {
        let base_id = {
            let tasks = self.tasks.lock().await;
            tasks.all().iter().map(|t| t.id).max().unwrap_or(0)
        };

        // Prospective tasks for validation, with the IDs they would get
        let prospective: Vec<Task> = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let mut task = Task::new(base_id + i as u64 + 1, spec.title.clone(), spec.description.clone());
                task.dependencies = spec.dependencies.clone();
                if let Some(priority) = spec.priority {
                    task.priority = priority;
                }
                task
            })
            .collect();

        // Validate against the whole graph so dependencies on already
        // persisted tasks resolve
        let combined: Vec<Task> = {
            let tasks = self.tasks.lock().await;
            tasks.all().into_iter().chain(prospective.iter().cloned()).collect()
        };
        let plan_tasks = if base_id == 0 { &prospective } else { &combined };

        let validator = PlanValidator::new(self.config.pool.max_workers, self.config.validation.max_memory_gb);
        let validator = if self.config.validation.strict {
            validator.strict()
        } else {
            validator
        };
        let report = validator.validate(&format!("plan-{}", base_id + 1), plan_tasks);

        if !report.can_execute() {
            warn!(outcome = %report.outcome, "Plan not approved; nothing persisted");
            return Ok(SubmitOutcome {
                report,
                task_ids: Vec::new(),
            });
        }

        let mut task_ids = Vec::with_capacity(specs.len());
        {
            let mut tasks = self.tasks.lock().await;
            for spec in specs {
                let task = tasks.add(
                    spec.title,
                    spec.description,
                    spec.dependencies,
                    spec.priority,
                    spec.details,
                    spec.test_strategy,
                )?;
                task_ids.push(task.id);
            }
        }

        info!(tasks = task_ids.len(), outcome = %report.outcome, "Plan submitted");
        Ok(SubmitOutcome { report, task_ids })
    }

    /// Run until no runnable task remains and every lifecycle is terminal.
    /// Honors the cancellation signal at every iteration boundary.
    pub async fn run(&self) -> Result<()> {
        let mut cancel = self.cancel.subscribe();
        let mut supervisors: JoinSet<()> = JoinSet::new();

        // Health checks and autoscaling run for the duration of this loop
        let (monitor_stop, monitor_rx) = watch::channel(false);
        let monitor = {
            let pool = self.pool.clone();
            tokio::spawn(async move { pool.run_monitor(monitor_rx).await })
        };

        loop {
            if *cancel.borrow() {
                info!("Run loop cancelled");
                break;
            }

            {
                let mut lifecycle = self.lifecycle.lock().await;
                let recovered = lifecycle.recover_stuck()?;
                for task_id in recovered {
                    self.sync_task_status(&task_id).await;
                }
            }

            let runnable = self.runnable_tasks().await;
            for task in runnable {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(task.id) {
                    continue;
                }
                drop(in_flight);

                let this = self.clone();
                supervisors.spawn(async move {
                    let task_id = task.id;
                    if let Err(e) = this.supervise(task).await {
                        error!(task_id, error = %e, "Task supervision failed");
                        let mut lifecycle = this.lifecycle.lock().await;
                        let _ = lifecycle.fail(&task_id.to_string(), &e.to_string());
                        drop(lifecycle);
                        this.sync_task_status(&task_id.to_string()).await;
                    }
                    this.in_flight.lock().await.remove(&task_id);
                });
            }

            if supervisors.is_empty() {
                if self.runnable_tasks().await.is_empty() {
                    debug!("Quiescent: no runnable tasks and nothing in flight");
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = supervisors.join_next() => {}
                _ = cancel.changed() => {}
            }
        }

        while supervisors.join_next().await.is_some() {}
        let _ = monitor_stop.send(true);
        let _ = monitor.await;
        Ok(())
    }

    /// Process one scheduling tick: supervise the single next runnable
    /// task to completion. Returns false when nothing was runnable.
    pub async fn step(&self) -> Result<bool> {
        let Some(task) = self.runnable_tasks().await.into_iter().next() else {
            return Ok(false);
        };
        let task_id = task.id;
        self.in_flight.lock().await.insert(task_id);
        let outcome = self.supervise(task).await;
        self.in_flight.lock().await.remove(&task_id);
        outcome?;
        Ok(true)
    }

    /// Signal cancellation and quiesce the pool
    pub async fn shutdown(&self) {
        let _ = self.cancel.send(true);
        self.pool.shutdown().await;
        info!("Orchestrator shut down");
    }

    /// Combined task + lifecycle view
    pub async fn status(&self, task_id: &str) -> TaskView {
        let task = self.tasks.lock().await.get(task_id);
        let lifecycle = self.lifecycle.lock().await.get(task_id);
        TaskView { task, lifecycle }
    }

    /// Restore the working tree to a checkpoint
    pub async fn rollback(&self, checkpoint_id: &str) -> Result<()> {
        let mut snaps = self.snaps.lock().await;
        snaps
            .rollback(checkpoint_id, RollbackStrategy::Full)
            .map(|report| {
                info!(
                    checkpoint_id,
                    deleted = report.deleted,
                    overwritten = report.overwritten,
                    created = report.created,
                    "Rollback complete"
                );
            })
            .map_err(Into::into)
    }

    /// Schedulable tasks whose dependencies are complete and which are not
    /// already being supervised
    async fn runnable_tasks(&self) -> Vec<Task> {
        let in_flight = self.in_flight.lock().await.clone();
        let tasks = self.tasks.lock().await;
        let all = tasks.all();
        let mut runnable: Vec<Task> = all
            .iter()
            .filter(|t| t.is_schedulable() && !in_flight.contains(&t.id))
            .filter(|t| {
                t.dependencies.iter().all(|dep| {
                    all.iter()
                        .find(|d| d.id == *dep)
                        .map(|d| matches!(d.status, TaskStatus::Done | TaskStatus::Cancelled))
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect();
        runnable.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        runnable
    }

    /// Drive one task through its full trajectory
    async fn supervise(&self, task: Task) -> Result<()> {
        let task_id = task.id.to_string();
        info!(task_id = %task_id, title = %task.title, "Supervising task");

        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.init_task(&task_id)?;
        }

        // Safety net before any mutation on the tree
        let checkpoint_id = if self.config.orchestrator.pre_task_checkpoints {
            let mut snaps = self.snaps.lock().await;
            let mut metadata = HashMap::new();
            metadata.insert("task_id".to_string(), serde_json::json!(task.id));
            Some(
                snaps
                    .create(
                        CheckpointKind::PreTask,
                        format!("Before task {}: {}", task.id, task.title),
                        &[],
                        metadata,
                    )
                    .context("Pre-task checkpoint failed")?,
            )
        } else {
            None
        };

        // Route; fall back to waiting on pool capacity when every worker
        // is busy right now
        let priority = self.allocator.analyze(&task.title, &task.description).priority;
        let decision = self
            .router
            .route(
                &RouteTask {
                    id: task_id.clone(),
                    title: task.title.clone(),
                    description: task.description.clone(),
                    priority,
                },
                None,
            )
            .await;

        let worker_id = match decision.selected_worker {
            Some(worker_id) => {
                self.pool.adopt(&task_id, &worker_id).await;
                worker_id
            }
            None => {
                debug!(task_id = %task_id, "No worker free; queueing");
                self.pool
                    .acquire(QueuedTask::new(&task_id, &task.title, &task.description, priority))
                    .await
                    .map_err(|e| eyre!("assignment failed: {}", e))?
            }
        };

        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.assign_worker(&task_id, &worker_id)?;
            lifecycle.transition(&task_id, ProcessState::WorkerExecuting)?;
        }
        {
            let mut tasks = self.tasks.lock().await;
            tasks.set_status(&task_id, TaskStatus::InProgress)?;
        }

        // Execute under the worker timeout
        let implementation = {
            let workers = self.workers.lock().await;
            workers.get(&worker_id).cloned().unwrap_or_else(|| self.default_worker.clone())
        };
        let request = WorkerRequest {
            task_id: task_id.clone(),
            prompt: format!("{}\n\n{}", task.title, task.description),
            allowed_tools: Vec::new(),
        };
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.pool.config().worker_timeout, implementation.execute(request)).await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => crate::worker::WorkerOutcome::failure(e.to_string()),
            Err(_) => crate::worker::WorkerOutcome::failure("worker timed out"),
        };

        // Persist the result before any status moves to review
        let status = if outcome.success {
            ResultStatus::Success
        } else {
            ResultStatus::Failed
        };
        let mut result = WorkerResult::new(&task_id, &worker_id, status)
            .with_output(outcome.output.clone())
            .with_created_files(outcome.created_files.clone())
            .with_modified_files(outcome.modified_files.clone());
        result.execution_time = elapsed;
        result.tokens_used = outcome.tokens_used;
        result.error_message = outcome.error.clone();
        {
            let mut results = self.results.lock().await;
            results.store(&result)?;
        }

        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.transition(&task_id, ProcessState::WorkerCompleted)?;
            lifecycle.attach_result(&task_id, result.clone())?;
        }

        self.pool
            .complete(&task_id, &worker_id, outcome.success, Some(elapsed), outcome.error.clone())
            .await;
        self.router
            .update_route_performance(&task_id, outcome.success, elapsed)
            .await;

        if !outcome.success {
            let reason = outcome.error.unwrap_or_else(|| "worker failed".to_string());
            return self.handle_failure(&task_id, &reason, checkpoint_id.as_deref()).await;
        }

        // Review the output and the proposed file contents
        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.transition(&task_id, ProcessState::ReviewPending)?;
            lifecycle.transition(&task_id, ProcessState::ReviewInProgress)?;
        }

        let proposed_files: Vec<FileChange> = ChangeExtractor::new()
            .extract(&outcome.output)
            .into_iter()
            .filter_map(|change| {
                change.new_content.map(|content| FileChange {
                    path: change.file_path,
                    content,
                })
            })
            .collect();

        let reviewer = Reviewer::new("orchd-reviewer").with_high_threshold(self.config.review.high_threshold);
        let review = reviewer.review(&task_id, &outcome.output, &proposed_files, None);
        let review_passed = review.passed;

        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.transition(&task_id, ProcessState::ReviewCompleted)?;
            lifecycle.attach_review(&task_id, review.clone())?;
        }

        if !review_passed {
            debug!(task_id = %task_id, score = review.overall_score, "Review rejected output");
            return self
                .handle_failure(&task_id, "review rejected the output", checkpoint_id.as_deref())
                .await;
        }

        // Apply the proposed changes
        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.transition(&task_id, ProcessState::ApplyingChanges)?;
        }

        let apply_report = {
            let applier = ReviewApplier::new(&self.work_dir).with_resolution(self.config.conflict_resolution());
            let mut snaps = self.snaps.lock().await;
            applier.apply(&outcome.output, Some(&mut snaps))
        };

        if !apply_report.success() {
            if !apply_report.rollback_performed {
                if let Some(checkpoint_id) = checkpoint_id.as_deref() {
                    let mut snaps = self.snaps.lock().await;
                    snaps
                        .rollback(checkpoint_id, RollbackStrategy::Full)
                        .context("Rollback after apply failure")?;
                }
            }
            return self.handle_failure(&task_id, "applying changes failed", None).await;
        }

        {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.transition(&task_id, ProcessState::Completed)?;
        }
        {
            let mut results = self.results.lock().await;
            results.mark_validated(&task_id, true)?;
        }
        {
            let mut tasks = self.tasks.lock().await;
            tasks.set_status(&task_id, TaskStatus::Done)?;
        }

        let _ = self.validate_result(&task_id).await;
        info!(task_id = %task_id, "Task completed");
        Ok(())
    }

    /// Push a failed task through the retry rule and align the task store,
    /// restoring the pre-task checkpoint when one was taken
    async fn handle_failure(&self, task_id: &str, reason: &str, checkpoint_id: Option<&str>) -> Result<()> {
        if let Some(checkpoint_id) = checkpoint_id {
            let mut snaps = self.snaps.lock().await;
            if let Err(e) = snaps.rollback(checkpoint_id, RollbackStrategy::Full) {
                // Checkpoint trouble is fatal for the task, not absorbed
                return Err(eyre!("rollback to {} failed: {}", checkpoint_id, e));
            }
        }

        let resulting = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.fail(task_id, reason)?
        };

        let mut tasks = self.tasks.lock().await;
        match resulting {
            ProcessState::Pending => tasks.set_status(task_id, TaskStatus::Pending)?,
            _ => tasks.set_status(task_id, TaskStatus::Failed)?,
        }
        warn!(task_id, reason, ?resulting, "Task failure handled");
        Ok(())
    }

    /// Re-align a task's store status with its lifecycle state after stuck
    /// recovery
    async fn sync_task_status(&self, task_id: &str) {
        let state = self.lifecycle.lock().await.get(task_id).map(|c| c.state);
        let status = match state {
            Some(ProcessState::Pending) => TaskStatus::Pending,
            Some(ProcessState::Failed) => TaskStatus::Failed,
            _ => return,
        };
        let mut tasks = self.tasks.lock().await;
        if let Err(e) = tasks.set_status(task_id, status) {
            warn!(task_id, error = %e, "Status sync failed");
        }
    }

    /// Run the result-store heuristics over a task's latest result
    async fn validate_result(&self, task_id: &str) -> Result<(bool, String)> {
        let results = self.results.lock().await;
        results.validate(task_id).map_err(Into::into)
    }

    /// Review report for a task, if one was produced
    pub async fn review_of(&self, task_id: &str) -> Option<ReviewReport> {
        self.lifecycle.lock().await.get(task_id).and_then(|c| c.review)
    }
}

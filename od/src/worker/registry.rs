//! WorkerRegistry - live worker profiles and metrics
//!
//! The registry owns every profile; the allocator and pool read snapshots
//! and mutate through compound operations that hold the lock once, so a
//! gate check and its matching counter update cannot interleave.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::profile::{Capability, Complexity, WorkerProfile, WorkerState};

/// EMA learning rate for average task duration
const DURATION_ALPHA: f64 = 0.1;

/// Window for the rolling success rate
const SUCCESS_WINDOW: usize = 10;

struct RegistryInner {
    workers: HashMap<String, WorkerProfile>,
    /// Recent outcomes per worker, newest last, bounded to SUCCESS_WINDOW
    outcomes: HashMap<String, VecDeque<bool>>,
}

/// Registry of worker profiles keyed by worker ID
pub struct WorkerRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                workers: HashMap::new(),
                outcomes: HashMap::new(),
            }),
        }
    }

    /// Register a worker, applying model-derived specialization boosts.
    /// Re-registering an existing ID replaces the profile.
    pub async fn register(&self, mut profile: WorkerProfile) {
        if profile.specialization_boost.is_empty() {
            profile.specialization_boost = model_specializations(&profile.model_name);
        }
        let mut inner = self.inner.lock().await;
        if inner.workers.contains_key(&profile.worker_id) {
            warn!(worker_id = %profile.worker_id, "Worker already registered, replacing profile");
        }
        info!(worker_id = %profile.worker_id, model = %profile.model_name, "Registered worker");
        inner.workers.insert(profile.worker_id.clone(), profile);
    }

    /// Remove a worker. Returns false if it was not registered.
    pub async fn unregister(&self, worker_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.outcomes.remove(worker_id);
        let removed = inner.workers.remove(worker_id).is_some();
        if removed {
            info!(worker_id, "Unregistered worker");
        } else {
            warn!(worker_id, "Worker not found for unregistration");
        }
        removed
    }

    /// A copy of one profile
    pub async fn get(&self, worker_id: &str) -> Option<WorkerProfile> {
        self.inner.lock().await.workers.get(worker_id).cloned()
    }

    /// A copy of every profile
    pub async fn all(&self) -> Vec<WorkerProfile> {
        self.inner.lock().await.workers.values().cloned().collect()
    }

    /// Set a worker's runtime state
    pub async fn mark_state(&self, worker_id: &str, state: WorkerState) {
        let mut inner = self.inner.lock().await;
        if let Some(worker) = inner.workers.get_mut(worker_id) {
            debug!(worker_id, %state, "Worker state change");
            worker.state = state;
        }
    }

    /// Atomically re-check availability and claim a slot for a task.
    ///
    /// Returns false if the worker vanished or filled up since it was
    /// scored, in which case the caller should re-select.
    pub async fn try_assign(&self, worker_id: &str, task_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(worker) = inner.workers.get_mut(worker_id) else {
            return false;
        };
        if !worker.is_available() {
            return false;
        }
        worker.current_tasks.push(task_id.to_string());
        worker.refresh_load();
        worker.last_assigned = Some(Utc::now());
        true
    }

    /// Release a claimed slot without recording an outcome (e.g. the task
    /// was never handed to the worker).
    pub async fn release_slot(&self, worker_id: &str, task_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(worker) = inner.workers.get_mut(worker_id) {
            worker.current_tasks.retain(|t| t != task_id);
            worker.refresh_load();
        }
    }

    /// Release a task slot and fold the outcome into the worker's metrics:
    /// EMA average duration, rolling success over the last 10 outcomes, and
    /// a multiplicative performance score clamped to [0.5, 2.0].
    ///
    /// Returns false if the worker or task was unknown.
    pub async fn record_completion(
        &self,
        worker_id: &str,
        task_id: &str,
        success: bool,
        duration_minutes: Option<f64>,
    ) -> bool {
        let mut inner = self.inner.lock().await;

        let outcomes = inner.outcomes.entry(worker_id.to_string()).or_default();
        outcomes.push_back(success);
        while outcomes.len() > SUCCESS_WINDOW {
            outcomes.pop_front();
        }
        let success_rate = outcomes.iter().filter(|s| **s).count() as f64 / outcomes.len() as f64;

        let Some(worker) = inner.workers.get_mut(worker_id) else {
            warn!(worker_id, "Worker not found for completion");
            return false;
        };

        if let Some(pos) = worker.current_tasks.iter().position(|t| t == task_id) {
            worker.current_tasks.remove(pos);
            worker.refresh_load();
        } else {
            warn!(worker_id, task_id, "Task not active on worker at completion");
        }

        if success {
            worker.total_tasks_completed += 1;
            if let Some(duration) = duration_minutes {
                worker.average_task_duration =
                    DURATION_ALPHA * duration + (1.0 - DURATION_ALPHA) * worker.average_task_duration;
            }
        }

        worker.success_rate = success_rate;
        if success_rate >= 0.9 {
            worker.performance_score = (worker.performance_score * 1.05).min(2.0);
        } else if success_rate <= 0.7 {
            worker.performance_score = (worker.performance_score * 0.95).max(0.5);
        }

        debug!(
            worker_id,
            task_id,
            success,
            success_rate = worker.success_rate,
            performance_score = worker.performance_score,
            "Recorded completion"
        );
        true
    }

    /// Workers currently registered
    pub async fn len(&self) -> usize {
        self.inner.lock().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Specialization boosts derived from the model name. Larger models get
/// planning-shaped boosts, smaller ones implementation-shaped boosts.
/// These values are configuration, not contract.
fn model_specializations(model_name: &str) -> HashMap<Capability, f64> {
    let name = model_name.to_lowercase();
    let mut boosts = HashMap::new();
    if name.contains("opus") {
        boosts.insert(Capability::Design, 0.8);
        boosts.insert(Capability::Research, 0.7);
        boosts.insert(Capability::Review, 0.6);
    } else if name.contains("sonnet") {
        boosts.insert(Capability::Code, 0.8);
        boosts.insert(Capability::Refactoring, 0.6);
        boosts.insert(Capability::Debugging, 0.5);
    } else if name.contains("haiku") {
        boosts.insert(Capability::Documentation, 0.6);
        boosts.insert(Capability::Testing, 0.5);
    }
    boosts
}

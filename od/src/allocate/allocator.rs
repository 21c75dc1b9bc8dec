//! Worker allocation
//!
//! Scores every worker that passes the can-handle gate and claims the best
//! one. Selection works on a registry snapshot; the claim itself re-checks
//! availability atomically, so a concurrent allocation can at worst force a
//! re-selection, never an oversubscription.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::worker::{Capability, Complexity, WorkerProfile, WorkerRegistry};

use super::requirements::{RequirementsAnalyzer, TaskRequirements};

/// Historical per-worker aggregates the scorer can fold in
#[derive(Debug, Clone, Default)]
pub struct WorkerHistory {
    pub total_tasks: u64,
    pub success_rate: f64,
    /// Minutes
    pub average_duration: f64,
    /// Per-capability quality in [0, 1]
    pub capability_scores: HashMap<Capability, f64>,
}

/// One allocation decision, kept for analytics
#[derive(Debug, Clone)]
pub struct AllocationRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub worker_id: String,
    pub suitability_score: f64,
    pub complexity: Complexity,
    pub required_capabilities: Vec<Capability>,
    pub estimated_duration: u64,
    pub completed: Option<bool>,
}

/// Summary of allocation behavior
#[derive(Debug, Clone, Default)]
pub struct AllocationAnalytics {
    pub total_allocations: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub per_worker: HashMap<String, u64>,
    /// Fraction of completed allocations that succeeded
    pub efficiency: f64,
}

struct AllocatorInner {
    history: Vec<AllocationRecord>,
    worker_history: HashMap<String, WorkerHistory>,
}

/// Scores workers for tasks and tracks allocation history
pub struct Allocator {
    registry: Arc<WorkerRegistry>,
    analyzer: RequirementsAnalyzer,
    inner: Mutex<AllocatorInner>,
}

impl Allocator {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            analyzer: RequirementsAnalyzer::new(),
            inner: Mutex::new(AllocatorInner {
                history: Vec::new(),
                worker_history: HashMap::new(),
            }),
        }
    }

    /// The registry this allocator selects from
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Derive requirements from task text
    pub fn analyze(&self, title: &str, description: &str) -> TaskRequirements {
        self.analyzer.analyze(title, description)
    }

    /// Seed historical aggregates for a worker (e.g. from the result store)
    pub async fn set_worker_history(&self, worker_id: &str, history: WorkerHistory) {
        self.inner
            .lock()
            .await
            .worker_history
            .insert(worker_id.to_string(), history);
    }

    /// The can-handle gate: complexity ceiling, capability superset,
    /// availability.
    pub fn can_handle(worker: &WorkerProfile, requirements: &TaskRequirements) -> bool {
        worker.max_complexity >= requirements.complexity
            && requirements.required_capabilities.is_subset(&worker.capabilities)
            && worker.is_available()
    }

    /// 1.0 on an exact tier match, 0.8 − 0.1·overshoot when over-qualified,
    /// 0 when under-qualified (filtered earlier by the gate).
    pub fn complexity_match_factor(worker_tier: Complexity, task_tier: Complexity) -> f64 {
        let worker = worker_tier as i32;
        let task = task_tier as i32;
        if worker == task {
            1.0
        } else if worker > task {
            0.8 - 0.1 * (worker - task - 1) as f64
        } else {
            0.0
        }
    }

    /// Suitability of one worker for one task; higher is better
    pub fn score(worker: &WorkerProfile, requirements: &TaskRequirements, history: Option<&WorkerHistory>) -> f64 {
        // Unspecialized capabilities still earn a small base boost
        let mut boost_sum = 0.0;
        for capability in &requirements.required_capabilities {
            boost_sum += worker.specialization_boost.get(capability).copied().unwrap_or(0.5);
        }

        let mut score = worker.performance_score * (1.0 + boost_sum);
        score *= 1.0 - 0.5 * worker.current_load;
        score *= worker.success_rate;
        score *= Self::complexity_match_factor(worker.max_complexity, requirements.complexity);

        if let Some(history) = history.filter(|h| h.total_tasks >= 3) {
            if history.success_rate >= 0.9 {
                score *= 1.2;
            } else if history.success_rate <= 0.5 {
                score *= 0.8;
            }

            if history.average_duration > 0.0 {
                let expected = requirements.estimated_duration as f64;
                if history.average_duration < expected * 0.8 {
                    score *= 1.15;
                } else if history.average_duration > expected * 1.5 {
                    score *= 0.85;
                }
            }

            for capability in &requirements.required_capabilities {
                if let Some(cap_score) = history.capability_scores.get(capability) {
                    // Scale from 0.8 to 1.2
                    score *= 0.8 + cap_score * 0.4;
                }
            }
        }

        score
    }

    /// Score all eligible workers for the given requirements, best first.
    /// Ties break on lower load, then worker ID, for determinism.
    pub async fn rank(&self, requirements: &TaskRequirements) -> Vec<(WorkerProfile, f64)> {
        let inner = self.inner.lock().await;
        let mut ranked: Vec<(WorkerProfile, f64)> = self
            .registry
            .all()
            .await
            .into_iter()
            .filter(|w| Self::can_handle(w, requirements))
            .map(|w| {
                let history = inner.worker_history.get(&w.worker_id);
                let score = Self::score(&w, requirements, history);
                (w, score)
            })
            .collect();

        ranked.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.current_load
                        .partial_cmp(&b.current_load)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.worker_id.cmp(&b.worker_id))
        });
        ranked
    }

    /// Allocate the best available worker for a task. Returns the worker ID,
    /// or `None` when no registered worker passes the gate.
    pub async fn allocate(
        &self,
        task_id: &str,
        title: &str,
        description: &str,
        requirements: Option<TaskRequirements>,
    ) -> Option<String> {
        let requirements = requirements.unwrap_or_else(|| self.analyze(title, description));

        // A concurrent allocation may claim our pick between scoring and
        // assignment; re-select a bounded number of times.
        for _ in 0..3 {
            let ranked = self.rank(&requirements).await;
            let Some((winner, score)) = ranked.into_iter().next() else {
                warn!(task_id, "No suitable worker for task");
                return None;
            };

            if self.registry.try_assign(&winner.worker_id, task_id).await {
                let mut inner = self.inner.lock().await;
                inner.history.push(AllocationRecord {
                    timestamp: Utc::now(),
                    task_id: task_id.to_string(),
                    worker_id: winner.worker_id.clone(),
                    suitability_score: score,
                    complexity: requirements.complexity,
                    required_capabilities: requirements.required_capabilities.iter().copied().collect(),
                    estimated_duration: requirements.estimated_duration,
                    completed: None,
                });
                info!(
                    task_id,
                    worker_id = %winner.worker_id,
                    score = format!("{:.2}", score),
                    complexity = %requirements.complexity,
                    "Allocated worker"
                );
                return Some(winner.worker_id);
            }
            debug!(task_id, worker_id = %winner.worker_id, "Lost allocation race, re-selecting");
        }
        None
    }

    /// Claim a specific worker for a task (rule-based routing). The worker
    /// must still pass the can-handle gate.
    pub async fn allocate_specific(&self, task_id: &str, worker_id: &str, requirements: &TaskRequirements) -> bool {
        let Some(worker) = self.registry.get(worker_id).await else {
            return false;
        };
        if !Self::can_handle(&worker, requirements) {
            return false;
        }
        if !self.registry.try_assign(worker_id, task_id).await {
            return false;
        }

        let history = {
            let inner = self.inner.lock().await;
            inner.worker_history.get(worker_id).cloned()
        };
        let score = Self::score(&worker, requirements, history.as_ref());

        let mut inner = self.inner.lock().await;
        inner.history.push(AllocationRecord {
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            suitability_score: score,
            complexity: requirements.complexity,
            required_capabilities: requirements.required_capabilities.iter().copied().collect(),
            estimated_duration: requirements.estimated_duration,
            completed: None,
        });
        info!(task_id, worker_id, "Allocated worker via rule");
        true
    }

    /// Historical aggregates for a worker, if seeded
    pub async fn worker_history(&self, worker_id: &str) -> Option<WorkerHistory> {
        self.inner.lock().await.worker_history.get(worker_id).cloned()
    }

    /// Release a worker from a task, recording the outcome
    pub async fn release(&self, worker_id: &str, task_id: &str, success: bool, duration_minutes: Option<f64>) -> bool {
        let released = self
            .registry
            .record_completion(worker_id, task_id, success, duration_minutes)
            .await;

        let mut inner = self.inner.lock().await;
        if let Some(record) = inner
            .history
            .iter_mut()
            .rev()
            .find(|r| r.task_id == task_id && r.worker_id == worker_id)
        {
            record.completed = Some(success);
        }
        debug!(worker_id, task_id, success, "Released worker");
        released
    }

    /// Allocation analytics over the recorded history
    pub async fn analytics(&self) -> AllocationAnalytics {
        let inner = self.inner.lock().await;
        let mut analytics = AllocationAnalytics {
            total_allocations: inner.history.len() as u64,
            ..Default::default()
        };

        for record in &inner.history {
            *analytics.per_worker.entry(record.worker_id.clone()).or_default() += 1;
            if let Some(success) = record.completed {
                analytics.completed += 1;
                if success {
                    analytics.succeeded += 1;
                }
            }
        }
        if analytics.completed > 0 {
            analytics.efficiency = analytics.succeeded as f64 / analytics.completed as f64;
        }
        analytics
    }

    /// The most recent allocation record for a task
    pub async fn last_allocation(&self, task_id: &str) -> Option<AllocationRecord> {
        let inner = self.inner.lock().await;
        inner.history.iter().rev().find(|r| r.task_id == task_id).cloned()
    }
}

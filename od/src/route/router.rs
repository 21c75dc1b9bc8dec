//! Task routing
//!
//! Two decision procedures layered over the allocator: an ordered rule
//! list evaluated first, then a named strategy when no rule matches. Every
//! decision lands in a bounded ring buffer for observability, and per-
//! strategy outcomes feed an optional weight rebalancer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::allocate::{Allocator, TaskRequirements};
use crate::worker::WorkerProfile;

use super::rules::{RouteTask, RoutingRule, RuleTarget, default_rules};

/// Bound on the routing-decision ring buffer
const HISTORY_LIMIT: usize = 1000;

/// Minimum completed routes before a strategy's stats count
const MIN_STRATEGY_SAMPLES: u64 = 10;

/// Named worker-selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingStrategy {
    CapabilityBased,
    LoadBalanced,
    PerformanceOptimized,
    ComplexityMatched,
    Hybrid,
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CapabilityBased => "capability_based",
            Self::LoadBalanced => "load_balanced",
            Self::PerformanceOptimized => "performance_optimized",
            Self::ComplexityMatched => "complexity_matched",
            Self::Hybrid => "hybrid",
        };
        write!(f, "{}", s)
    }
}

/// How a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    RuleBased,
    Strategy(RoutingStrategy),
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuleBased => write!(f, "rule_based"),
            Self::Strategy(s) => write!(f, "{}", s),
        }
    }
}

/// One routing decision
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub task_id: String,
    pub selected_worker: Option<String>,
    pub method: RouteMethod,
    pub score: f64,
    /// Top candidates as (worker_id, score), best first, at most five
    pub alternatives: Vec<(String, f64)>,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-strategy outcome counters
#[derive(Debug, Clone, Default)]
pub struct RoutePerformance {
    pub total_routed: u64,
    pub completed: u64,
    pub successes: u64,
    pub total_duration_secs: f64,
}

impl RoutePerformance {
    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.successes as f64 / self.completed as f64
        }
    }

    pub fn avg_duration_secs(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_duration_secs / self.completed as f64
        }
    }
}

/// Routing analytics summary
#[derive(Debug, Clone, Default)]
pub struct RoutingAnalytics {
    pub total_routed: usize,
    pub active_rules: usize,
    pub strategy_distribution: HashMap<String, u64>,
    pub worker_distribution: HashMap<String, u64>,
    pub strategy_weights: HashMap<String, f64>,
}

struct RouterInner {
    rules: Vec<RoutingRule>,
    history: VecDeque<RoutingDecision>,
    weights: HashMap<RoutingStrategy, f64>,
    performance: HashMap<RoutingStrategy, RoutePerformance>,
}

/// Routes tasks to workers via rules and strategies
pub struct TaskRouter {
    allocator: Arc<Allocator>,
    default_strategy: RoutingStrategy,
    inner: Mutex<RouterInner>,
}

impl TaskRouter {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self::with_strategy(allocator, RoutingStrategy::Hybrid)
    }

    pub fn with_strategy(allocator: Arc<Allocator>, default_strategy: RoutingStrategy) -> Self {
        let mut rules = default_rules();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let weights = HashMap::from([
            (RoutingStrategy::CapabilityBased, 0.3),
            (RoutingStrategy::LoadBalanced, 0.2),
            (RoutingStrategy::PerformanceOptimized, 0.3),
            (RoutingStrategy::ComplexityMatched, 0.2),
        ]);

        Self {
            allocator,
            default_strategy,
            inner: Mutex::new(RouterInner {
                rules,
                history: VecDeque::new(),
                weights,
                performance: HashMap::new(),
            }),
        }
    }

    /// Add a routing rule. Returns false on a duplicate rule ID.
    pub async fn add_rule(&self, rule: RoutingRule) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.rules.iter().any(|r| r.rule_id == rule.rule_id) {
            warn!(rule_id = %rule.rule_id, "Routing rule already exists");
            return false;
        }
        info!(rule_id = %rule.rule_id, name = %rule.name, "Added routing rule");
        inner.rules.push(rule);
        inner.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        true
    }

    /// Remove a routing rule by ID
    pub async fn remove_rule(&self, rule_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.rules.len();
        inner.rules.retain(|r| r.rule_id != rule_id);
        inner.rules.len() != before
    }

    /// Route a task to a worker. The returned decision has
    /// `selected_worker = None` when no registered worker qualifies.
    pub async fn route(&self, task: &RouteTask, strategy: Option<RoutingStrategy>) -> RoutingDecision {
        let requirements = self.allocator.analyze(&task.title, &task.description);

        // Rule shortcut first
        let matched: Option<(String, RuleTarget)> = {
            let inner = self.inner.lock().await;
            inner
                .rules
                .iter()
                .find(|r| r.matches(task))
                .map(|r| (r.name.clone(), r.target.clone()))
        };

        if let Some((rule_name, target)) = matched {
            debug!(task_id = %task.id, rule = %rule_name, "Task matched routing rule");
            if let Some(decision) = self.route_by_rule(task, &rule_name, &target, &requirements).await {
                self.record(decision.clone()).await;
                return decision;
            }
            // Fall through to strategies when the rule target cannot take it
        }

        let strategy = strategy.unwrap_or(self.default_strategy);
        let decision = self.route_by_strategy(task, strategy, &requirements).await;
        self.record(decision.clone()).await;
        decision
    }

    async fn route_by_rule(
        &self,
        task: &RouteTask,
        rule_name: &str,
        target: &RuleTarget,
        requirements: &TaskRequirements,
    ) -> Option<RoutingDecision> {
        let workers = self.allocator.registry().all().await;

        let candidate: Option<WorkerProfile> = match target {
            RuleTarget::Worker(id) => workers.into_iter().find(|w| &w.worker_id == id),
            RuleTarget::Capability(cap) => workers
                .into_iter()
                .filter(|w| w.capabilities.contains(cap) && w.is_available())
                .max_by(|a, b| {
                    a.performance_score
                        .partial_cmp(&b.performance_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.worker_id.cmp(&a.worker_id))
                }),
            RuleTarget::BestPerformer => workers
                .into_iter()
                .filter(|w| w.is_available())
                .max_by(|a, b| {
                    a.performance_score
                        .partial_cmp(&b.performance_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.worker_id.cmp(&a.worker_id))
                }),
        };

        let worker = candidate?;
        if !self.allocator.allocate_specific(&task.id, &worker.worker_id, requirements).await {
            return None;
        }

        Some(RoutingDecision {
            task_id: task.id.clone(),
            selected_worker: Some(worker.worker_id.clone()),
            method: RouteMethod::RuleBased,
            score: worker.performance_score,
            alternatives: Vec::new(),
            reasoning: format!("Matched rule: {}", rule_name),
            timestamp: Utc::now(),
        })
    }

    async fn route_by_strategy(
        &self,
        task: &RouteTask,
        strategy: RoutingStrategy,
        requirements: &TaskRequirements,
    ) -> RoutingDecision {
        let weights = {
            let inner = self.inner.lock().await;
            inner.weights.clone()
        };

        let mut scored: Vec<(WorkerProfile, f64)> = Vec::new();
        for worker in self.allocator.registry().all().await {
            if !Allocator::can_handle(&worker, requirements) {
                continue;
            }
            let score = match strategy {
                RoutingStrategy::CapabilityBased => capability_score(&worker, requirements),
                RoutingStrategy::LoadBalanced => 1.0 - worker.current_load,
                RoutingStrategy::PerformanceOptimized => self.performance_score(&worker, requirements).await,
                RoutingStrategy::ComplexityMatched => {
                    Allocator::complexity_match_factor(worker.max_complexity, requirements.complexity)
                }
                RoutingStrategy::Hybrid => {
                    let cap = capability_score(&worker, requirements);
                    let load = 1.0 - worker.current_load;
                    let perf = self.performance_score(&worker, requirements).await;
                    let complexity =
                        Allocator::complexity_match_factor(worker.max_complexity, requirements.complexity);
                    cap * weights[&RoutingStrategy::CapabilityBased]
                        + load * weights[&RoutingStrategy::LoadBalanced]
                        + perf * weights[&RoutingStrategy::PerformanceOptimized]
                        + complexity * weights[&RoutingStrategy::ComplexityMatched]
                }
            };
            scored.push((worker, score));
        }

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.worker_id.cmp(&b.worker_id))
        });

        let alternatives: Vec<(String, f64)> = scored
            .iter()
            .take(5)
            .map(|(w, s)| (w.worker_id.clone(), *s))
            .collect();

        let mut selected = None;
        let mut score = 0.0;
        for (worker, candidate_score) in &scored {
            if self
                .allocator
                .allocate_specific(&task.id, &worker.worker_id, requirements)
                .await
            {
                selected = Some(worker.worker_id.clone());
                score = *candidate_score;
                break;
            }
        }

        let reasoning = match &selected {
            Some(worker) => format!("{} selected {} with score {:.2}", strategy, worker, score),
            None => "No suitable workers available".to_string(),
        };

        if selected.is_none() {
            warn!(task_id = %task.id, %strategy, "Routing found no worker");
        }

        RoutingDecision {
            task_id: task.id.clone(),
            selected_worker: selected,
            method: RouteMethod::Strategy(strategy),
            score,
            alternatives,
            reasoning,
            timestamp: Utc::now(),
        }
    }

    /// Historical performance in [0, 1]; 0.5 when there is no usable history
    async fn performance_score(&self, worker: &WorkerProfile, requirements: &TaskRequirements) -> f64 {
        let Some(history) = self.allocator.worker_history(&worker.worker_id).await else {
            return 0.5;
        };
        if history.total_tasks < 3 {
            return 0.5;
        }

        let mut score = history.success_rate;
        if history.average_duration > 0.0 {
            let expected = requirements.estimated_duration as f64;
            if history.average_duration < expected * 0.8 {
                score *= 1.1;
            } else if history.average_duration > expected * 1.5 {
                score *= 0.9;
            }
        }
        score.min(1.0)
    }

    async fn record(&self, decision: RoutingDecision) {
        let mut inner = self.inner.lock().await;
        if decision.selected_worker.is_some() {
            if let RouteMethod::Strategy(strategy) = decision.method {
                inner.performance.entry(strategy).or_default().total_routed += 1;
            }
        }
        inner.history.push_back(decision);
        while inner.history.len() > HISTORY_LIMIT {
            inner.history.pop_front();
        }
    }

    /// Feed a task outcome back into per-strategy statistics
    pub async fn update_route_performance(&self, task_id: &str, success: bool, duration_secs: f64) {
        let mut inner = self.inner.lock().await;
        let Some(decision) = inner.history.iter().rev().find(|d| d.task_id == task_id) else {
            return;
        };
        let RouteMethod::Strategy(strategy) = decision.method else {
            return;
        };

        let perf = inner.performance.entry(strategy).or_default();
        perf.completed += 1;
        if success {
            perf.successes += 1;
        }
        perf.total_duration_secs += duration_secs;
        debug!(
            task_id,
            %strategy,
            success_rate = perf.success_rate(),
            "Updated route performance"
        );
    }

    /// Rebalance strategy weights toward observed effectiveness: 70% old
    /// weight, 30% observed share, then L1-normalized.
    pub async fn optimize_weights(&self) {
        let mut inner = self.inner.lock().await;

        let mut effectiveness: HashMap<RoutingStrategy, f64> = HashMap::new();
        for (strategy, perf) in &inner.performance {
            if perf.completed < MIN_STRATEGY_SAMPLES {
                continue;
            }
            let mut value = perf.success_rate();
            if perf.avg_duration_secs() > 0.0 {
                let speed = 1.0 / (1.0 + perf.avg_duration_secs() / 3600.0);
                value = value * 0.7 + speed * 0.3;
            }
            effectiveness.insert(*strategy, value);
        }

        let total: f64 = effectiveness.values().sum();
        if total <= 0.0 {
            return;
        }

        for (strategy, value) in &effectiveness {
            if let Some(weight) = inner.weights.get_mut(strategy) {
                let target = value / total;
                *weight = *weight * 0.7 + target * 0.3;
            }
        }

        let sum: f64 = inner.weights.values().sum();
        if sum > 0.0 {
            for weight in inner.weights.values_mut() {
                *weight /= sum;
            }
        }

        info!(weights = ?inner.weights, "Optimized routing weights");
    }

    /// Current strategy weights
    pub async fn weights(&self) -> HashMap<RoutingStrategy, f64> {
        self.inner.lock().await.weights.clone()
    }

    /// The most recent decisions, newest last
    pub async fn recent_decisions(&self, limit: usize) -> Vec<RoutingDecision> {
        let inner = self.inner.lock().await;
        inner.history.iter().rev().take(limit).rev().cloned().collect()
    }

    /// Routing analytics summary
    pub async fn analytics(&self) -> RoutingAnalytics {
        let inner = self.inner.lock().await;
        let mut analytics = RoutingAnalytics {
            total_routed: inner.history.len(),
            active_rules: inner.rules.iter().filter(|r| r.enabled).count(),
            ..Default::default()
        };
        for decision in &inner.history {
            *analytics
                .strategy_distribution
                .entry(decision.method.to_string())
                .or_default() += 1;
            if let Some(worker) = &decision.selected_worker {
                *analytics.worker_distribution.entry(worker.clone()).or_default() += 1;
            }
        }
        for (strategy, weight) in &inner.weights {
            analytics.strategy_weights.insert(strategy.to_string(), *weight);
        }
        analytics
    }
}

/// Capability overlap in [0, 1] with a small specialization bonus
fn capability_score(worker: &WorkerProfile, requirements: &TaskRequirements) -> f64 {
    if requirements.required_capabilities.is_empty() {
        return 1.0;
    }
    let matched = requirements
        .required_capabilities
        .intersection(&worker.capabilities)
        .count();
    let mut score = matched as f64 / requirements.required_capabilities.len() as f64;

    for capability in &requirements.required_capabilities {
        if let Some(boost) = worker.specialization_boost.get(capability) {
            score += boost * 0.2;
        }
    }
    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{Capability, Complexity, WorkerProfile, WorkerRegistry, capabilities};

    async fn router_with(workers: Vec<WorkerProfile>) -> TaskRouter {
        let registry = Arc::new(WorkerRegistry::new());
        for w in workers {
            registry.register(w).await;
        }
        TaskRouter::new(Arc::new(Allocator::new(registry)))
    }

    fn worker(id: &str, caps: &[Capability]) -> WorkerProfile {
        WorkerProfile::new(id, "model", capabilities(caps), Complexity::High, 2)
    }

    fn task(id: &str, title: &str, description: &str, priority: u8) -> RouteTask {
        RouteTask {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            priority,
        }
    }

    #[tokio::test]
    async fn test_docs_rule_routes_to_documentation_worker() {
        let router = router_with(vec![
            worker("coder", &[Capability::Code]),
            worker("writer", &[Capability::Documentation, Capability::Code]),
        ])
        .await;

        let decision = router
            .route(&task("1", "Write README", "add a readme document for the project", 5), None)
            .await;

        assert_eq!(decision.selected_worker.as_deref(), Some("writer"));
        assert_eq!(decision.method, RouteMethod::RuleBased);
    }

    #[tokio::test]
    async fn test_critical_rule_routes_to_best_performer() {
        let registry = Arc::new(WorkerRegistry::new());
        let mut strong = worker("strong", &[Capability::Code]);
        strong.performance_score = 1.8;
        registry.register(strong).await;
        registry.register(worker("plain", &[Capability::Code])).await;
        let router = TaskRouter::new(Arc::new(Allocator::new(registry)));

        let decision = router
            .route(&task("1", "Ship the release", "implement the final code drop", 9), None)
            .await;

        assert_eq!(decision.selected_worker.as_deref(), Some("strong"));
        assert_eq!(decision.method, RouteMethod::RuleBased);
    }

    #[tokio::test]
    async fn test_strategy_fallback_when_no_rule_matches() {
        let router = router_with(vec![worker("coder", &[Capability::Code])]).await;

        let decision = router
            .route(&task("1", "Implement parser", "write the parser code", 5), None)
            .await;

        assert_eq!(decision.selected_worker.as_deref(), Some("coder"));
        assert_eq!(decision.method, RouteMethod::Strategy(RoutingStrategy::Hybrid));
        assert!(!decision.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_load_balanced_picks_least_loaded() {
        let registry = Arc::new(WorkerRegistry::new());
        registry.register(worker("busy", &[Capability::Code])).await;
        registry.register(worker("free", &[Capability::Code])).await;
        let allocator = Arc::new(Allocator::new(registry.clone()));
        registry.try_assign("busy", "existing").await;

        let router = TaskRouter::new(allocator);
        let decision = router
            .route(
                &task("1", "Implement parser", "write the parser code", 5),
                Some(RoutingStrategy::LoadBalanced),
            )
            .await;

        assert_eq!(decision.selected_worker.as_deref(), Some("free"));
    }

    #[tokio::test]
    async fn test_no_worker_available() {
        let router = router_with(vec![]).await;
        let decision = router
            .route(&task("1", "Implement parser", "write the parser code", 5), None)
            .await;

        assert!(decision.selected_worker.is_none());
        assert!(decision.reasoning.contains("No suitable workers"));
    }

    #[tokio::test]
    async fn test_decisions_recorded_and_bounded() {
        let router = router_with(vec![worker("coder", &[Capability::Code])]).await;

        let decision = router
            .route(&task("1", "Implement parser", "write the parser code", 5), None)
            .await;
        assert!(decision.selected_worker.is_some());

        let recent = router.recent_decisions(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].task_id, "1");
    }

    #[tokio::test]
    async fn test_update_route_performance() {
        let router = router_with(vec![worker("coder", &[Capability::Code])]).await;

        router
            .route(&task("1", "Implement parser", "write the parser code", 5), None)
            .await;
        router.update_route_performance("1", true, 12.0).await;

        let analytics = router.analytics().await;
        assert_eq!(analytics.total_routed, 1);
        assert_eq!(analytics.strategy_distribution.get("hybrid"), Some(&1));
    }

    #[tokio::test]
    async fn test_optimize_weights_stays_normalized() {
        let registry = Arc::new(WorkerRegistry::new());
        // Two workers so repeated routes always find capacity
        registry.register(worker("a", &[Capability::Code])).await;
        registry.register(worker("b", &[Capability::Code])).await;
        let allocator = Arc::new(Allocator::new(registry));
        let router = TaskRouter::new(allocator.clone());

        for i in 0..12 {
            let id = format!("t{}", i);
            let decision = router
                .route(
                    &task(&id, "Implement parser", "write the parser code", 5),
                    Some(RoutingStrategy::PerformanceOptimized),
                )
                .await;
            if let Some(worker_id) = &decision.selected_worker {
                router.update_route_performance(&id, true, 5.0).await;
                allocator.release(worker_id, &id, true, None).await;
            }
        }

        router.optimize_weights().await;
        let weights = router.weights().await;
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // The only strategy with enough samples gained weight
        assert!(weights[&RoutingStrategy::PerformanceOptimized] > 0.3);
    }

    #[tokio::test]
    async fn test_rule_add_remove() {
        let router = router_with(vec![worker("coder", &[Capability::Code])]).await;

        let added = router
            .add_rule(RoutingRule::new(
                "custom",
                "Custom rule",
                |t| t.title.contains("special"),
                RuleTarget::Worker("coder".to_string()),
                95,
            ))
            .await;
        assert!(added);

        // Duplicate rejected
        let duplicate = router
            .add_rule(RoutingRule::new(
                "custom",
                "Custom again",
                |_| true,
                RuleTarget::BestPerformer,
                1,
            ))
            .await;
        assert!(!duplicate);

        let decision = router
            .route(&task("1", "special delivery", "no keywords", 5), None)
            .await;
        assert_eq!(decision.selected_worker.as_deref(), Some("coder"));
        assert_eq!(decision.method, RouteMethod::RuleBased);

        assert!(router.remove_rule("custom").await);
        assert!(!router.remove_rule("custom").await);
    }
}

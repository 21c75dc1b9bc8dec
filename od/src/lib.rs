//! orchd - task orchestrator for a fleet of LLM worker processes
//!
//! A user submits a plan of tasks; orchd validates it, decomposes it into
//! a dependency-gated schedule, routes each task to the most suitable
//! worker, reviews the output, applies the resulting file changes, and
//! rolls back on failure.
//!
//! # Core pieces
//!
//! - [`worker`] - worker protocol, profiles, and the live registry
//! - [`allocate`] - requirements analysis and suitability scoring
//! - [`route`] - rule shortcuts and strategy-based routing
//! - [`pool`] - queueing, health checks, autoscaling
//! - [`lifecycle`] - the persisted per-task state machine
//! - [`validate`] - the pre-execution plan gate
//! - [`review`] - output and file-change review
//! - [`apply`] - change extraction, conflicts, fuzzy application
//! - [`orchestrator`] - composition and the main loop
//!
//! Persistent state lives in the [`graphstore`] and [`snapstore`] crates.

pub mod allocate;
pub mod apply;
pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod orchestrator;
pub mod pool;
pub mod review;
pub mod route;
pub mod text;
pub mod validate;
pub mod worker;

// Re-export commonly used types
pub use allocate::{AllocationRecord, Allocator, RequirementsAnalyzer, TaskRequirements, WorkerHistory};
pub use apply::{ApplyReport, ChangeExtractor, ChangeProposal, ChangeType, ConflictResolution, ReviewApplier};
pub use config::Config;
pub use lifecycle::{LifecycleContext, LifecycleManager, ProcessState, StateChange};
pub use orchestrator::{Orchestrator, SubmitOutcome, TaskSpec, TaskView};
pub use pool::{AssignOutcome, PoolConfig, PoolManager, PoolStats, QueuedTask, ScalingPolicy, WorkerPool};
pub use review::{FileChange, ReviewFinding, ReviewReport, Reviewer, Severity};
pub use route::{RouteTask, RoutingDecision, RoutingStrategy, TaskRouter};
pub use validate::{PlanReport, PlanValidator, ValidationIssue, ValidationOutcome};
pub use worker::{
    Capability, Complexity, Heartbeat, ScriptedWorker, Worker, WorkerOutcome, WorkerProfile, WorkerRegistry,
    WorkerRequest, WorkerState,
};

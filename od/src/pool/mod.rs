//! Worker pool management
//!
//! Queueing, per-worker health, autoscaling with cooldowns, and the pool
//! manager that owns named pools.

mod config;
mod core;
mod manager;
mod queue;

pub use config::{PoolConfig, ScalingPolicy, WorkerTemplate};
pub use core::{
    PoolError, PoolResult, PoolStats, PoolWorkerMetrics, ScaleAction, ScalingEvent, WorkerPool,
};
pub use manager::PoolManager;
pub use queue::{AssignOutcome, QueuedTask};

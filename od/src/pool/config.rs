//! Pool configuration

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::worker::{Capability, Complexity};

/// How eagerly a pool adds workers under load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScalingPolicy {
    /// One worker at a time
    Conservative,
    /// Up to two at a time
    #[default]
    Balanced,
    /// Sized by queue depth
    Aggressive,
}

/// Template for workers spawned by autoscaling
#[derive(Debug, Clone)]
pub struct WorkerTemplate {
    pub model_name: String,
    pub capabilities: HashSet<Capability>,
    pub max_complexity: Complexity,
    pub max_concurrent_tasks: usize,
}

impl Default for WorkerTemplate {
    fn default() -> Self {
        Self {
            model_name: "default-model".to_string(),
            capabilities: [Capability::Code, Capability::Research].into_iter().collect(),
            max_complexity: Complexity::High,
            max_concurrent_tasks: 1,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scaling_policy: ScalingPolicy,
    /// Scale up above this utilization
    pub scale_up_threshold: f64,
    /// Scale down below this utilization
    pub scale_down_threshold: f64,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    pub health_check_interval: Duration,
    /// Idle workers past this age are reaped (never below min)
    pub max_idle_time: Duration,
    /// Consecutive errors before a worker is marked failed
    pub failure_threshold: u32,
    /// Failed/offline workers are rehabilitated after this long
    pub recovery_timeout: Duration,
    /// Bound on a single worker assignment
    pub worker_timeout: Duration,
    /// Template for autoscaled workers
    pub template: WorkerTemplate,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 10,
            scaling_policy: ScalingPolicy::Balanced,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_up_cooldown: Duration::from_secs(300),
            scale_down_cooldown: Duration::from_secs(600),
            health_check_interval: Duration::from_secs(60),
            max_idle_time: Duration::from_secs(1800),
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(900),
            worker_timeout: Duration::from_secs(300),
            template: WorkerTemplate::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 10);
        assert!((config.scale_up_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.scaling_policy, ScalingPolicy::Balanced);
    }
}

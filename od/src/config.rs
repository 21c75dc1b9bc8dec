//! orchd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::apply::ConflictResolution;
use crate::pool::{PoolConfig, ScalingPolicy};

/// Main orchd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project identity and orchestration behavior
    pub orchestrator: OrchestratorConfig,

    /// Worker pool sizing and scaling
    pub pool: PoolSection,

    /// Per-task lifecycle policy
    pub lifecycle: LifecycleSection,

    /// Review gate thresholds
    pub review: ReviewSection,

    /// Change application policy
    pub apply: ApplySection,

    /// Plan validation limits
    pub validation: ValidationSection,

    /// On-disk layout
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, project-local
    /// `.orchd.yml`, then `~/.config/orchd/orchd.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".orchd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orchd").join("orchd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Build the pool configuration from the pool section
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_workers: self.pool.min_workers,
            max_workers: self.pool.max_workers,
            scaling_policy: self.pool.scaling_policy,
            scale_up_threshold: self.pool.scale_up_threshold,
            scale_down_threshold: self.pool.scale_down_threshold,
            scale_up_cooldown: Duration::from_secs(self.pool.scale_up_cooldown_secs),
            scale_down_cooldown: Duration::from_secs(self.pool.scale_down_cooldown_secs),
            health_check_interval: Duration::from_secs(self.pool.health_check_interval_secs),
            max_idle_time: Duration::from_secs(self.pool.max_idle_time_secs),
            failure_threshold: self.pool.failure_threshold,
            recovery_timeout: Duration::from_secs(self.pool.recovery_timeout_secs),
            worker_timeout: Duration::from_secs(self.pool.worker_timeout_secs),
            template: Default::default(),
        }
    }

    /// Conflict resolution strategy for the applier
    pub fn conflict_resolution(&self) -> ConflictResolution {
        match self.apply.conflict_resolution.as_str() {
            "prefer_review" => ConflictResolution::PreferReview,
            "prefer_current" => ConflictResolution::PreferCurrent,
            "merge" => ConflictResolution::Merge,
            "skip" => ConflictResolution::Skip,
            _ => ConflictResolution::Manual,
        }
    }
}

/// Project identity and orchestration behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Project name recorded in the task document header
    #[serde(rename = "project-name")]
    pub project_name: String,

    /// Take a checkpoint before every task
    #[serde(rename = "pre-task-checkpoints")]
    pub pre_task_checkpoints: bool,

    /// Checkpoints kept by retention
    #[serde(rename = "max-checkpoints")]
    pub max_checkpoints: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_name: "orchd-project".to_string(),
            pre_task_checkpoints: true,
            max_checkpoints: 20,
        }
    }
}

/// Worker pool sizing and scaling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    #[serde(rename = "min-workers")]
    pub min_workers: usize,

    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    #[serde(rename = "scaling-policy")]
    pub scaling_policy: ScalingPolicy,

    #[serde(rename = "scale-up-threshold")]
    pub scale_up_threshold: f64,

    #[serde(rename = "scale-down-threshold")]
    pub scale_down_threshold: f64,

    #[serde(rename = "scale-up-cooldown-secs")]
    pub scale_up_cooldown_secs: u64,

    #[serde(rename = "scale-down-cooldown-secs")]
    pub scale_down_cooldown_secs: u64,

    #[serde(rename = "health-check-interval-secs")]
    pub health_check_interval_secs: u64,

    #[serde(rename = "max-idle-time-secs")]
    pub max_idle_time_secs: u64,

    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,

    #[serde(rename = "recovery-timeout-secs")]
    pub recovery_timeout_secs: u64,

    #[serde(rename = "worker-timeout-secs")]
    pub worker_timeout_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 10,
            scaling_policy: ScalingPolicy::Balanced,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scale_up_cooldown_secs: 300,
            scale_down_cooldown_secs: 600,
            health_check_interval_secs: 60,
            max_idle_time_secs: 1800,
            failure_threshold: 3,
            recovery_timeout_secs: 900,
            worker_timeout_secs: 300,
        }
    }
}

/// Per-task lifecycle policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "stuck-timeout-secs")]
    pub stuck_timeout_secs: u64,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stuck_timeout_secs: 1800,
        }
    }
}

/// Review gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSection {
    /// Maximum high-severity findings that still pass
    #[serde(rename = "high-threshold")]
    pub high_threshold: usize,
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self { high_threshold: 3 }
    }
}

/// Change application policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplySection {
    /// manual | prefer_review | prefer_current | merge | skip
    #[serde(rename = "conflict-resolution")]
    pub conflict_resolution: String,
}

impl Default for ApplySection {
    fn default() -> Self {
        Self {
            conflict_resolution: "manual".to_string(),
        }
    }
}

/// Plan validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    #[serde(rename = "max-memory-gb")]
    pub max_memory_gb: u64,

    /// Promote warnings to errors
    pub strict: bool,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            max_memory_gb: 16,
            strict: false,
        }
    }
}

/// On-disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store directory under the working directory
    #[serde(rename = "store-dir")]
    pub store_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_dir: ".orchd".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pool.max_workers, 10);
        assert_eq!(config.lifecycle.max_retries, 3);
        assert_eq!(config.storage.store_dir, ".orchd");
        assert!(config.orchestrator.pre_task_checkpoints);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = "
pool:
  min-workers: 2
  max-workers: 6
  scaling-policy: aggressive
lifecycle:
  max-retries: 5
apply:
  conflict-resolution: merge
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pool.min_workers, 2);
        assert_eq!(config.pool.max_workers, 6);
        assert_eq!(config.pool.scaling_policy, ScalingPolicy::Aggressive);
        assert_eq!(config.lifecycle.max_retries, 5);
        assert_eq!(config.conflict_resolution(), ConflictResolution::Merge);
        // Untouched sections keep defaults
        assert_eq!(config.review.high_threshold, 3);
    }

    #[test]
    fn test_pool_config_conversion() {
        let config = Config::default();
        let pool = config.pool_config();
        assert_eq!(pool.max_workers, 10);
        assert_eq!(pool.worker_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_unknown_conflict_resolution_falls_back_to_manual() {
        let mut config = Config::default();
        config.apply.conflict_resolution = "whatever".to_string();
        assert_eq!(config.conflict_resolution(), ConflictResolution::Manual);
    }
}

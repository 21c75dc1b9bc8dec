//! Worker abstraction
//!
//! A worker is anything that can take a prompt and return structured
//! output, and answer a periodic heartbeat while alive. The LLM endpoint
//! behind a real worker is out of scope; tests and the local CLI use
//! [`ScriptedWorker`].

mod profile;
mod registry;

pub use profile::{Capability, Complexity, WorkerProfile, WorkerState, capabilities};
pub use registry::WorkerRegistry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from worker execution
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker timed out")]
    Timeout,

    #[error("Worker unavailable: {0}")]
    Unavailable(String),

    #[error("Worker failed: {0}")]
    Execution(String),
}

/// A unit of work handed to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: String,
    pub prompt: String,
    pub allowed_tools: Vec<String>,
}

/// Structured output from one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub tokens_used: u64,
    pub request_id: String,
    /// Files the worker reports having created
    #[serde(default)]
    pub created_files: Vec<String>,
    /// Files the worker reports having modified
    #[serde(default)]
    pub modified_files: Vec<String>,
}

impl WorkerOutcome {
    /// A successful outcome with the given output text
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            tokens_used: 0,
            request_id: uuid::Uuid::now_v7().to_string(),
            created_files: Vec::new(),
            modified_files: Vec::new(),
        }
    }

    /// A failed outcome with the given error message
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            tokens_used: 0,
            request_id: uuid::Uuid::now_v7().to_string(),
            created_files: Vec::new(),
            modified_files: Vec::new(),
        }
    }

    /// Builder method to report created files
    pub fn with_created_files(mut self, files: Vec<String>) -> Self {
        self.created_files = files;
        self
    }

    /// Builder method to set token usage
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

/// Periodic liveness report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub status: WorkerState,
    pub cpu: f64,
    pub memory: f64,
    pub uptime_secs: u64,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            status: WorkerState::Idle,
            cpu: 0.0,
            memory: 0.0,
            uptime_secs: 0,
            last_activity: chrono::Utc::now(),
        }
    }
}

/// The worker protocol
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute one prompt and return structured output
    async fn execute(&self, request: WorkerRequest) -> Result<WorkerOutcome, WorkerError>;

    /// Report liveness
    async fn heartbeat(&self) -> Heartbeat;
}

/// A worker that replays a fixed script of outcomes, for tests and local
/// dry runs. When the script is exhausted it echoes the prompt back as a
/// successful outcome.
pub struct ScriptedWorker {
    script: Mutex<VecDeque<WorkerOutcome>>,
}

impl ScriptedWorker {
    pub fn new(outcomes: Vec<WorkerOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
        }
    }

    /// A worker that always succeeds, echoing the prompt
    pub fn echo() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn execute(&self, request: WorkerRequest) -> Result<WorkerOutcome, WorkerError> {
        let mut script = self.script.lock().await;
        Ok(script
            .pop_front()
            .unwrap_or_else(|| WorkerOutcome::success(format!("Completed: {}", request.prompt))))
    }

    async fn heartbeat(&self) -> Heartbeat {
        Heartbeat::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_worker_replays_then_echoes() {
        let worker = ScriptedWorker::new(vec![WorkerOutcome::failure("first fails")]);

        let request = WorkerRequest {
            task_id: "1".to_string(),
            prompt: "do the thing".to_string(),
            allowed_tools: vec![],
        };

        let first = worker.execute(request.clone()).await.unwrap();
        assert!(!first.success);

        let second = worker.execute(request).await.unwrap();
        assert!(second.success);
        assert!(second.output.contains("do the thing"));
    }
}

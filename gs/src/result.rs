//! Worker result records

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome status of a worker result
///
/// `Pending` is a valid stored status for a record created before a worker
/// finished (crash recovery); no internal code path produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Pending,
    Success,
    Failed,
    Partial,
}

impl ResultStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// A structured worker result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub task_id: String,
    pub worker_id: String,
    pub status: ResultStatus,
    pub output: String,
    pub created_files: Vec<String>,
    pub modified_files: Vec<String>,
    /// Wall-clock execution time in seconds
    pub execution_time: f64,
    pub tokens_used: u64,
    /// ISO-8601 completion timestamp
    pub timestamp: String,
    pub error_message: Option<String>,
    pub validation_passed: bool,
    pub metadata: HashMap<String, Value>,
}

impl WorkerResult {
    /// Create a result with the current timestamp
    pub fn new(task_id: impl Into<String>, worker_id: impl Into<String>, status: ResultStatus) -> Self {
        Self {
            task_id: task_id.into(),
            worker_id: worker_id.into(),
            status,
            output: String::new(),
            created_files: Vec::new(),
            modified_files: Vec::new(),
            execution_time: 0.0,
            tokens_used: 0,
            timestamp: chrono::Utc::now().to_rfc3339(),
            error_message: None,
            validation_passed: false,
            metadata: HashMap::new(),
        }
    }

    /// Builder method to set the output text
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Builder method to record created files
    pub fn with_created_files(mut self, files: Vec<String>) -> Self {
        self.created_files = files;
        self
    }

    /// Builder method to record modified files
    pub fn with_modified_files(mut self, files: Vec<String>) -> Self {
        self.modified_files = files;
        self
    }

    /// Builder method to set the error message
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// Aggregate statistics for a worker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStats {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub avg_execution_time: f64,
    pub total_tokens_used: u64,
    pub validated_tasks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!(ResultStatus::parse("success"), Some(ResultStatus::Success));
        assert_eq!(ResultStatus::parse("pending"), Some(ResultStatus::Pending));
        assert_eq!(ResultStatus::parse("nope"), None);
    }

    #[test]
    fn test_result_builder() {
        let result = WorkerResult::new("1", "worker-a", ResultStatus::Success)
            .with_output("Implemented the parser")
            .with_created_files(vec!["src/parser.rs".to_string()]);

        assert_eq!(result.task_id, "1");
        assert_eq!(result.created_files.len(), 1);
        assert!(result.error_message.is_none());
    }
}

//! ResultStore - worker result persistence
//!
//! One row per submitted result, keyed by (task_id, timestamp); history is
//! append-only and the newest row per task is the "latest" record.

use std::path::Path;

use rusqlite::{Connection, Row, params};
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::result::{ResultStatus, WorkerResult, WorkerStats};

/// Phrases that mark a generic, detail-free response
const GENERIC_PHRASES: &[&str] = &[
    "i have successfully completed",
    "the task has been completed",
    "i've completed the task",
    "task completed successfully",
];

/// Words that claim file activity in an output
const FILE_CLAIM_WORDS: &[&str] = &["created", "wrote", "generated", "implemented"];

/// SQLite-backed result store
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        debug!(path = %path.display(), "Opened result store");
        Ok(store)
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS worker_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                worker_id TEXT NOT NULL,
                status TEXT NOT NULL,
                output TEXT,
                created_files TEXT,
                modified_files TEXT,
                execution_time REAL,
                tokens_used INTEGER,
                timestamp TEXT NOT NULL,
                error_message TEXT,
                validation_passed BOOLEAN DEFAULT 0,
                metadata TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(task_id, timestamp)
            );
            CREATE INDEX IF NOT EXISTS idx_task_id ON worker_results(task_id);
            CREATE INDEX IF NOT EXISTS idx_worker_id ON worker_results(worker_id);
            CREATE INDEX IF NOT EXISTS idx_status ON worker_results(status);",
        )?;
        Ok(())
    }

    /// Store a result and return its row ID
    pub fn store(&mut self, result: &WorkerResult) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO worker_results (
                task_id, worker_id, status, output, created_files,
                modified_files, execution_time, tokens_used, timestamp,
                error_message, validation_passed, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                result.task_id,
                result.worker_id,
                result.status.to_string(),
                result.output,
                serde_json::to_string(&result.created_files)?,
                serde_json::to_string(&result.modified_files)?,
                result.execution_time,
                result.tokens_used as i64,
                result.timestamp,
                result.error_message,
                result.validation_passed,
                serde_json::to_string(&result.metadata)?,
            ],
        )?;

        let row_id = self.conn.last_insert_rowid();
        info!(row_id, task_id = %result.task_id, status = %result.status, "Stored worker result");
        Ok(row_id)
    }

    /// The most recent result for a task
    pub fn latest(&self, task_id: &str) -> StoreResult<Option<WorkerResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM worker_results WHERE task_id = ?1 ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![task_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_result(row)?)),
            None => Ok(None),
        }
    }

    /// All results for a task, newest first
    pub fn history(&self, task_id: &str) -> StoreResult<Vec<WorkerResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM worker_results WHERE task_id = ?1 ORDER BY id DESC",
        )?;
        let mut rows = stmt.query(params![task_id])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_result(row)?);
        }
        Ok(results)
    }

    /// All results with a given status, newest first
    pub fn by_status(&self, status: ResultStatus) -> StoreResult<Vec<WorkerResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM worker_results WHERE status = ?1 ORDER BY id DESC",
        )?;
        let mut rows = stmt.query(params![status.to_string()])?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(row_to_result(row)?);
        }
        Ok(results)
    }

    /// Mark the latest result for a task as validated (or not)
    pub fn mark_validated(&mut self, task_id: &str, validated: bool) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE worker_results SET validation_passed = ?1
             WHERE id = (SELECT id FROM worker_results WHERE task_id = ?2 ORDER BY id DESC LIMIT 1)",
            params![validated, task_id],
        )?;
        Ok(())
    }

    /// Validate the latest result for a task with domain heuristics.
    ///
    /// Returns `(ok, message)`.
    pub fn validate(&self, task_id: &str) -> StoreResult<(bool, String)> {
        let Some(result) = self.latest(task_id)? else {
            return Ok((false, "No result found for task".to_string()));
        };

        if result.status != ResultStatus::Success {
            return Ok((false, format!("Task failed with status: {}", result.status)));
        }

        let output_lower = result.output.to_lowercase();

        if result.created_files.is_empty()
            && result.modified_files.is_empty()
            && FILE_CLAIM_WORDS.iter().any(|w| output_lower.contains(w))
        {
            return Ok((
                false,
                "Worker claimed to create files but no files were recorded".to_string(),
            ));
        }

        if result.output.len() <= 200 && GENERIC_PHRASES.iter().any(|p| output_lower.contains(p)) {
            return Ok((
                false,
                "Worker provided generic response without implementation details".to_string(),
            ));
        }

        Ok((true, "Validation passed".to_string()))
    }

    /// Aggregate statistics for a worker
    pub fn worker_stats(&self, worker_id: &str) -> StoreResult<WorkerStats> {
        self.conn
            .query_row(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(AVG(execution_time), 0),
                    COALESCE(SUM(tokens_used), 0),
                    COALESCE(SUM(CASE WHEN validation_passed THEN 1 ELSE 0 END), 0)
                 FROM worker_results WHERE worker_id = ?1",
                params![worker_id],
                |row| {
                    Ok(WorkerStats {
                        total_tasks: row.get::<_, i64>(0)? as u64,
                        successful_tasks: row.get::<_, i64>(1)? as u64,
                        failed_tasks: row.get::<_, i64>(2)? as u64,
                        avg_execution_time: row.get(3)?,
                        total_tokens_used: row.get::<_, i64>(4)? as u64,
                        validated_tasks: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Remove results older than the given number of days
    pub fn cleanup_older_than(&mut self, days: u32) -> StoreResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM worker_results WHERE created_at < datetime('now', '-' || ?1 || ' days')",
            params![days],
        )?;
        if removed > 0 {
            info!(removed, days, "Pruned old worker results");
        }
        Ok(removed)
    }
}

fn row_to_result(row: &Row<'_>) -> StoreResult<WorkerResult> {
    let status_text: String = row.get("status")?;
    let created_files: String = row.get("created_files")?;
    let modified_files: String = row.get("modified_files")?;
    let metadata: Option<String> = row.get("metadata")?;

    Ok(WorkerResult {
        task_id: row.get("task_id")?,
        worker_id: row.get("worker_id")?,
        status: ResultStatus::parse(&status_text).unwrap_or(ResultStatus::Pending),
        output: row.get::<_, Option<String>>("output")?.unwrap_or_default(),
        created_files: serde_json::from_str(&created_files)?,
        modified_files: serde_json::from_str(&modified_files)?,
        execution_time: row.get::<_, Option<f64>>("execution_time")?.unwrap_or(0.0),
        tokens_used: row.get::<_, Option<i64>>("tokens_used")?.unwrap_or(0) as u64,
        timestamp: row.get("timestamp")?,
        error_message: row.get("error_message")?,
        validation_passed: row.get("validation_passed")?,
        metadata: metadata
            .map(|m| serde_json::from_str(&m))
            .transpose()?
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_result(task_id: &str, output: &str) -> WorkerResult {
        WorkerResult::new(task_id, "worker-a", ResultStatus::Success).with_output(output)
    }

    #[test]
    fn test_store_and_latest() {
        let mut store = ResultStore::open_in_memory().unwrap();

        let row_id = store.store(&success_result("1", "built the thing")).unwrap();
        assert!(row_id > 0);

        let latest = store.latest("1").unwrap().unwrap();
        assert_eq!(latest.output, "built the thing");
        assert_eq!(latest.status, ResultStatus::Success);
    }

    #[test]
    fn test_history_is_append_only() {
        let mut store = ResultStore::open_in_memory().unwrap();

        let mut first = success_result("1", "attempt one");
        first.timestamp = "2026-01-01T00:00:00Z".to_string();
        store.store(&first).unwrap();

        let mut second = success_result("1", "attempt two");
        second.timestamp = "2026-01-01T00:01:00Z".to_string();
        store.store(&second).unwrap();

        let history = store.history("1").unwrap();
        assert_eq!(history.len(), 2);
        // Newest first
        assert_eq!(history[0].output, "attempt two");

        let latest = store.latest("1").unwrap().unwrap();
        assert_eq!(latest.output, "attempt two");
    }

    #[test]
    fn test_by_status() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store.store(&success_result("1", "ok")).unwrap();
        store
            .store(&WorkerResult::new("2", "worker-b", ResultStatus::Failed).with_error("boom"))
            .unwrap();

        assert_eq!(store.by_status(ResultStatus::Success).unwrap().len(), 1);
        assert_eq!(store.by_status(ResultStatus::Failed).unwrap().len(), 1);
        assert!(store.by_status(ResultStatus::Partial).unwrap().is_empty());
    }

    #[test]
    fn test_validate_no_result() {
        let store = ResultStore::open_in_memory().unwrap();
        let (ok, msg) = store.validate("missing").unwrap();
        assert!(!ok);
        assert!(msg.contains("No result"));
    }

    #[test]
    fn test_validate_failed_status() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store
            .store(&WorkerResult::new("1", "w", ResultStatus::Failed))
            .unwrap();

        let (ok, msg) = store.validate("1").unwrap();
        assert!(!ok);
        assert!(msg.contains("failed"));
    }

    #[test]
    fn test_validate_generic_response() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store
            .store(&success_result("1", "Task completed successfully."))
            .unwrap();

        let (ok, msg) = store.validate("1").unwrap();
        assert!(!ok);
        assert!(msg.contains("generic"));
    }

    #[test]
    fn test_validate_claimed_files_without_records() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store
            .store(&success_result("1", "I created src/main.rs with the new entry point"))
            .unwrap();

        let (ok, msg) = store.validate("1").unwrap();
        assert!(!ok);
        assert!(msg.contains("no files were recorded"));
    }

    #[test]
    fn test_validate_passes_with_file_records() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store
            .store(
                &success_result("1", "I created src/main.rs with the new entry point")
                    .with_created_files(vec!["src/main.rs".to_string()]),
            )
            .unwrap();

        let (ok, _) = store.validate("1").unwrap();
        assert!(ok);
    }

    #[test]
    fn test_mark_validated_touches_latest_only() {
        let mut store = ResultStore::open_in_memory().unwrap();
        let mut first = success_result("1", "one");
        first.timestamp = "a".to_string();
        store.store(&first).unwrap();
        let mut second = success_result("1", "two");
        second.timestamp = "b".to_string();
        store.store(&second).unwrap();

        store.mark_validated("1", true).unwrap();

        let history = store.history("1").unwrap();
        assert!(history[0].validation_passed);
        assert!(!history[1].validation_passed);
    }

    #[test]
    fn test_worker_stats() {
        let mut store = ResultStore::open_in_memory().unwrap();

        let mut ok = success_result("1", "fine");
        ok.execution_time = 10.0;
        ok.tokens_used = 100;
        ok.validation_passed = true;
        store.store(&ok).unwrap();

        let mut bad = WorkerResult::new("2", "worker-a", ResultStatus::Failed);
        bad.execution_time = 20.0;
        bad.tokens_used = 50;
        store.store(&bad).unwrap();

        let stats = store.worker_stats("worker-a").unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.successful_tasks, 1);
        assert_eq!(stats.failed_tasks, 1);
        assert!((stats.avg_execution_time - 15.0).abs() < f64::EPSILON);
        assert_eq!(stats.total_tokens_used, 150);
        assert_eq!(stats.validated_tasks, 1);
    }

    #[test]
    fn test_stats_for_unknown_worker() {
        let store = ResultStore::open_in_memory().unwrap();
        let stats = store.worker_stats("ghost").unwrap();
        assert_eq!(stats, WorkerStats::default());
    }
}

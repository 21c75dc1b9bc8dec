//! End-to-end orchestrator scenarios with scripted workers

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::sync::Mutex;

use graphstore::{ResultStatus, ResultStore, TaskStatus};
use orchd::config::Config;
use orchd::lifecycle::ProcessState;
use orchd::orchestrator::{Orchestrator, TaskSpec};
use orchd::worker::{
    Capability, Complexity, Heartbeat, ScriptedWorker, Worker, WorkerError, WorkerOutcome, WorkerProfile,
    WorkerRequest, capabilities,
};

fn spec(title: &str, description: &str, dependencies: Vec<u64>) -> TaskSpec {
    TaskSpec {
        title: title.to_string(),
        description: description.to_string(),
        dependencies,
        priority: None,
        details: None,
        test_strategy: None,
    }
}

fn all_round_profile(id: &str) -> WorkerProfile {
    WorkerProfile::new(
        id,
        "scripted-model",
        capabilities(&[
            Capability::Code,
            Capability::Documentation,
            Capability::Testing,
            Capability::Debugging,
            Capability::Research,
        ]),
        Complexity::Critical,
        1,
    )
}

#[tokio::test]
async fn happy_path_single_task_creates_file() {
    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(dir.path(), Config::default()).unwrap();

    let output = "Create a new file with the project summary:\n\
                  ```md:README.md\n# Project\n\nA one-line README.\n```\n";
    let worker = ScriptedWorker::new(vec![
        WorkerOutcome::success(output).with_created_files(vec!["README.md".to_string()]),
    ]);
    orchestrator.add_worker(all_round_profile("writer"), Some(Arc::new(worker))).await;

    let outcome = orchestrator
        .submit(vec![spec("Write README", "Add a one-line readme document for the project", vec![])])
        .await
        .unwrap();
    assert!(outcome.report.can_execute(), "report: {:?}", outcome.report.issues);
    assert_eq!(outcome.task_ids, vec![1]);

    orchestrator.run().await.unwrap();

    // The applier created the file from the worker's proposal
    let readme = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
    assert!(readme.contains("# Project"));

    let view = orchestrator.status("1").await;
    assert_eq!(view.task.unwrap().status, TaskStatus::Done);
    let lifecycle = view.lifecycle.unwrap();
    assert_eq!(lifecycle.state, ProcessState::Completed);
    assert_eq!(lifecycle.worker_id.as_deref(), Some("writer"));

    // Latest stored result is a validated success
    let results = ResultStore::open(dir.path().join(".orchd").join("results.db")).unwrap();
    let latest = results.latest("1").unwrap().unwrap();
    assert_eq!(latest.status, ResultStatus::Success);
    assert!(latest.validation_passed);
}

#[tokio::test]
async fn retry_after_worker_failure() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.lifecycle.max_retries = 2;
    let orchestrator = Orchestrator::new(dir.path(), config).unwrap();

    // First attempt fails, second succeeds
    let worker = ScriptedWorker::new(vec![
        WorkerOutcome::failure("simulated worker crash"),
        WorkerOutcome::success("Implemented the feature, all checks passed"),
    ]);
    orchestrator.add_worker(all_round_profile("flaky"), Some(Arc::new(worker))).await;

    orchestrator
        .submit(vec![spec("Implement feature", "implement the feature described in the ticket", vec![])])
        .await
        .unwrap();
    orchestrator.run().await.unwrap();

    let view = orchestrator.status("1").await;
    assert_eq!(view.task.unwrap().status, TaskStatus::Done);
    let lifecycle = view.lifecycle.unwrap();
    assert_eq!(lifecycle.state, ProcessState::Completed);
    assert_eq!(lifecycle.retry_count, 1);
    assert!(lifecycle.error_history.iter().any(|e| e.contains("simulated")));

    // Both attempts left a result record
    let results = ResultStore::open(dir.path().join(".orchd").join("results.db")).unwrap();
    assert_eq!(results.history("1").unwrap().len(), 2);
}

/// Worker that records execution ordering and refuses overlap
struct TrackingWorker {
    active: Arc<Mutex<HashSet<String>>>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Worker for TrackingWorker {
    async fn execute(&self, request: WorkerRequest) -> Result<WorkerOutcome, WorkerError> {
        {
            let mut active = self.active.lock().await;
            active.insert(request.task_id.clone());
            self.log.lock().await.push(format!("start:{}", request.task_id));
        }
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        {
            let mut active = self.active.lock().await;
            active.remove(&request.task_id);
            self.log.lock().await.push(format!("end:{}", request.task_id));
        }
        Ok(WorkerOutcome::success("step done"))
    }

    async fn heartbeat(&self) -> Heartbeat {
        Heartbeat::default()
    }
}

#[tokio::test]
async fn dependency_gating_serializes_dependent_tasks() {
    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(dir.path(), Config::default()).unwrap();

    let active = Arc::new(Mutex::new(HashSet::new()));
    let log = Arc::new(Mutex::new(Vec::new()));
    for id in ["w1", "w2"] {
        let worker = TrackingWorker {
            active: active.clone(),
            log: log.clone(),
        };
        orchestrator.add_worker(all_round_profile(id), Some(Arc::new(worker))).await;
    }

    orchestrator
        .submit(vec![
            spec("First stage", "produce the intermediate artifact for later use", vec![]),
            spec("Second stage", "consume the artifact produced by the first stage", vec![1]),
        ])
        .await
        .unwrap();
    orchestrator.run().await.unwrap();

    // Despite two free workers, the dependent task never overlapped its
    // prerequisite
    let log = log.lock().await.clone();
    assert_eq!(log, vec!["start:1", "end:1", "start:2", "end:2"]);

    assert_eq!(orchestrator.status("1").await.task.unwrap().status, TaskStatus::Done);
    assert_eq!(orchestrator.status("2").await.task.unwrap().status, TaskStatus::Done);
}

#[tokio::test]
async fn rollback_on_apply_failure() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "original notes content\n").unwrap();

    let mut config = Config::default();
    config.lifecycle.max_retries = 1;
    let orchestrator = Orchestrator::new(dir.path(), config).unwrap();

    // Both attempts propose a replacement whose old content matches
    // nothing, so applying fails each time
    let output = "Replace the heading in notes.txt\n\
                  ```\ncompletely nonexistent source text in this file\n```\nwith\n\
                  ```\nsomething new\n```\n";
    let worker = ScriptedWorker::new(vec![
        WorkerOutcome::success(output),
        WorkerOutcome::success(output),
    ]);
    orchestrator.add_worker(all_round_profile("editor"), Some(Arc::new(worker))).await;

    orchestrator
        .submit(vec![spec("Update notes", "rewrite the heading of the notes file", vec![])])
        .await
        .unwrap();
    orchestrator.run().await.unwrap();

    // Retries exhausted; the task ends failed and the tree is untouched
    let view = orchestrator.status("1").await;
    assert_eq!(view.task.unwrap().status, TaskStatus::Failed);
    let lifecycle = view.lifecycle.unwrap();
    assert_eq!(lifecycle.state, ProcessState::Failed);
    assert_eq!(lifecycle.retry_count, 1);

    let notes = std::fs::read_to_string(dir.path().join("notes.txt")).unwrap();
    assert_eq!(notes, "original notes content\n");
}

#[tokio::test]
async fn plan_with_cycle_is_rejected_and_not_persisted() {
    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(dir.path(), Config::default()).unwrap();

    let outcome = orchestrator
        .submit(vec![
            spec("Task one", "depends on the second task somehow", vec![2]),
            spec("Task two", "depends on the third task somehow", vec![3]),
            spec("Task three", "depends on the first task somehow", vec![1]),
        ])
        .await
        .unwrap();

    assert!(!outcome.report.can_execute());
    assert!(outcome.task_ids.is_empty());

    let blocking: Vec<_> = outcome.report.issues.iter().filter(|i| i.blocking).collect();
    assert_eq!(blocking.len(), 1);
    assert!(blocking[0].issue_id.starts_with("circular_dep"));
    assert_eq!(blocking[0].affected_tasks, vec![1, 2, 3, 1]);

    // Nothing persisted
    assert!(orchestrator.status("1").await.task.is_none());
}

#[tokio::test]
async fn empty_plan_is_rejected() {
    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(dir.path(), Config::default()).unwrap();

    let outcome = orchestrator.submit(vec![]).await.unwrap();
    assert!(!outcome.report.can_execute());
    assert_eq!(outcome.report.issues[0].issue_id, "empty_plan");
}

#[tokio::test]
async fn step_processes_one_task_at_a_time() {
    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(dir.path(), Config::default()).unwrap();
    orchestrator
        .add_worker(all_round_profile("stepper"), Some(Arc::new(ScriptedWorker::echo())))
        .await;

    orchestrator
        .submit(vec![
            spec("Alpha work item", "produce the first deliverable of the plan", vec![]),
            spec("Beta work item", "produce the second deliverable of the plan", vec![]),
        ])
        .await
        .unwrap();

    assert!(orchestrator.step().await.unwrap());
    assert_eq!(orchestrator.status("1").await.task.unwrap().status, TaskStatus::Done);
    assert_eq!(orchestrator.status("2").await.task.unwrap().status, TaskStatus::Pending);

    assert!(orchestrator.step().await.unwrap());
    assert_eq!(orchestrator.status("2").await.task.unwrap().status, TaskStatus::Done);

    // Nothing left to do
    assert!(!orchestrator.step().await.unwrap());
}

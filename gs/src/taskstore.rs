//! TaskStore - the persistent task graph
//!
//! A single on-disk JSON document (header + ordered task list) rewritten
//! atomically on every mutation: the new document is written to a temp file
//! and renamed over the old one, so a crashed write leaves the previous
//! state intact. An advisory file lock guards against a second process
//! opening the same store.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::task::{Subtask, Task, TaskPriority, TaskRef, TaskStatus};

/// Document header
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub project_name: String,
    pub project_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub completed_tasks: usize,
    #[serde(default)]
    pub pending_tasks: usize,
}

/// The on-disk document: header + ordered task list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDocument {
    pub meta: DocumentMeta,
    pub tasks: Vec<Task>,
}

impl TaskDocument {
    fn empty(project_name: &str) -> Self {
        let now = Utc::now();
        Self {
            meta: DocumentMeta {
                project_name: project_name.to_string(),
                project_version: "1.0.0".to_string(),
                created_at: now,
                updated_at: now,
                total_tasks: 0,
                completed_tasks: 0,
                pending_tasks: 0,
            },
            tasks: Vec::new(),
        }
    }
}

/// A dependency problem reported by [`TaskStore::validate_dependencies`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyIssue {
    pub task_id: u64,
    pub dependency: u64,
    pub detail: String,
}

/// Persistent task graph store
pub struct TaskStore {
    path: PathBuf,
    /// Held for the store lifetime; released on drop
    _lock: File,
    doc: TaskDocument,
}

impl TaskStore {
    /// Open or create a store at the given document path
    pub fn open(path: impl AsRef<Path>, project_name: &str) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("json.lock");
        let lock = File::create(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked {
            path: lock_path.display().to_string(),
        })?;

        let doc = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?
        } else {
            TaskDocument::empty(project_name)
        };

        debug!(path = %path.display(), tasks = doc.tasks.len(), "Opened task store");
        Ok(Self { path, _lock: lock, doc })
    }

    /// Add a new task. The ID is allocated as max(existing) + 1.
    ///
    /// Rejects unknown dependencies. Self-dependency cannot occur since the
    /// new ID does not exist yet, and dependencies on existing tasks only
    /// point backwards, so no cycle can be introduced here.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<u64>,
        priority: Option<TaskPriority>,
        details: Option<String>,
        test_strategy: Option<String>,
    ) -> StoreResult<Task> {
        let id = self.doc.tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;

        for dep in &dependencies {
            if *dep == id {
                return Err(StoreError::SelfDependency(id.to_string()));
            }
            if !self.doc.tasks.iter().any(|t| t.id == *dep) {
                return Err(StoreError::UnknownDependency {
                    task: id.to_string(),
                    dep: dep.to_string(),
                });
            }
        }

        let mut task = Task::new(id, title, description);
        task.dependencies = dependencies;
        if let Some(p) = priority {
            task.priority = p;
        }
        task.details = details;
        task.test_strategy = test_strategy;

        self.doc.tasks.push(task.clone());
        self.save()?;

        info!(task_id = id, title = %task.title, "Added task");
        Ok(task)
    }

    /// Add a subtask under an existing task. The index is
    /// max(existing siblings) + 1; dependencies reference sibling indices.
    pub fn add_subtask(
        &mut self,
        parent_id: u64,
        title: impl Into<String>,
        description: impl Into<String>,
        dependencies: Vec<u64>,
    ) -> StoreResult<Subtask> {
        let parent = self
            .doc
            .tasks
            .iter_mut()
            .find(|t| t.id == parent_id)
            .ok_or_else(|| StoreError::UnknownTask(parent_id.to_string()))?;

        let index = parent.subtasks.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        for dep in &dependencies {
            if !parent.subtasks.iter().any(|s| s.id == *dep) {
                return Err(StoreError::UnknownDependency {
                    task: format!("{}.{}", parent_id, index),
                    dep: dep.to_string(),
                });
            }
        }

        let now = Utc::now();
        let subtask = Subtask {
            id: index,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies,
            details: None,
            created_at: now,
            updated_at: now,
        };

        parent.subtasks.push(subtask.clone());
        parent.updated_at = now;
        self.save()?;

        info!(subtask = %format!("{}.{}", parent_id, index), "Added subtask");
        Ok(subtask)
    }

    /// Get a task or subtask by reference string (`"7"` or `"7.2"`)
    pub fn get(&self, id: &str) -> Option<Task> {
        match TaskRef::parse(id)? {
            TaskRef::Task(id) => self.doc.tasks.iter().find(|t| t.id == id).cloned(),
            TaskRef::Subtask { parent, index } => {
                let parent = self.doc.tasks.iter().find(|t| t.id == parent)?;
                let sub = parent.subtasks.iter().find(|s| s.id == index)?;
                // Present subtasks through the Task shape for uniform callers
                let mut task = Task::new(sub.id, sub.title.clone(), sub.description.clone());
                task.status = sub.status;
                task.dependencies = sub.dependencies.clone();
                task.details = sub.details.clone();
                task.created_at = sub.created_at;
                task.updated_at = sub.updated_at;
                Some(task)
            }
        }
    }

    /// Update a task's (or subtask's) status
    ///
    /// Transitioning a task to `done` requires every non-cancelled
    /// dependency to already be `done`.
    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> StoreResult<()> {
        let task_ref = TaskRef::parse(id).ok_or_else(|| StoreError::UnknownTask(id.to_string()))?;

        match task_ref {
            TaskRef::Task(task_id) => {
                if status == TaskStatus::Done {
                    let deps = self
                        .doc
                        .tasks
                        .iter()
                        .find(|t| t.id == task_id)
                        .ok_or_else(|| StoreError::UnknownTask(id.to_string()))?
                        .dependencies
                        .clone();
                    for dep in deps {
                        let dep_status = self
                            .doc
                            .tasks
                            .iter()
                            .find(|t| t.id == dep)
                            .map(|t| t.status)
                            .ok_or_else(|| StoreError::UnknownDependency {
                                task: id.to_string(),
                                dep: dep.to_string(),
                            })?;
                        if !matches!(dep_status, TaskStatus::Done | TaskStatus::Cancelled) {
                            warn!(task_id, dep, "Refusing done: dependency not complete");
                            return Err(StoreError::DependencyNotDone {
                                task: id.to_string(),
                                dep: dep.to_string(),
                                status: dep_status.to_string(),
                            });
                        }
                    }
                }
                let task = self
                    .doc
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == task_id)
                    .ok_or_else(|| StoreError::UnknownTask(id.to_string()))?;
                task.set_status(status);
            }
            TaskRef::Subtask { parent, index } => {
                let parent_task = self
                    .doc
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == parent)
                    .ok_or_else(|| StoreError::UnknownTask(id.to_string()))?;
                let sub = parent_task
                    .subtasks
                    .iter_mut()
                    .find(|s| s.id == index)
                    .ok_or_else(|| StoreError::UnknownTask(id.to_string()))?;
                sub.status = status;
                sub.updated_at = Utc::now();
                parent_task.updated_at = Utc::now();
            }
        }

        self.save()?;
        debug!(%id, %status, "Updated task status");
        Ok(())
    }

    /// Pick the next runnable task: schedulable status, all dependencies
    /// complete, ordered by priority descending then ID ascending.
    pub fn next_runnable(&self) -> Option<Task> {
        let mut ready: Vec<&Task> = self
            .doc
            .tasks
            .iter()
            .filter(|t| t.is_schedulable())
            .filter(|t| {
                t.dependencies.iter().all(|dep| {
                    self.doc
                        .tasks
                        .iter()
                        .find(|d| d.id == *dep)
                        .map(|d| matches!(d.status, TaskStatus::Done | TaskStatus::Cancelled))
                        .unwrap_or(false)
                })
            })
            .collect();

        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        ready.first().map(|t| (*t).clone())
    }

    /// Report missing and self-referential dependencies
    pub fn validate_dependencies(&self) -> Vec<DependencyIssue> {
        let mut issues = Vec::new();
        for task in &self.doc.tasks {
            for dep in &task.dependencies {
                if *dep == task.id {
                    issues.push(DependencyIssue {
                        task_id: task.id,
                        dependency: *dep,
                        detail: "task cannot depend on itself".to_string(),
                    });
                } else if !self.doc.tasks.iter().any(|t| t.id == *dep) {
                    issues.push(DependencyIssue {
                        task_id: task.id,
                        dependency: *dep,
                        detail: format!("dependency {} does not exist", dep),
                    });
                }
            }
        }
        issues
    }

    /// All tasks, copied out
    pub fn all(&self) -> Vec<Task> {
        self.doc.tasks.clone()
    }

    /// Tasks with a given status
    pub fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.doc.tasks.iter().filter(|t| t.status == status).cloned().collect()
    }

    /// Tasks that depend on the given task
    pub fn dependents(&self, id: u64) -> Vec<Task> {
        self.doc
            .tasks
            .iter()
            .filter(|t| t.dependencies.contains(&id))
            .cloned()
            .collect()
    }

    /// Hard-delete a task. Prefer soft deletion via `cancelled`.
    pub fn delete(&mut self, id: u64) -> StoreResult<()> {
        let before = self.doc.tasks.len();
        self.doc.tasks.retain(|t| t.id != id);
        if self.doc.tasks.len() == before {
            return Err(StoreError::UnknownTask(id.to_string()));
        }
        self.save()?;
        info!(task_id = id, "Deleted task");
        Ok(())
    }

    /// Subtask progress for a task as (done, total)
    pub fn subtask_progress(&self, id: u64) -> (usize, usize) {
        self.doc
            .tasks
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.subtask_progress())
            .unwrap_or((0, 0))
    }

    /// The document header, with counts refreshed
    pub fn meta(&self) -> DocumentMeta {
        let mut meta = self.doc.meta.clone();
        Self::refresh_counts(&mut meta, &self.doc.tasks);
        meta
    }

    fn refresh_counts(meta: &mut DocumentMeta, tasks: &[Task]) {
        meta.total_tasks = tasks.len();
        meta.completed_tasks = tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
        meta.pending_tasks = tasks.iter().filter(|t| t.status == TaskStatus::Pending).count();
    }

    /// Persist the document: temp file + rename is the commit point
    fn save(&mut self) -> StoreResult<()> {
        self.doc.meta.updated_at = Utc::now();
        let tasks = self.doc.tasks.clone();
        Self::refresh_counts(&mut self.doc.meta, &tasks);

        let json = serde_json::to_string_pretty(&self.doc)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), tasks = self.doc.tasks.len(), "Saved task document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> TaskStore {
        TaskStore::open(dir.path().join("tasks.json"), "test-project").unwrap()
    }

    #[test]
    fn test_add_allocates_sequential_ids() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        let a = store.add("First", "desc", vec![], None, None, None).unwrap();
        let b = store.add("Second", "desc", vec![], None, None, None).unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[test]
    fn test_add_rejects_unknown_dependency() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        let result = store.add("Task", "desc", vec![99], None, None, None);
        assert!(matches!(result, Err(StoreError::UnknownDependency { .. })));
    }

    #[test]
    fn test_save_load_preserves_graph() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        {
            let mut store = TaskStore::open(&path, "p").unwrap();
            store.add("A", "first", vec![], Some(TaskPriority::High), None, None).unwrap();
            store.add("B", "second", vec![1], None, None, None).unwrap();
        }

        let store = TaskStore::open(&path, "p").unwrap();
        let tasks = store.all();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "A");
        assert_eq!(tasks[1].dependencies, vec![1]);
        assert_eq!(tasks[0].priority, TaskPriority::High);
    }

    #[test]
    fn test_corrupt_document_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").unwrap();

        let result = TaskStore::open(&path, "p");
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_next_runnable_respects_dependencies() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("A", "first", vec![], None, None, None).unwrap();
        store.add("B", "second", vec![1], None, None, None).unwrap();

        // A is runnable, B is gated
        assert_eq!(store.next_runnable().unwrap().id, 1);

        store.set_status("1", TaskStatus::Done).unwrap();
        assert_eq!(store.next_runnable().unwrap().id, 2);

        store.set_status("2", TaskStatus::Done).unwrap();
        assert!(store.next_runnable().is_none());
    }

    #[test]
    fn test_next_runnable_priority_then_id() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("low", "d", vec![], Some(TaskPriority::Low), None, None).unwrap();
        store.add("high", "d", vec![], Some(TaskPriority::High), None, None).unwrap();
        store.add("high2", "d", vec![], Some(TaskPriority::High), None, None).unwrap();

        // Highest priority wins; ties broken by lower ID
        assert_eq!(store.next_runnable().unwrap().id, 2);
    }

    #[test]
    fn test_done_requires_dependencies_done() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("A", "d", vec![], None, None, None).unwrap();
        store.add("B", "d", vec![1], None, None, None).unwrap();

        assert!(store.set_status("2", TaskStatus::Done).is_err());

        store.set_status("1", TaskStatus::Done).unwrap();
        store.set_status("2", TaskStatus::Done).unwrap();
    }

    #[test]
    fn test_done_allows_cancelled_dependency() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("A", "d", vec![], None, None, None).unwrap();
        store.add("B", "d", vec![1], None, None, None).unwrap();

        store.set_status("1", TaskStatus::Cancelled).unwrap();
        store.set_status("2", TaskStatus::Done).unwrap();
    }

    #[test]
    fn test_cancel_leaves_next_runnable_unchanged() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("A", "d", vec![], None, None, None).unwrap();
        let before = store.next_runnable().map(|t| t.id);

        store.add("extra", "d", vec![], None, None, None).unwrap();
        store.set_status("2", TaskStatus::Cancelled).unwrap();

        assert_eq!(store.next_runnable().map(|t| t.id), before);
    }

    #[test]
    fn test_subtasks() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("Parent", "d", vec![], None, None, None).unwrap();
        let s1 = store.add_subtask(1, "first", "d", vec![]).unwrap();
        let s2 = store.add_subtask(1, "second", "d", vec![1]).unwrap();

        assert_eq!(s1.id, 1);
        assert_eq!(s2.id, 2);
        assert_eq!(s2.dependencies, vec![1]);

        // Addressable as parent.index
        let sub = store.get("1.2").unwrap();
        assert_eq!(sub.title, "second");

        store.set_status("1.1", TaskStatus::Done).unwrap();
        assert_eq!(store.subtask_progress(1), (1, 2));
    }

    #[test]
    fn test_subtask_dep_references_siblings() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("Parent", "d", vec![], None, None, None).unwrap();
        let result = store.add_subtask(1, "sub", "d", vec![7]);
        assert!(matches!(result, Err(StoreError::UnknownDependency { .. })));
    }

    #[test]
    fn test_validate_dependencies_reports_issues() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        // Hand-craft a document with a missing dep and a self-dep, which the
        // API itself would refuse to create
        {
            let mut store = TaskStore::open(&path, "p").unwrap();
            store.add("A", "d", vec![], None, None, None).unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        let mut doc: TaskDocument = serde_json::from_str(&content).unwrap();
        doc.tasks[0].dependencies = vec![1, 42];
        fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let store = TaskStore::open(&path, "p").unwrap();
        let issues = store.validate_dependencies();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.detail.contains("itself")));
        assert!(issues.iter().any(|i| i.detail.contains("does not exist")));
    }

    #[test]
    fn test_dependents() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("A", "d", vec![], None, None, None).unwrap();
        store.add("B", "d", vec![1], None, None, None).unwrap();
        store.add("C", "d", vec![1], None, None, None).unwrap();

        let deps = store.dependents(1);
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_meta_counts() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add("A", "d", vec![], None, None, None).unwrap();
        store.add("B", "d", vec![], None, None, None).unwrap();
        store.set_status("1", TaskStatus::Done).unwrap();

        let meta = store.meta();
        assert_eq!(meta.total_tasks, 2);
        assert_eq!(meta.completed_tasks, 1);
        assert_eq!(meta.pending_tasks, 1);
    }
}

//! Task registry

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::RegistryError;
use crate::work::{Arguments, Work, WorkResult};

/// Task status
///
/// `Resubmitted` is transient: the lease monitor sets it while it swaps in a new attempt
/// and always moves the task back to `Running` (or leaves a terminal status alone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Work is in flight under the current attempt
    Running,

    /// A new attempt is being swapped in
    Resubmitted,

    /// Work finished successfully
    Completed,

    /// Work failed
    Failed,
}

impl TaskStatus {
    /// Whether the task has finished and is eligible for reaping
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Resubmitted => write!(f, "resubmitted"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A logical unit of work requested by a caller
#[derive(Debug, Clone)]
pub struct Task {
    /// Caller-supplied id, stable across resubmissions
    pub id: String,

    /// Function to run
    pub work: Work,

    /// Keyword arguments for the function
    pub arguments: Arguments,

    /// Current status
    pub status: TaskStatus,

    /// Attempt currently responsible for this task
    pub attempt_id: String,

    /// Every attempt this task has owned, oldest first
    pub attempts: Vec<String>,

    /// Value returned by a successful execution
    pub result: Option<serde_json::Value>,

    /// Message of the failure that ended the task
    pub error: Option<String>,

    /// When the task was submitted
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Create a running task whose first attempt id equals the task id
    pub fn new(id: impl Into<String>, work: Work, arguments: Arguments) -> Self {
        let id = id.into();
        Self {
            attempt_id: id.clone(),
            attempts: vec![id.clone()],
            id,
            work,
            arguments,
            status: TaskStatus::Running,
            result: None,
            error: None,
            submitted_at: Utc::now(),
        }
    }
}

/// Registry of tasks keyed by task id
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite a task, returning the previous entry
    pub fn add(&self, task: Task) -> Option<Task> {
        self.tasks.write().insert(task.id.clone(), task)
    }

    /// Insert a task unless a live (non-terminal) task with the same id exists
    ///
    /// `register` runs under the registry lock with the terminal task being replaced, if
    /// any, so dependent bookkeeping happens atomically with the insert.
    pub fn add_unless_live<F>(&self, task: Task, register: F) -> Result<(), RegistryError>
    where
        F: FnOnce(Option<&Task>),
    {
        let mut tasks = self.tasks.write();
        if let Some(existing) = tasks.get(&task.id) {
            if !existing.status.is_terminal() {
                return Err(RegistryError::TaskLive(task.id));
            }
        }
        let replaced = tasks.remove(&task.id);
        register(replaced.as_ref());
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Get a snapshot of a task
    pub fn get(&self, id: &str) -> Result<Task, RegistryError> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::TaskNotFound(id.to_string()))
    }

    /// Status and current attempt id of a task
    pub fn lease_state(&self, id: &str) -> Result<(TaskStatus, String), RegistryError> {
        self.tasks
            .read()
            .get(id)
            .map(|t| (t.status, t.attempt_id.clone()))
            .ok_or_else(|| RegistryError::TaskNotFound(id.to_string()))
    }

    /// Set the status of a task
    ///
    /// Only terminal statuses are accepted; `Running` and `Resubmitted` belong to the
    /// resubmission path and are ignored with a warning. A no-op for absent tasks
    /// (resubmission and reaping legitimately race with this) and for tasks that already
    /// reached a terminal status. Returns whether the status was applied.
    pub fn set_status(&self, id: &str, status: TaskStatus) -> bool {
        if !status.is_terminal() {
            warn!(task_id = %id, requested = %status, "set_status ignored: not a terminal status");
            return false;
        }
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(id) else {
            debug!(task_id = %id, %status, "set_status ignored: task not found");
            return false;
        };
        if task.status.is_terminal() {
            if task.status != status {
                warn!(
                    task_id = %id,
                    current = %task.status,
                    requested = %status,
                    "set_status ignored: task already finished"
                );
            }
            return task.status == status;
        }
        task.status = status;
        true
    }

    /// Record the outcome of one execution
    ///
    /// Success from any attempt completes the task, and the first value recorded is kept.
    /// Failure only counts when it comes from the current attempt; a superseded attempt
    /// failing is not a verdict on the task.
    /// Returns the resulting status, or `None` if the task is gone.
    pub fn record_outcome(
        &self,
        id: &str,
        attempt_id: &str,
        outcome: &WorkResult,
    ) -> Option<TaskStatus> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(id)?;

        match outcome {
            Ok(_) if task.status == TaskStatus::Failed || task.result.is_some() => {}
            Ok(value) => {
                task.status = TaskStatus::Completed;
                task.result = Some(value.clone());
            }
            Err(_) if task.status.is_terminal() => {}
            Err(err) if task.attempt_id != attempt_id => {
                warn!(
                    task_id = %id,
                    %attempt_id,
                    current_attempt = %task.attempt_id,
                    error = %err,
                    "superseded attempt failed; task keeps running"
                );
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err.message.clone());
            }
        }
        Some(task.status)
    }

    /// Complete a task with a value on behalf of one of its attempts
    ///
    /// Same rules as a successful [`record_outcome`](Self::record_outcome), applied while
    /// the work is still executing.
    pub fn complete(&self, id: &str, attempt_id: &str, value: serde_json::Value) -> bool {
        self.record_outcome(id, attempt_id, &Ok(value)) == Some(TaskStatus::Completed)
    }

    /// Whether `attempt_id` is the attempt currently responsible for the task
    pub fn is_current_attempt(&self, id: &str, attempt_id: &str) -> bool {
        self.tasks
            .read()
            .get(id)
            .is_some_and(|t| t.attempt_id == attempt_id)
    }

    /// Running tasks as `(task_id, attempt_id)` pairs
    pub fn running_leases(&self) -> Vec<(String, String)> {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| (t.id.clone(), t.attempt_id.clone()))
            .collect()
    }

    /// Ids of tasks in a terminal status
    pub fn terminal_ids(&self) -> Vec<String> {
        self.tasks
            .read()
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect()
    }

    /// Mark a running task as resubmitted if `stale_attempt` is still its current attempt
    ///
    /// Returns a snapshot of the task on success.
    pub fn begin_resubmission(&self, id: &str, stale_attempt: &str) -> Option<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(id)?;
        if task.status != TaskStatus::Running || task.attempt_id != stale_attempt {
            return None;
        }
        task.status = TaskStatus::Resubmitted;
        Some(task.clone())
    }

    /// Swap in a freshly registered attempt and return the task to `Running`
    ///
    /// Returns `false` when the task finished (or vanished) since the resubmission began;
    /// the new attempt is still recorded so reaping removes it.
    pub fn finish_resubmission(&self, id: &str, attempt_id: &str) -> bool {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.get_mut(id) else {
            return false;
        };
        task.attempts.push(attempt_id.to_string());
        if task.status != TaskStatus::Resubmitted {
            return false;
        }
        task.attempt_id = attempt_id.to_string();
        task.status = TaskStatus::Running;
        true
    }

    /// Remove a task if it is terminal
    ///
    /// `on_remove` runs under the registry lock so dependent entries can be dropped
    /// atomically with the task.
    pub fn remove_terminal<F>(&self, id: &str, on_remove: F) -> Option<Task>
    where
        F: FnOnce(&Task),
    {
        let mut tasks = self.tasks.write();
        if !tasks.get(id)?.status.is_terminal() {
            return None;
        }
        let task = tasks.remove(id)?;
        on_remove(&task);
        Some(task)
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::WorkError;
    use serde_json::json;

    fn task(id: &str) -> Task {
        Task::new(id, Work::new(|_ctx| async { Ok(json!(null)) }), Arguments::new())
    }

    #[test]
    fn test_new_task_uses_own_id_as_first_attempt() {
        let t = task("t1");
        assert_eq!(t.status, TaskStatus::Running);
        assert_eq!(t.attempt_id, "t1");
        assert_eq!(t.attempts, vec!["t1"]);
    }

    #[test]
    fn test_add_and_get() {
        let registry = TaskRegistry::new();
        assert!(registry.add(task("t1")).is_none());
        assert!(registry.add(task("t1")).is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("t1").unwrap().id, "t1");
        assert_eq!(
            registry.get("missing").unwrap_err(),
            RegistryError::TaskNotFound("missing".into())
        );
    }

    #[test]
    fn test_add_unless_live() {
        let registry = TaskRegistry::new();
        let mut replaced = vec![];
        registry
            .add_unless_live(task("t1"), |old| replaced.push(old.is_some()))
            .unwrap();

        assert_eq!(
            registry.add_unless_live(task("t1"), |_| {}),
            Err(RegistryError::TaskLive("t1".into()))
        );

        registry.set_status("t1", TaskStatus::Completed);
        registry
            .add_unless_live(task("t1"), |old| replaced.push(old.is_some()))
            .unwrap();

        assert_eq!(replaced, vec![false, true]);
        assert_eq!(registry.get("t1").unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn test_set_status_absent_is_noop() {
        let registry = TaskRegistry::new();
        assert!(!registry.set_status("ghost", TaskStatus::Completed));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_terminal_status_is_final() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));

        assert!(registry.set_status("t1", TaskStatus::Failed));
        assert!(!registry.set_status("t1", TaskStatus::Running));
        assert!(!registry.set_status("t1", TaskStatus::Completed));
        assert_eq!(registry.get("t1").unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn test_set_status_rejects_non_terminal() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));

        assert!(!registry.set_status("t1", TaskStatus::Resubmitted));
        assert!(!registry.set_status("t1", TaskStatus::Running));
        assert_eq!(registry.get("t1").unwrap().status, TaskStatus::Running);
        assert_eq!(
            registry.running_leases(),
            vec![("t1".to_string(), "t1".to_string())]
        );
    }

    #[test]
    fn test_status_report_cannot_abort_resubmission() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));
        registry.begin_resubmission("t1", "t1").unwrap();

        assert!(!registry.set_status("t1", TaskStatus::Running));
        assert!(registry.finish_resubmission("t1", "t1:2"));
        assert_eq!(registry.get("t1").unwrap().attempt_id, "t1:2");
    }

    #[test]
    fn test_complete_records_value() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));

        assert!(registry.complete("t1", "t1", json!(5)));
        let t = registry.get("t1").unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result, Some(json!(5)));

        // the first value is kept
        assert!(registry.complete("t1", "t1", json!(6)));
        assert_eq!(registry.get("t1").unwrap().result, Some(json!(5)));
        assert!(!registry.complete("ghost", "ghost", json!(1)));
    }

    #[test]
    fn test_is_current_attempt() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));
        assert!(registry.is_current_attempt("t1", "t1"));

        registry.begin_resubmission("t1", "t1").unwrap();
        registry.finish_resubmission("t1", "t1:2");
        assert!(!registry.is_current_attempt("t1", "t1"));
        assert!(registry.is_current_attempt("t1", "t1:2"));
        assert!(!registry.is_current_attempt("ghost", "ghost"));
    }

    #[test]
    fn test_record_success_keeps_result() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));
        registry.set_status("t1", TaskStatus::Completed);

        let status = registry.record_outcome("t1", "t1", &Ok(json!(5)));
        assert_eq!(status, Some(TaskStatus::Completed));
        assert_eq!(registry.get("t1").unwrap().result, Some(json!(5)));
    }

    #[test]
    fn test_record_failure_from_current_attempt() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));

        let status = registry.record_outcome("t1", "t1", &Err(WorkError::failed("boom")));
        assert_eq!(status, Some(TaskStatus::Failed));
        assert_eq!(registry.get("t1").unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_record_failure_from_superseded_attempt_is_ignored() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));
        registry.begin_resubmission("t1", "t1").unwrap();
        assert!(registry.finish_resubmission("t1", "t1:2"));

        let status = registry.record_outcome("t1", "t1", &Err(WorkError::failed("late")));
        assert_eq!(status, Some(TaskStatus::Running));

        // success from the stale attempt still completes the task
        let status = registry.record_outcome("t1", "t1", &Ok(json!(1)));
        assert_eq!(status, Some(TaskStatus::Completed));
    }

    #[test]
    fn test_resubmission_round_trip() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));

        assert!(registry.begin_resubmission("t1", "other").is_none());

        let snapshot = registry.begin_resubmission("t1", "t1").unwrap();
        assert_eq!(snapshot.status, TaskStatus::Resubmitted);
        assert!(registry.running_leases().is_empty());

        assert!(registry.finish_resubmission("t1", "t1:2"));
        let t = registry.get("t1").unwrap();
        assert_eq!(t.status, TaskStatus::Running);
        assert_eq!(t.attempt_id, "t1:2");
        assert_eq!(t.attempts, vec!["t1", "t1:2"]);
        assert_eq!(
            registry.running_leases(),
            vec![("t1".to_string(), "t1:2".to_string())]
        );
    }

    #[test]
    fn test_resubmission_aborted_by_completion() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));
        registry.begin_resubmission("t1", "t1").unwrap();
        registry.set_status("t1", TaskStatus::Completed);

        assert!(!registry.finish_resubmission("t1", "t1:2"));
        let t = registry.get("t1").unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.attempt_id, "t1");
        assert_eq!(t.attempts, vec!["t1", "t1:2"]);
    }

    #[test]
    fn test_remove_terminal_only() {
        let registry = TaskRegistry::new();
        registry.add(task("t1"));
        registry.add(task("t2"));

        assert!(registry.remove_terminal("t1", |_| {}).is_none());

        registry.set_status("t1", TaskStatus::Completed);
        assert_eq!(registry.terminal_ids(), vec!["t1".to_string()]);

        let mut removed_attempts = vec![];
        let removed = registry.remove_terminal("t1", |t| removed_attempts = t.attempts.clone());
        assert!(removed.is_some());
        assert_eq!(removed_attempts, vec!["t1"]);
        assert!(registry.get("t1").is_err());
        assert!(registry.get("t2").is_ok());
    }
}

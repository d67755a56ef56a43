//! Engine facade
//!
//! Composes the registries, worker pool, heartbeat senders and lease monitor behind
//! `submit` / `status` / `set_status` / `shutdown`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::monitor::{LeaseMonitor, Resubmission, ScanReport};
use crate::registry::{Attempt, AttemptRegistry, RegistryError, Task, TaskRegistry, TaskStatus};
use crate::work::{Arguments, Work, WorkContext};
use crate::worker::{HeartbeatSender, HeartbeatSession, PoolError, WorkerPool};

/// Engine errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A live task already uses this id
    #[error("task id already in use: {0}")]
    DuplicateTaskId(String),

    /// Task not found (never submitted, or already reaped)
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Attempt not found
    #[error("attempt not found: {0}")]
    AttemptNotFound(String),

    /// Shutdown has begun; no new work is accepted
    #[error("engine is shutting down")]
    ShuttingDown,

    /// The worker pool did not drain within the configured timeout
    #[error("shutdown timed out with {remaining} executions in flight")]
    ShutdownTimeout { remaining: usize },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The engine was created outside a Tokio runtime
    #[error("engine must be created inside a Tokio runtime")]
    NoRuntime,
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::TaskNotFound(id) => Self::TaskNotFound(id),
            RegistryError::AttemptNotFound(id) => Self::AttemptNotFound(id),
            RegistryError::TaskLive(id) => Self::DuplicateTaskId(id),
        }
    }
}

impl From<PoolError> for EngineError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Closed => Self::ShuttingDown,
            PoolError::ShutdownTimeout { remaining } => Self::ShutdownTimeout { remaining },
        }
    }
}

/// Caller-facing snapshot of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    pub status: TaskStatus,
    /// Attempt currently responsible for the task
    pub attempt_id: String,
    /// Number of attempts launched so far
    pub attempts: usize,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// Time left before the current attempt's lease expires
    pub lease_remaining_ms: Option<u64>,
}

/// Liveness snapshot of an attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptView {
    pub id: String,
    pub task_id: String,
    pub number: u32,
    pub info: serde_json::Value,
    /// Time since the last heartbeat
    pub since_heartbeat: Duration,
}

/// State shared by the facade, the lease monitor and in-flight executions
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) attempts: Arc<AttemptRegistry>,
    pub(crate) pool: WorkerPool,
    pub(crate) shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Hand one attempt to the pool together with its heartbeat session
    ///
    /// The outcome is recorded on the task once the work returns and the heartbeat sender
    /// has exited.
    pub(crate) fn launch(
        &self,
        task_id: &str,
        attempt_id: &str,
        number: u32,
        work: &Work,
        arguments: Arguments,
    ) -> Result<(), EngineError> {
        let ctx = WorkContext::new(
            task_id,
            attempt_id,
            number,
            arguments,
            Arc::clone(&self.tasks),
        );
        let handle = self.pool.submit(work, ctx)?;

        let session = if work.heartbeat_enabled() {
            HeartbeatSender::new(
                task_id,
                attempt_id,
                self.config.heartbeat_period,
                Arc::clone(&self.tasks),
                Arc::clone(&self.attempts),
                self.shutdown.child_token(),
            )
            .spawn()
        } else {
            HeartbeatSession::disabled()
        };

        let tasks = Arc::clone(&self.tasks);
        self.pool.track(async move {
            let task_id = handle.task_id().to_string();
            let attempt_id = handle.attempt_id().to_string();
            let outcome = handle.outcome().await;
            session.stop().await;

            if let Err(err) = &outcome {
                warn!(%task_id, %attempt_id, kind = ?err.kind, error = %err, "Work failed");
            }
            match tasks.record_outcome(&task_id, &attempt_id, &outcome) {
                Some(status) => info!(%task_id, %attempt_id, %status, "Attempt finished"),
                None => debug!(%task_id, %attempt_id, "Attempt finished after task was reaped"),
            }
        });

        Ok(())
    }

    /// Replace a silent attempt with a fresh one and launch it
    ///
    /// Returns `None` when the task moved on (finished, or another attempt took over)
    /// before the swap.
    pub(crate) fn resubmit(
        &self,
        task_id: &str,
        stale_attempt: &str,
    ) -> Result<Option<Resubmission>, EngineError> {
        let Some(task) = self.tasks.begin_resubmission(task_id, stale_attempt) else {
            return Ok(None);
        };

        let number = task.attempts.len() as u32 + 1;
        let attempt_id = format!("{}:{}", task_id, Uuid::now_v7());
        self.attempts.add(Attempt::new(
            &attempt_id,
            task_id,
            number,
            json!({
                "number": number,
                "reason": "lease_expired",
                "previous_attempt": stale_attempt,
            }),
        ));

        if !self.tasks.finish_resubmission(task_id, &attempt_id) {
            if self.tasks.lease_state(task_id).is_err() {
                self.attempts.remove(&attempt_id);
            }
            debug!(%task_id, %attempt_id, "Task finished during resubmission; attempt not launched");
            return Ok(None);
        }

        self.launch(task_id, &attempt_id, number, &task.work, task.arguments)?;

        Ok(Some(Resubmission {
            task_id: task_id.to_string(),
            previous_attempt: stale_attempt.to_string(),
            attempt_id,
            number,
        }))
    }

    /// Remove a terminal task and all of its attempts
    pub(crate) fn reap(&self, task_id: &str) -> Option<Task> {
        let attempts = &self.attempts;
        self.tasks.remove_terminal(task_id, |task| {
            attempts.remove_all(&task.attempts);
        })
    }
}

/// Lease-based asynchronous task execution engine
///
/// Cloning is cheap; clones share the same registries, pool and monitor.
///
/// # Example
///
/// ```ignore
/// use leasekeep_engine::prelude::*;
///
/// let engine = Engine::new(EngineConfig::default())?;
///
/// let add = Work::new(|ctx: WorkContext| async move {
///     let x: i64 = ctx.arg("x")?;
///     let y: i64 = ctx.arg("y")?;
///     Ok::<_, WorkError>(json!(x + y))
/// });
/// engine.submit(add, "t1", args)?;
///
/// let view = engine.status("t1")?;
///
/// engine.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Create an engine and start its lease monitor
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let shared = Arc::new(Shared {
            pool: WorkerPool::new(config.max_workers),
            config,
            tasks: Arc::new(TaskRegistry::new()),
            attempts: Arc::new(AttemptRegistry::new()),
            shutdown: CancellationToken::new(),
            monitor: Mutex::new(None),
        });

        let monitor = LeaseMonitor::new(Arc::clone(&shared));
        let handle = runtime.spawn(monitor.run(shared.shutdown.clone()));
        *shared.monitor.lock() = Some(handle);

        info!(
            lease = ?shared.config.lease_duration,
            heartbeat = ?shared.config.heartbeat_period,
            monitor_interval = ?shared.config.monitor_interval,
            max_workers = shared.config.max_workers,
            "Lease engine started"
        );

        Ok(Self { shared })
    }

    /// Create an engine configured from environment variables
    pub fn from_env() -> Result<Self, EngineError> {
        Self::new(EngineConfig::from_env()?)
    }

    /// Submit a unit of work under a caller-supplied task id
    ///
    /// Registers the task as running with an initial attempt whose id equals the task id,
    /// then starts the execution and its heartbeat sender. A task id that belongs to a
    /// finished task awaiting reaping is reused.
    #[instrument(skip(self, work, arguments))]
    pub fn submit(
        &self,
        work: Work,
        task_id: &str,
        arguments: Arguments,
    ) -> Result<(), EngineError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let attempts = &self.shared.attempts;
        let task = Task::new(task_id, work.clone(), arguments.clone());
        self.shared.tasks.add_unless_live(task, |replaced| {
            if let Some(old) = replaced {
                debug!(task_id, "Replacing finished task");
                attempts.remove_all(&old.attempts);
            }
            attempts.add(Attempt::new(
                task_id,
                task_id,
                1,
                json!({ "number": 1, "reason": "initial" }),
            ));
        })?;

        if let Err(e) = self.shared.launch(task_id, task_id, 1, &work, arguments) {
            self.shared.tasks.set_status(task_id, TaskStatus::Failed);
            self.shared.reap(task_id);
            return Err(e);
        }

        info!(task_id, "Task submitted");
        Ok(())
    }

    /// Current view of a task
    pub fn status(&self, task_id: &str) -> Result<TaskView, EngineError> {
        let task = self.shared.tasks.get(task_id)?;
        let lease_remaining_ms = self.shared.attempts.get(&task.attempt_id).ok().map(|a| {
            let deadline = a.last_heartbeat + self.shared.config.lease_duration;
            deadline.saturating_duration_since(Instant::now()).as_millis() as u64
        });

        Ok(TaskView {
            id: task.id,
            status: task.status,
            attempt_id: task.attempt_id,
            attempts: task.attempts.len(),
            result: task.result,
            error: task.error,
            submitted_at: task.submitted_at,
            lease_remaining_ms,
        })
    }

    /// Report a task's terminal status
    ///
    /// No-op (logged) when the task is gone or already finished, or when `status` is
    /// `Running` or `Resubmitted`; returns whether the status was applied.
    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> bool {
        self.shared.tasks.set_status(task_id, status)
    }

    /// Liveness view of an attempt
    pub fn attempt(&self, attempt_id: &str) -> Result<AttemptView, EngineError> {
        let attempt = self.shared.attempts.get(attempt_id)?;
        Ok(AttemptView {
            since_heartbeat: Instant::now().saturating_duration_since(attempt.last_heartbeat),
            id: attempt.id,
            task_id: attempt.task_id,
            number: attempt.number,
            info: attempt.info,
        })
    }

    /// Run one lease scan immediately
    pub fn scan_now(&self) -> ScanReport {
        LeaseMonitor::new(Arc::clone(&self.shared)).scan()
    }

    /// Executions accepted but not yet finished
    pub fn in_flight(&self) -> usize {
        self.shared.pool.in_flight()
    }

    /// Number of registered tasks
    pub fn task_count(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Number of registered attempts
    pub fn attempt_count(&self) -> usize {
        self.shared.attempts.len()
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> &Shared {
        &self.shared
    }

    /// Stop the lease monitor, then wait for accepted work to finish
    ///
    /// Heartbeat senders stop immediately; work is never interrupted. Fails with
    /// [`EngineError::ShutdownTimeout`] if a drain timeout is configured and exceeded.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        info!(in_flight = self.in_flight(), "Initiating engine shutdown");
        self.shared.shutdown.cancel();

        let monitor = self.shared.monitor.lock().take();
        if let Some(handle) = monitor {
            if let Err(e) = handle.await {
                error!(error = %e, "Lease monitor terminated abnormally");
            }
        }

        self.shared
            .pool
            .drain(self.shared.config.shutdown_timeout)
            .await?;

        info!("Lease engine stopped");
        Ok(())
    }
}

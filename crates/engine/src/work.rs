//! Units of work and their execution context
//!
//! A [`Work`] is the type-erased function the engine runs for a task. It is invoked once
//! per attempt with a [`WorkContext`] and resolves to a JSON value or a [`WorkError`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::registry::{TaskRegistry, TaskStatus};

/// Keyword arguments passed to a unit of work
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Outcome of one execution of a unit of work
pub type WorkResult = Result<serde_json::Value, WorkError>;

type WorkFn = dyn Fn(WorkContext) -> BoxFuture<'static, WorkResult> + Send + Sync;

/// Classification of a work failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkErrorKind {
    /// The work function returned an error
    Failed,
    /// The work function panicked
    Panicked,
    /// The execution was cancelled before it produced a result
    Cancelled,
}

/// Error produced by a unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkError {
    /// Error message
    pub message: String,

    /// What kind of failure this was
    pub kind: WorkErrorKind,
}

impl WorkError {
    /// Create an error for a work function that failed
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: WorkErrorKind::Failed,
        }
    }

    /// Create an error for a work function that panicked
    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: WorkErrorKind::Panicked,
        }
    }

    /// Create an error for an execution that was cancelled
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: WorkErrorKind::Cancelled,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "work panicked".to_string()
        };
        Self::panicked(message)
    }

    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::cancelled("execution was cancelled")
        } else {
            match err.try_into_panic() {
                Ok(payload) => Self::from_panic(payload),
                Err(err) => Self::failed(err.to_string()),
            }
        }
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkError {}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for WorkError {
    fn from(err: serde_json::Error) -> Self {
        Self::failed(err.to_string())
    }
}

/// Context handed to a unit of work for one attempt
#[derive(Clone)]
pub struct WorkContext {
    /// Task this execution belongs to
    pub task_id: String,

    /// Attempt this execution runs under
    pub attempt_id: String,

    /// Attempt number (1-based)
    pub attempt_number: u32,

    /// Keyword arguments supplied at submission
    pub arguments: Arguments,

    tasks: Arc<TaskRegistry>,
}

impl WorkContext {
    pub(crate) fn new(
        task_id: impl Into<String>,
        attempt_id: impl Into<String>,
        attempt_number: u32,
        arguments: Arguments,
        tasks: Arc<TaskRegistry>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            attempt_id: attempt_id.into(),
            attempt_number,
            arguments,
            tasks,
        }
    }

    /// Deserialize a named argument
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T, WorkError> {
        let value = self
            .arguments
            .get(name)
            .ok_or_else(|| WorkError::failed(format!("missing argument: {}", name)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| WorkError::failed(format!("invalid argument {}: {}", name, e)))
    }

    /// Report a terminal status for this task
    ///
    /// Returns `false` when the task is gone, already terminal, or `status` is not
    /// terminal. A task reported `Completed` this way only gets its result once the work
    /// returns; use [`complete`](Self::complete) to attach the value immediately.
    pub fn report(&self, status: TaskStatus) -> bool {
        self.tasks.set_status(&self.task_id, status)
    }

    /// Complete this task with `value` before the work returns
    pub fn complete(&self, value: serde_json::Value) -> bool {
        self.tasks.complete(&self.task_id, &self.attempt_id, value)
    }

    /// Whether this attempt still owns the task
    ///
    /// `false` once a resubmission superseded it or the task was reaped.
    pub fn is_current_attempt(&self) -> bool {
        self.tasks.is_current_attempt(&self.task_id, &self.attempt_id)
    }

    /// Whether this is a resubmitted attempt
    pub fn is_retry(&self) -> bool {
        self.attempt_number > 1
    }
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContext")
            .field("task_id", &self.task_id)
            .field("attempt_id", &self.attempt_id)
            .field("attempt_number", &self.attempt_number)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

/// A unit of work the engine can run
///
/// # Example
///
/// ```
/// use leasekeep_engine::{Work, WorkContext, WorkError};
/// use serde_json::json;
///
/// let add = Work::new(|ctx: WorkContext| async move {
///     let x: i64 = ctx.arg("x")?;
///     let y: i64 = ctx.arg("y")?;
///     Ok::<_, WorkError>(json!(x + y))
/// });
/// assert!(add.heartbeat_enabled());
/// ```
#[derive(Clone)]
pub struct Work {
    func: Arc<WorkFn>,
    heartbeat: bool,
}

impl Work {
    /// Wrap an async function
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx| func(ctx).boxed()),
            heartbeat: true,
        }
    }

    /// Wrap a blocking function
    ///
    /// The function runs on the blocking thread pool so it cannot stall the runtime
    /// threads that drive the monitor and heartbeats.
    pub fn blocking<F>(func: F) -> Self
    where
        F: Fn(WorkContext) -> WorkResult + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(move |ctx| {
            let func = Arc::clone(&func);
            async move {
                tokio::task::spawn_blocking(move || func(ctx))
                    .await
                    .unwrap_or_else(|e| Err(WorkError::from_join(e)))
            }
        })
    }

    /// Run without a heartbeat sender
    ///
    /// The attempt's lease is never refreshed, so the lease monitor will resubmit the task
    /// once the lease expires unless the work finishes first.
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = false;
        self
    }

    /// Whether a heartbeat sender accompanies executions of this work
    pub fn heartbeat_enabled(&self) -> bool {
        self.heartbeat
    }

    pub(crate) fn call(&self, ctx: WorkContext) -> BoxFuture<'static, WorkResult> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

//! Worker pool for task execution
//!
//! Runs units of work with bounded concurrency and drains gracefully on shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::work::{Work, WorkContext, WorkError, WorkResult};

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Accepting and running work
    Running,
    /// Not accepting new work, finishing what was accepted
    Draining,
    /// Not accepting work and nothing left in flight
    Stopped,
}

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool no longer accepts work
    #[error("worker pool is closed")]
    Closed,

    /// Drain did not finish in time
    #[error("graceful shutdown timed out with {remaining} executions in flight")]
    ShutdownTimeout { remaining: usize },
}

/// Handle to one submitted execution
///
/// Resolves to the work's value or a captured [`WorkError`]; panics and cancellation are
/// reported as errors rather than propagated.
pub struct WorkHandle {
    task_id: String,
    attempt_id: String,
    inner: JoinHandle<WorkResult>,
}

impl WorkHandle {
    /// Task the execution belongs to
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Attempt the execution runs under
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Wait for the execution to finish
    pub async fn outcome(self) -> WorkResult {
        match self.inner.await {
            Ok(result) => result,
            Err(e) => Err(WorkError::from_join(e)),
        }
    }
}

/// Decrements a counter when dropped
struct CounterGuard(Arc<AtomicUsize>);

impl CounterGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fixed-capacity pool of execution slots
///
/// Submissions beyond capacity wait for a slot in FIFO order; nothing is rejected while
/// the pool is open. Callers that need backpressure should watch [`WorkerPool::in_flight`].
///
/// # Example
///
/// ```ignore
/// let pool = WorkerPool::new(4);
/// let handle = pool.submit(&work, ctx)?;
/// let value = handle.outcome().await?;
/// pool.drain(None).await?;
/// ```
pub struct WorkerPool {
    max_workers: usize,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    accepting: AtomicBool,
    in_flight: Arc<AtomicUsize>,
    executing: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots (at least one)
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            slots: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            accepting: AtomicBool::new(true),
            in_flight: Arc::new(AtomicUsize::new(0)),
            executing: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue a unit of work for execution
    pub fn submit(&self, work: &Work, ctx: WorkContext) -> Result<WorkHandle, PoolError> {
        if !self.is_accepting() {
            return Err(PoolError::Closed);
        }

        let task_id = ctx.task_id.clone();
        let attempt_id = ctx.attempt_id.clone();
        let slots = Arc::clone(&self.slots);
        let executing = Arc::clone(&self.executing);
        let queued = CounterGuard::new(&self.in_flight);
        let work = work.clone();

        let inner = self.tracker.spawn(async move {
            let _queued = queued;
            let _permit = slots
                .acquire_owned()
                .await
                .map_err(|_| WorkError::cancelled("worker pool closed"))?;
            let _executing = CounterGuard::new(&executing);

            debug!(task_id = %ctx.task_id, attempt_id = %ctx.attempt_id, "executing work");
            AssertUnwindSafe(async move { work.call(ctx).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(WorkError::from_panic(payload)))
        });

        Ok(WorkHandle {
            task_id,
            attempt_id,
            inner,
        })
    }

    /// Track a companion future so [`WorkerPool::drain`] waits for it too
    pub fn track<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Stop accepting work
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(in_flight = self.in_flight(), "worker pool closed to new work");
        }
        self.tracker.close();
    }

    /// Close the pool and wait for every accepted execution to finish
    pub async fn drain(&self, timeout: Option<Duration>) -> Result<(), PoolError> {
        self.close();

        match timeout {
            None => self.tracker.wait().await,
            Some(timeout) => {
                if tokio::time::timeout(timeout, self.tracker.wait())
                    .await
                    .is_err()
                {
                    let remaining = self.in_flight();
                    warn!(remaining, "worker pool drain timed out");
                    return Err(PoolError::ShutdownTimeout { remaining });
                }
            }
        }

        debug!("worker pool drained");
        Ok(())
    }

    /// Whether new work is accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Current status
    pub fn status(&self) -> WorkerPoolStatus {
        if self.is_accepting() {
            WorkerPoolStatus::Running
        } else if self.tracker.is_empty() {
            WorkerPoolStatus::Stopped
        } else {
            WorkerPoolStatus::Draining
        }
    }

    /// Number of slots
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Executions accepted but not yet finished (queued or running)
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Executions currently holding a slot
    pub fn executing(&self) -> usize {
        self.executing.load(Ordering::SeqCst)
    }
}

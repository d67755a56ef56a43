//! Per-attempt heartbeat sender
//!
//! A [`HeartbeatSender`] refreshes one attempt's lease while its work is in flight. It is
//! owned through a [`HeartbeatSession`], which brackets the execution: the session is
//! started when the attempt is handed to the pool and stopped (and joined) once the work
//! returns, on every exit path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::registry::{AttemptRegistry, TaskRegistry, TaskStatus};

/// Why a heartbeat sender stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// The stop signal was raised
    Stopped,
    /// The attempt is no longer registered
    AttemptMissing,
    /// The task is no longer registered
    TaskMissing,
    /// The task left the running status
    NotRunning(TaskStatus),
    /// A newer attempt took over the task
    Superseded,
}

/// Periodically refreshes one attempt's heartbeat
pub struct HeartbeatSender {
    task_id: String,
    attempt_id: String,
    period: Duration,
    tasks: Arc<TaskRegistry>,
    attempts: Arc<AttemptRegistry>,
    stop: CancellationToken,
}

impl HeartbeatSender {
    /// Create a sender; `stop` ends the loop when cancelled
    pub fn new(
        task_id: impl Into<String>,
        attempt_id: impl Into<String>,
        period: Duration,
        tasks: Arc<TaskRegistry>,
        attempts: Arc<AttemptRegistry>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            attempt_id: attempt_id.into(),
            period,
            tasks,
            attempts,
            stop,
        }
    }

    /// Run until stopped or until the attempt no longer needs a lease
    pub async fn run(self) -> HeartbeatExit {
        let exit = loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break HeartbeatExit::Stopped,
                _ = tokio::time::sleep(self.period) => {}
            }

            if let Err(e) = self.attempts.update_heartbeat(&self.attempt_id) {
                debug!(attempt_id = %self.attempt_id, error = %e, "heartbeat target gone");
                break HeartbeatExit::AttemptMissing;
            }
            trace!(task_id = %self.task_id, attempt_id = %self.attempt_id, "heartbeat sent");

            match self.tasks.lease_state(&self.task_id) {
                Err(_) => break HeartbeatExit::TaskMissing,
                Ok((status, _)) if status != TaskStatus::Running => {
                    break HeartbeatExit::NotRunning(status)
                }
                Ok((_, current)) if current != self.attempt_id => {
                    break HeartbeatExit::Superseded
                }
                Ok(_) => {}
            }
        };

        debug!(
            task_id = %self.task_id,
            attempt_id = %self.attempt_id,
            ?exit,
            "heartbeat sender exiting"
        );
        exit
    }

    /// Start the sender in the background
    pub fn spawn(self) -> HeartbeatSession {
        let stop = self.stop.clone();
        HeartbeatSession {
            stop,
            handle: Some(tokio::spawn(self.run())),
        }
    }
}

/// Scoped ownership of a running heartbeat sender
///
/// Dropping the session raises the stop signal; [`HeartbeatSession::stop`] additionally
/// waits for the sender to exit so no heartbeat is emitted afterwards.
pub struct HeartbeatSession {
    stop: CancellationToken,
    handle: Option<JoinHandle<HeartbeatExit>>,
}

impl HeartbeatSession {
    /// A session with no sender, for work that runs without heartbeats
    pub fn disabled() -> Self {
        Self {
            stop: CancellationToken::new(),
            handle: None,
        }
    }

    /// Whether a sender is attached
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Raise the stop signal and wait for the sender to exit
    pub async fn stop(mut self) -> Option<HeartbeatExit> {
        self.stop.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    }
}

impl Drop for HeartbeatSession {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

//! Lease monitor
//!
//! Periodically scans running tasks, resubmits those whose current attempt went silent for
//! longer than the lease, and reaps finished tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineError, Shared};

/// A task handed to a fresh attempt after its lease expired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resubmission {
    pub task_id: String,
    pub previous_attempt: String,
    pub attempt_id: String,
    pub number: u32,
}

/// Outcome of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Tasks moved to a new attempt
    pub resubmitted: Vec<Resubmission>,
    /// Finished tasks removed from the registries
    pub reaped: Vec<String>,
    /// Tasks whose lease check failed and were skipped
    pub errors: usize,
}

impl ScanReport {
    /// Whether the scan changed nothing
    pub fn is_empty(&self) -> bool {
        self.resubmitted.is_empty() && self.reaped.is_empty() && self.errors == 0
    }
}

pub(crate) struct LeaseMonitor {
    shared: Arc<Shared>,
}

impl LeaseMonitor {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Scan every `monitor_interval` until `shutdown` is cancelled
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        let interval = self.shared.config.monitor_interval;
        info!(?interval, lease = ?self.shared.config.lease_duration, "Lease monitor started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let report = self.scan();
            if !report.is_empty() {
                debug!(
                    resubmitted = report.resubmitted.len(),
                    reaped = report.reaped.len(),
                    errors = report.errors,
                    "Lease scan finished"
                );
            }
        }

        info!("Lease monitor stopped");
    }

    /// One pass over the task registry
    ///
    /// A failure on one task is logged and skipped; the rest of the scan continues.
    pub(crate) fn scan(&self) -> ScanReport {
        let now = Instant::now();
        let lease = self.shared.config.lease_duration;
        let mut report = ScanReport::default();

        for (task_id, attempt_id) in self.shared.tasks.running_leases() {
            if self.shared.shutdown.is_cancelled() {
                break;
            }
            match self.check_lease(&task_id, &attempt_id, now, lease) {
                Ok(Some(resubmission)) => report.resubmitted.push(resubmission),
                Ok(None) => {}
                Err(e) => {
                    error!(%task_id, %attempt_id, error = %e, "Lease check failed; skipping task");
                    report.errors += 1;
                }
            }
        }

        for task_id in self.shared.tasks.terminal_ids() {
            if let Some(task) = self.shared.reap(&task_id) {
                info!(
                    %task_id,
                    status = %task.status,
                    attempts = task.attempts.len(),
                    "Reaped finished task"
                );
                report.reaped.push(task_id);
            }
        }

        report
    }

    fn check_lease(
        &self,
        task_id: &str,
        attempt_id: &str,
        now: Instant,
        lease: Duration,
    ) -> Result<Option<Resubmission>, EngineError> {
        let attempt = self.shared.attempts.get(attempt_id)?;
        let silent_for = now.saturating_duration_since(attempt.last_heartbeat);
        if silent_for <= lease {
            return Ok(None);
        }

        warn!(task_id, attempt_id, ?silent_for, "Lease expired; resubmitting task");
        let resubmission = self.shared.resubmit(task_id, attempt_id)?;
        if let Some(r) = &resubmission {
            info!(
                task_id,
                previous_attempt = %r.previous_attempt,
                attempt_id = %r.attempt_id,
                number = r.number,
                "Task resubmitted"
            );
        }
        Ok(resubmission)
    }
}

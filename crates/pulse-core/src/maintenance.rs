//! Storage maintenance: boot recovery and expiry cleanup.

use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::PulseError;
use crate::job::JobStatus;

/// Error stored on jobs found unfinished by [`Coordinator::resolve_unfinished`].
pub const ORPHANED_ON_BOOT: &str =
    "Job was force set to Failed because it was Pending or InProgress on boot.";

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of a boot recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Jobs seen in storage.
    pub total: usize,
    /// Pending or in-progress jobs moved to `Failed`.
    pub unfinished: usize,
    /// Entries that could not be read.
    pub unreadable: usize,
}

/// Result of an expiry cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Jobs seen in storage.
    pub total: usize,
    /// Expired jobs removed.
    pub removed: usize,
    /// Expired jobs that could not be removed.
    pub failed: usize,
    /// Entries that could not be read.
    pub unreadable: usize,
}

impl CleanupReport {
    pub fn attempted(&self) -> usize {
        self.removed + self.failed
    }
}

impl Coordinator {
    /// Fail every pending or in-progress job that has no live worker here.
    ///
    /// Meant to run at startup: a stored job that claims to be running has
    /// lost the process that ran it. Unreadable entries are counted and
    /// skipped; only errors from updating a job abort the sweep.
    pub async fn resolve_unfinished(&self) -> Result<RecoveryReport, PulseError> {
        let storage = self.storage().clone();
        let mut report = RecoveryReport::default();
        let mut jobs = storage.enumerate();

        while let Some(entry) = jobs.next().await {
            let job = match entry {
                Ok(job) => job,
                Err(err) => {
                    warn!("Skipping unreadable job during recovery: {}", err);
                    report.unreadable += 1;
                    continue;
                }
            };
            report.total += 1;
            if job.status().is_terminal() || self.is_active(job.id()) {
                continue;
            }

            report.unfinished += 1;
            match job
                .set_status(storage.as_ref(), JobStatus::Failed, Some(ORPHANED_ON_BOOT.to_string()))
                .await
            {
                Ok(_) => debug!("Job ({}) marked as failed on boot", job),
                Err(err @ PulseError::InvalidTransition { .. }) => {
                    debug!("Job ({}) finished during recovery: {}", job, err)
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }

    /// Remove every job whose idle time reached its expiry.
    pub async fn cleanup_expired(&self) -> Result<CleanupReport, PulseError> {
        let storage = self.storage().clone();
        let mut report = CleanupReport::default();
        let mut jobs = storage.enumerate();

        while let Some(entry) = jobs.next().await {
            let job = match entry {
                Ok(job) => job,
                Err(err) => {
                    warn!("Skipping unreadable job during cleanup: {}", err);
                    report.unreadable += 1;
                    continue;
                }
            };
            report.total += 1;
            if !job.is_expired() {
                continue;
            }

            match self.remove_job(job.id()).await {
                Ok(Some(_)) => report.removed += 1,
                Ok(None) => report.failed += 1,
                Err(err) => {
                    warn!("Failed to remove expired job ({}): {}", job, err);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Drives recovery once, then cleanup on a fixed interval. The first
/// cleanup runs right after recovery.
pub struct StorageMaintainer {
    coordinator: Coordinator,
    interval: Duration,
}

impl StorageMaintainer {
    /// Use the coordinator's `storage_maintain_interval`.
    pub fn new(coordinator: Coordinator) -> Self {
        let interval = coordinator.config().storage_maintain_interval();
        Self {
            coordinator,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until `shutdown` fires. Sweep errors are logged and retried on
    /// the next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Executing initial storage maintenance check...");
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Storage maintenance stopped before recovery finished");
                return;
            }
            res = self.coordinator.resolve_unfinished() => match res {
                Ok(report) => info!(
                    "Maintenance finished. Total jobs in storage: {}. Total unfinished: {}. Unreadable: {}",
                    report.total, report.unfinished, report.unreadable
                ),
                Err(err) => error!("Boot recovery failed: {}", err),
            }
        }

        let mut ticker = interval(self.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            info!("Initiating cleanup of expired jobs...");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.coordinator.cleanup_expired() => match res {
                    Ok(report) => info!(
                        "Cleanup completed. Total jobs found: {}. Attempted to remove: {}. Succeeded {}. Failed: {}.",
                        report.total,
                        report.attempted(),
                        report.removed,
                        report.failed
                    ),
                    Err(err) => error!("Unexpected error occurred during storage cleanup: {}", err),
                }
            }
        }

        info!("Storage maintenance stopped");
    }
}

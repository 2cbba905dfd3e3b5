//! Single job execution attempt.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executable::{Executable, JobContext};
use crate::job::Job;
use crate::storage::JobStorage;

/// Which cancellation source ended an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// [`Worker::cancel`] or the worker was dropped.
    Explicit,
    /// The token captured from the scheduling caller.
    Caller,
    /// The maximum run time elapsed.
    Timeout(Duration),
}

impl fmt::Display for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelSource::Explicit => write!(f, "cancelled explicitly"),
            CancelSource::Caller => write!(f, "cancelled by the caller"),
            CancelSource::Timeout(limit) => write!(f, "max run time of {limit:?} exceeded"),
        }
    }
}

/// How an execution ended.
#[derive(Debug)]
pub enum WorkerOutcome {
    Completed,
    Cancelled(CancelSource),
    Failed(anyhow::Error),
}

/// Runs one job body under composed cancellation.
///
/// The body sees a single token that fires when any of the local switch,
/// the caller token or the run-time timer fires. Execution time is recorded
/// on the job for every outcome.
pub struct Worker {
    executable: Arc<dyn Executable>,
    max_run_time: Duration,
    local: CancellationToken,
}

impl Worker {
    pub fn new(executable: Arc<dyn Executable>, max_run_time: Duration) -> Self {
        Self {
            executable,
            max_run_time,
            local: CancellationToken::new(),
        }
    }

    /// Worker whose local switch also trips when `parent` is cancelled.
    pub fn with_parent(
        executable: Arc<dyn Executable>,
        max_run_time: Duration,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            executable,
            max_run_time,
            local: parent.child_token(),
        }
    }

    /// Trip the local cancel switch.
    pub fn cancel(&self) {
        self.local.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.local.is_cancelled()
    }

    /// Resolves once the local switch is tripped.
    pub async fn cancelled(&self) {
        self.local.cancelled().await
    }

    pub async fn execute(
        &self,
        job: &Arc<Job>,
        storage: Arc<dyn JobStorage>,
        caller: &CancellationToken,
    ) -> WorkerOutcome {
        if self.local.is_cancelled() {
            return WorkerOutcome::Cancelled(CancelSource::Explicit);
        }
        if caller.is_cancelled() {
            return WorkerOutcome::Cancelled(CancelSource::Caller);
        }

        let token = self.local.child_token();
        let ctx = JobContext::new(job.clone(), storage, token.clone());
        let body = AssertUnwindSafe(self.executable.execute(ctx)).catch_unwind();
        tokio::pin!(body);

        let started = Instant::now();
        let outcome = tokio::select! {
            res = &mut body => match res {
                Ok(Ok(())) => WorkerOutcome::Completed,
                Ok(Err(err)) if caller.is_cancelled() => {
                    debug!("Job ({}) returned after caller cancellation: {}", job, err);
                    WorkerOutcome::Cancelled(CancelSource::Caller)
                }
                Ok(Err(err)) if token.is_cancelled() => {
                    debug!("Job ({}) returned after cancellation: {}", job, err);
                    WorkerOutcome::Cancelled(CancelSource::Explicit)
                }
                Ok(Err(err)) => WorkerOutcome::Failed(err),
                Err(panic) => WorkerOutcome::Failed(anyhow::anyhow!("job body panicked: {}", panic_message(&panic))),
            },
            _ = self.local.cancelled() => WorkerOutcome::Cancelled(CancelSource::Explicit),
            _ = caller.cancelled() => {
                token.cancel();
                WorkerOutcome::Cancelled(CancelSource::Caller)
            }
            _ = tokio::time::sleep(self.max_run_time) => {
                token.cancel();
                WorkerOutcome::Cancelled(CancelSource::Timeout(self.max_run_time))
            }
        };

        let elapsed = started.elapsed();
        job.set_execution_time(elapsed);
        debug!("Job ({}) body finished in {:?}", job, elapsed);
        outcome
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.local.cancel();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

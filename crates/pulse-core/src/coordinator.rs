//! Scheduling façade: admission, execution and removal of jobs.

use std::sync::Arc;

use dashmap::DashMap;
use pulse_config::{ConfigValidator, PulseConfig};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PulseError;
use crate::executable::Executable;
use crate::job::{Job, JobStatus};
use crate::storage::{JobStorage, JobStream};
use crate::worker::{CancelSource, Worker, WorkerOutcome};

/// Longest accepted caller-supplied job id.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Check a caller-supplied job id.
///
/// Ids end up as file names, so only `[A-Za-z0-9_.-]` is accepted and the
/// relative path components `.` and `..` are rejected.
pub fn validate_job_id(id: &str) -> Result<(), PulseError> {
    let invalid = |reason: &str| {
        Err(PulseError::InvalidJobId {
            id: id.to_string(),
            reason: reason.to_string(),
        })
    };

    if id.is_empty() {
        return invalid("id is empty");
    }
    if id.len() > MAX_JOB_ID_LEN {
        return invalid("id is longer than 128 characters");
    }
    if id == "." || id == ".." {
        return invalid("id is a relative path component");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("only ASCII letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}

/// Schedules jobs, bounds admission and parallelism, tracks live workers.
///
/// Cheap to clone; clones share limiters, the worker table and storage.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn JobStorage>,
    config: PulseConfig,
    queue: Arc<Semaphore>,
    parallelism: Arc<Semaphore>,
    active: DashMap<String, Arc<Worker>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Create a coordinator over `storage`.
    pub fn new(storage: Arc<dyn JobStorage>, config: PulseConfig) -> Result<Self, PulseError> {
        let warnings = ConfigValidator::validate_scheduler(&config).into_result()?;
        for warning in warnings {
            warn!("Scheduler config {}: {}", warning.path, warning.message);
        }

        info!(
            "Coordinator started over {} storage (parallelism: {}, queue size: {})",
            storage.name(),
            config.max_parallelism,
            config.max_queue_size
        );

        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                queue: Arc::new(Semaphore::new(config.max_queue_size)),
                parallelism: Arc::new(Semaphore::new(config.max_parallelism)),
                config,
                active: DashMap::new(),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn storage(&self) -> &Arc<dyn JobStorage> {
        &self.inner.storage
    }

    pub fn config(&self) -> &PulseConfig {
        &self.inner.config
    }

    /// Schedule a job under a freshly generated id.
    pub async fn schedule<E: Executable>(
        &self,
        executable: E,
        token: &CancellationToken,
    ) -> Result<Arc<Job>, PulseError> {
        let id = Uuid::new_v4().simple().to_string();
        self.create_job(id, Arc::new(executable), token).await
    }

    /// Schedule a job under a caller-chosen id.
    ///
    /// With `overwrite` any existing job is removed (and its worker
    /// cancelled) first. Otherwise a pending, running or successful job with
    /// this id is returned as-is and nothing new runs; a failed or cancelled
    /// one is replaced.
    pub async fn schedule_with_id<E: Executable>(
        &self,
        id: &str,
        executable: E,
        overwrite: bool,
        token: &CancellationToken,
    ) -> Result<Arc<Job>, PulseError> {
        validate_job_id(id)?;

        if overwrite {
            debug!("Force overwrite flag was received for job ({})", id);
            self.remove_job(id).await?;
        } else if let Some(existing) = self.inner.storage.get(id).await? {
            if !existing.status().is_failed() {
                debug!("Retrieving existing job ({}). Status: {}", existing, existing.status());
                return Ok(existing);
            }

            debug!("Removing existing job ({}) with status: {}", existing, existing.status());
            self.remove_job(id).await?;
        }

        debug!("Creating new job ({})", id);
        self.create_job(id.to_string(), Arc::new(executable), token).await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Arc<Job>>, PulseError> {
        Ok(self.inner.storage.get(id).await?)
    }

    pub fn enumerate_jobs(&self) -> JobStream<'_> {
        self.inner.storage.enumerate()
    }

    /// Remove a job and cancel its worker if it is running.
    ///
    /// Does not wait for the body to observe the cancellation.
    pub async fn remove_job(&self, id: &str) -> Result<Option<Arc<Job>>, PulseError> {
        let removed = self.inner.storage.remove(id).await?;
        if let Some((_, worker)) = self.inner.active.remove(id) {
            debug!("Cancelling worker of removed job ({})", id);
            worker.cancel();
        }
        Ok(removed)
    }

    /// Number of jobs holding a registered worker.
    pub fn active_jobs(&self) -> usize {
        self.inner.active.len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.inner.active.contains_key(id)
    }

    pub fn available_admission_slots(&self) -> usize {
        self.inner.queue.available_permits()
    }

    pub fn available_execution_slots(&self) -> usize {
        self.inner.parallelism.available_permits()
    }

    /// Stop admitting jobs, cancel every worker and wait until all detached
    /// executions have stored their outcome.
    pub async fn shutdown(&self) {
        info!("Coordinator shutting down ({} active jobs)", self.active_jobs());
        self.inner.queue.close();
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Coordinator stopped");
    }

    async fn create_job(
        &self,
        id: String,
        executable: Arc<dyn Executable>,
        token: &CancellationToken,
    ) -> Result<Arc<Job>, PulseError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(PulseError::ShuttingDown);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| PulseError::Spawn(e.to_string()))?;

        let job = Arc::new(Job::new(id, inner.config.job_expire_time()));
        if !inner.storage.try_add(&job).await? {
            return Err(PulseError::DuplicateJob(job.id().to_string()));
        }
        debug!("Successfully added job ({}) to the {} storage", job, inner.storage.name());

        let admission = match self.admit(&job, token).await {
            Ok(permit) => permit,
            Err(err) => {
                self.reject(&job, &err).await;
                return Err(err);
            }
        };

        // Register before spawning so a `remove_job` issued as soon as this
        // returns always finds the worker.
        let worker = Arc::new(Worker::with_parent(
            executable,
            inner.config.job_max_run_time(),
            &inner.shutdown,
        ));
        if let Some(previous) = inner.active.insert(job.id().to_string(), worker.clone()) {
            previous.cancel();
        }
        inner.tracker.spawn_on(
            inner.clone().execute(job.clone(), worker, admission, token.clone()),
            &runtime,
        );

        Ok(job)
    }

    /// Wait for a queue-depth permit, bounded by the enqueue timeout and the
    /// caller token.
    async fn admit(
        &self,
        job: &Job,
        token: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, PulseError> {
        let timeout = self.inner.config.enqueue_timeout();
        tokio::select! {
            permit = self.inner.queue.clone().acquire_owned() => {
                permit.map_err(|_| PulseError::ShuttingDown)
            }
            _ = token.cancelled() => Err(PulseError::Cancelled(job.id().to_string())),
            _ = tokio::time::sleep(timeout) => Err(PulseError::EnqueueTimeout {
                id: job.id().to_string(),
                timeout,
            }),
        }
    }

    /// Move a job that was never admitted out of `Pending`.
    async fn reject(&self, job: &Arc<Job>, err: &PulseError) {
        let status = match err {
            PulseError::Cancelled(_) => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        };
        warn!("Job ({}) was not admitted: {}", job, err);
        if let Err(e) = job
            .set_status(self.inner.storage.as_ref(), status, Some(err.to_string()))
            .await
        {
            warn!("Failed to record admission failure of job ({}): {}", job, e);
        }
    }
}

impl Inner {
    /// Detached execution path. Every outcome ends up in job state.
    async fn execute(
        self: Arc<Self>,
        job: Arc<Job>,
        worker: Arc<Worker>,
        admission: OwnedSemaphorePermit,
        caller: CancellationToken,
    ) {
        if job.status() != JobStatus::Pending {
            error!(
                "Job ({}) wasn't in status \"{}\" before execution. Aborting...",
                job,
                JobStatus::Pending
            );
            self.unregister(&job, &worker);
            return;
        }

        let permit = tokio::select! {
            permit = self.parallelism.clone().acquire_owned() => permit.ok(),
            _ = worker.cancelled() => None,
            _ = caller.cancelled() => None,
        };
        let Some(permit) = permit else {
            let source = if caller.is_cancelled() {
                CancelSource::Caller
            } else {
                CancelSource::Explicit
            };
            self.record_outcome(&job, &worker, WorkerOutcome::Cancelled(source)).await;
            self.unregister(&job, &worker);
            return;
        };
        // Execution starts: free the admission slot for the next caller.
        drop(admission);

        debug!("Initiating execution of a job ({})", job);
        match job
            .set_status(self.storage.as_ref(), JobStatus::InProgress, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("Job ({}) was removed before it started", job);
                self.record_outcome(&job, &worker, WorkerOutcome::Cancelled(CancelSource::Explicit))
                    .await;
                self.unregister(&job, &worker);
                return;
            }
            Err(err @ PulseError::InvalidTransition { .. }) => {
                error!("{}. Aborting...", err);
                self.unregister(&job, &worker);
                return;
            }
            Err(err) => warn!("Failed to persist start of job ({}): {}", job, err),
        }

        let outcome = worker.execute(&job, self.storage.clone(), &caller).await;
        self.record_outcome(&job, &worker, outcome).await;
        self.unregister(&job, &worker);
        drop(permit);

        debug!("Job ({}) finished execution. Status: {}.", job, job.status());
    }

    async fn record_outcome(&self, job: &Arc<Job>, worker: &Arc<Worker>, outcome: WorkerOutcome) {
        let (status, message) = match outcome {
            WorkerOutcome::Completed => {
                info!("Job ({}) was executed successfully", job);
                (JobStatus::Success, None)
            }
            WorkerOutcome::Cancelled(source) => {
                let message = format!("Job's ({}) execution was cancelled: {}.", job, source);
                warn!("{}", message);
                (JobStatus::Cancelled, Some(message))
            }
            WorkerOutcome::Failed(err) => {
                let reason = err.to_string();
                let reason = reason.trim_end_matches(['.', '!', '?']).trim_end();
                error!("Error occurred when executing a job ({}): {:#}", job, err);
                (
                    JobStatus::Failed,
                    Some(format!(
                        "Error occurred when executing a job ({}): {}. See logs for more details.",
                        job, reason
                    )),
                )
            }
        };

        // A removed job may already have a successor under the same id; its
        // outcome must not be written over the successor's record.
        if !self.is_registered(job, worker) {
            if let Err(err) = job.transition(status, message) {
                warn!("Failed to record outcome of removed job ({}): {}", job, err);
            }
            return;
        }

        match job.set_status(self.storage.as_ref(), status, message).await {
            Ok(true) => {}
            Ok(false) => debug!("Job ({}) was removed before its outcome could be stored", job),
            Err(err) => warn!("Failed to record outcome of job ({}): {}", job, err),
        }
    }

    fn is_registered(&self, job: &Job, worker: &Arc<Worker>) -> bool {
        self.active
            .get(job.id())
            .is_some_and(|registered| Arc::ptr_eq(registered.value(), worker))
    }

    fn unregister(&self, job: &Job, worker: &Arc<Worker>) {
        self.active
            .remove_if(job.id(), |_, registered| Arc::ptr_eq(registered, worker));
    }
}

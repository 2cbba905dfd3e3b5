//! Job bodies and the context they run with.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::job::Job;
use crate::storage::JobStorage;

/// The work a job performs.
///
/// Implemented for any `Fn(JobContext) -> impl Future<Output = anyhow::Result<()>>`.
#[async_trait]
pub trait Executable: Send + Sync + 'static {
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> Executable for F
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn execute(&self, ctx: JobContext) -> anyhow::Result<()> {
        (self)(ctx).await
    }
}

/// Handed to a job body for one execution attempt.
#[derive(Clone)]
pub struct JobContext {
    job: Arc<Job>,
    storage: Arc<dyn JobStorage>,
    token: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(job: Arc<Job>, storage: Arc<dyn JobStorage>, token: CancellationToken) -> Self {
        Self { job, storage, token }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn id(&self) -> &str {
        self.job.id()
    }

    /// Fires on explicit cancel, caller cancel or run-time expiry.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn result(&self) -> Option<Value> {
        self.job.result()
    }

    /// Store `value` as the job result and persist it.
    pub async fn set_result<T: Serialize>(&self, value: T) -> Result<bool, StorageError> {
        let value = serde_json::to_value(value)?;
        self.job.set_result(self.storage.as_ref(), value).await
    }
}

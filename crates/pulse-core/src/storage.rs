//! Job storage contract.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StorageError;
use crate::job::Job;

/// Lazy sequence of stored jobs.
pub type JobStream<'a> = BoxStream<'a, Result<Arc<Job>, StorageError>>;

/// CRUD and enumeration over persisted jobs.
///
/// Implementations own their synchronization. Callers must not assume
/// atomicity across two separate calls.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Look up a job. A hit refreshes (and persists) its last access time.
    async fn get(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError>;

    /// Remove a job, returning what was stored.
    async fn remove(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError>;

    /// Insert a new job. `false` if the id is already taken.
    async fn try_add(&self, job: &Arc<Job>) -> Result<bool, StorageError>;

    /// Overwrite an existing job. `false` if the id is not stored.
    async fn try_update(&self, job: &Arc<Job>) -> Result<bool, StorageError>;

    /// Stream every stored job without touching it.
    ///
    /// Each call starts a fresh pass; concurrent mutation of the store is
    /// allowed while iterating.
    fn enumerate(&self) -> JobStream<'_>;
}

//! In-memory job storage.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream;
use tracing::trace;

use crate::error::StorageError;
use crate::job::Job;
use crate::storage::{JobStorage, JobStream};

/// Job storage backed by a concurrent map.
///
/// Stored entries are the live shared entities, so `get` hands out the same
/// `Arc<Job>` the scheduler mutates. Updates use an optimistic
/// compare-and-swap on the stored handle.
#[derive(Default)]
pub struct InMemoryStorage {
    jobs: DashMap<String, Arc<Job>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn current(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Replace the slot only if it still holds `expected`.
    ///
    /// `None` when the id disappeared, `Some(false)` when another writer got
    /// there first.
    fn compare_and_swap(&self, expected: &Arc<Job>, new: &Arc<Job>) -> Option<bool> {
        match self.jobs.entry(new.id().to_string()) {
            Entry::Occupied(mut slot) => {
                if Arc::ptr_eq(slot.get(), expected) {
                    slot.insert(new.clone());
                    Some(true)
                } else {
                    Some(false)
                }
            }
            Entry::Vacant(_) => None,
        }
    }
}

#[async_trait]
impl JobStorage for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError> {
        let Some(job) = self.current(id) else {
            return Ok(None);
        };
        job.touch(self).await?;
        Ok(Some(job))
    }

    async fn remove(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError> {
        Ok(self.jobs.remove(id).map(|(_, job)| job))
    }

    async fn try_add(&self, job: &Arc<Job>) -> Result<bool, StorageError> {
        match self.jobs.entry(job.id().to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(true)
            }
        }
    }

    async fn try_update(&self, job: &Arc<Job>) -> Result<bool, StorageError> {
        loop {
            let Some(current) = self.current(job.id()) else {
                return Ok(false);
            };
            match self.compare_and_swap(&current, job) {
                Some(true) => return Ok(true),
                None => return Ok(false),
                Some(false) => {
                    trace!("Concurrent update of job ({}), retrying", job);
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    fn enumerate(&self) -> JobStream<'_> {
        let jobs: Vec<Arc<Job>> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        Box::pin(stream::iter(jobs.into_iter().map(Ok)))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

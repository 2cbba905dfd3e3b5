//! Job storage over a [`KvClient`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use pulse_core::{Job, JobSnapshot, JobStorage, JobStream, StorageError};
use tracing::{debug, trace};

use crate::client::{KvClient, KvOp, Precondition, Transaction, TxOutcome};

/// Sorted set of job ids. Scores are milliseconds since the epoch.
pub const JOBS_INDEX_KEY: &str = "jobs:all";

/// Document key of a job.
pub fn job_key(id: &str) -> String {
    format!("job:{id}")
}

/// Job storage on a shared key-value store.
///
/// Adds score the index entry with the creation time, updates with the last
/// access time, so enumeration yields recently idle jobs last.
pub struct KvStorage<C> {
    client: C,
}

impl<C: KvClient> KvStorage<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Write the document and its index entry if `condition` holds.
    async fn write(&self, job: &Job, condition: Precondition, score: i64) -> Result<bool, StorageError> {
        let key = condition.key().to_string();
        let value = serde_json::to_string(&job.snapshot())?;
        let tx = Transaction::new()
            .require(condition)
            .op(KvOp::JsonSet { key, value })
            .op(KvOp::IndexAdd {
                index: JOBS_INDEX_KEY.to_string(),
                member: job.id().to_string(),
                score: score as f64,
            });

        Ok(matches!(self.client.exec(tx).await?, TxOutcome::Committed(_)))
    }
}

fn decode(key: &str, doc: &str) -> Result<Job, StorageError> {
    let snapshot: JobSnapshot =
        serde_json::from_str(doc).map_err(|e| StorageError::corrupted(key, e))?;
    Ok(Job::from_snapshot(snapshot))
}

#[async_trait]
impl<C: KvClient + 'static> JobStorage for KvStorage<C> {
    fn name(&self) -> &'static str {
        "key-value"
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError> {
        let key = job_key(id);
        let Some(doc) = self.client.json_get(&key).await? else {
            return Ok(None);
        };
        let job = decode(&key, &doc)?;

        // Only the access time and the index score are written, so a status
        // change committed since the read is kept.
        let accessed = job.mark_accessed();
        let tx = Transaction::new()
            .require(Precondition::Exists(key.clone()))
            .op(KvOp::JsonSetField {
                key,
                field: "lastAccessTime".to_string(),
                value: serde_json::to_string(&accessed)?,
            })
            .op(KvOp::IndexAdd {
                index: JOBS_INDEX_KEY.to_string(),
                member: id.to_string(),
                score: accessed.timestamp_millis() as f64,
            });

        match self.client.exec(tx).await? {
            TxOutcome::Committed(_) => Ok(Some(Arc::new(job))),
            TxOutcome::Aborted => {
                trace!("Job {} was removed while being read", id);
                Ok(None)
            }
        }
    }

    async fn remove(&self, id: &str) -> Result<Option<Arc<Job>>, StorageError> {
        let key = job_key(id);
        let tx = Transaction::new()
            .op(KvOp::JsonGet { key: key.clone() })
            .op(KvOp::Delete { key: key.clone() })
            .op(KvOp::IndexRemove {
                index: JOBS_INDEX_KEY.to_string(),
                member: id.to_string(),
            });

        match self.client.exec(tx).await? {
            TxOutcome::Committed(replies) => match replies.into_iter().next().flatten() {
                Some(doc) => {
                    debug!("Removed job document {}", key);
                    Ok(Some(Arc::new(decode(&key, &doc)?)))
                }
                None => Ok(None),
            },
            TxOutcome::Aborted => Ok(None),
        }
    }

    async fn try_add(&self, job: &Arc<Job>) -> Result<bool, StorageError> {
        let condition = Precondition::NotExists(job_key(job.id()));
        self.write(job, condition, job.created_time().timestamp_millis())
            .await
    }

    async fn try_update(&self, job: &Arc<Job>) -> Result<bool, StorageError> {
        let condition = Precondition::Exists(job_key(job.id()));
        self.write(job, condition, job.last_access_time().timestamp_millis())
            .await
    }

    fn enumerate(&self) -> JobStream<'_> {
        let ids = stream::once(self.client.index_range_by_score(JOBS_INDEX_KEY))
            .map_ok(|ids| stream::iter(ids.into_iter().map(Ok::<_, StorageError>)))
            .try_flatten();

        ids.try_filter_map(move |id| async move {
            let key = job_key(&id);
            match self.client.json_get(&key).await? {
                Some(doc) => Ok(Some(Arc::new(decode(&key, &doc)?))),
                None => {
                    trace!("Indexed job {} has no document, skipping", id);
                    Ok(None)
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;

//! Job entity and status state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PulseError, StorageError};
use crate::storage::JobStorage;

/// Job execution status.
///
/// `Pending -> InProgress -> {Success | Cancelled | Failed}`. A pending job
/// may also end directly in `Cancelled` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for admission or for an execution slot.
    Pending,
    /// Body is running.
    InProgress,
    /// Body returned normally.
    Success,
    /// Execution was cancelled.
    Cancelled,
    /// Body failed, or the job was orphaned.
    Failed,
}

impl JobStatus {
    /// No transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Cancelled | JobStatus::Failed)
    }

    /// Failed and cancelled jobs are replaced on resubmission.
    pub fn is_failed(self) -> bool {
        matches!(self, JobStatus::Cancelled | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::InProgress) => true,
            (JobStatus::Pending, JobStatus::Cancelled | JobStatus::Failed) => true,
            (JobStatus::InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "Pending",
            JobStatus::InProgress => "InProgress",
            JobStatus::Success => "Success",
            JobStatus::Cancelled => "Cancelled",
            JobStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Serializable point-in-time copy of a [`Job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub created_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub expire_after: Duration,
    #[serde(default, with = "option_duration_ms")]
    pub execution_time: Option<Duration>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug)]
struct StatusCell {
    status: JobStatus,
    error: Option<String>,
}

/// Lifecycle record of one unit of work.
///
/// Shared as `Arc<Job>`. Status (with error), result and last access time
/// each sit behind their own lock; every mutator persists the whole entity
/// through the storage handle it is given.
#[derive(Debug)]
pub struct Job {
    id: String,
    created_time: DateTime<Utc>,
    expire_after: Duration,
    state: Mutex<StatusCell>,
    result: Mutex<Option<Value>>,
    last_access: Mutex<DateTime<Utc>>,
    execution_time: Mutex<Option<Duration>>,
}

impl Job {
    /// Create a pending job.
    pub fn new(id: impl Into<String>, expire_after: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_time: now,
            expire_after,
            state: Mutex::new(StatusCell {
                status: JobStatus::Pending,
                error: None,
            }),
            result: Mutex::new(None),
            last_access: Mutex::new(now),
            execution_time: Mutex::new(None),
        }
    }

    /// Rebuild a job from persisted data.
    pub fn from_snapshot(snapshot: JobSnapshot) -> Self {
        Self {
            id: snapshot.id,
            created_time: snapshot.created_time,
            expire_after: snapshot.expire_after,
            state: Mutex::new(StatusCell {
                status: snapshot.status,
                error: snapshot.error,
            }),
            result: Mutex::new(snapshot.result),
            last_access: Mutex::new(snapshot.last_access_time),
            execution_time: Mutex::new(snapshot.execution_time),
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let (status, error) = {
            let state = self.state.lock();
            (state.status, state.error.clone())
        };
        JobSnapshot {
            id: self.id.clone(),
            status,
            created_time: self.created_time,
            last_access_time: *self.last_access.lock(),
            expire_after: self.expire_after,
            execution_time: *self.execution_time.lock(),
            error,
            result: self.result.lock().clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// First eight characters of the id, used in log lines.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn result(&self) -> Option<Value> {
        self.result.lock().clone()
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn last_access_time(&self) -> DateTime<Utc> {
        *self.last_access.lock()
    }

    pub fn expire_after(&self) -> Duration {
        self.expire_after
    }

    pub fn execution_time(&self) -> Option<Duration> {
        *self.execution_time.lock()
    }

    /// Record how long the body ran. Persisted with the next mutation.
    pub fn set_execution_time(&self, elapsed: Duration) {
        *self.execution_time.lock() = Some(elapsed);
    }

    /// `now - last_access_time >= expire_after`.
    pub fn is_expired(&self) -> bool {
        let idle = (Utc::now() - self.last_access_time())
            .to_std()
            .unwrap_or_default();
        idle >= self.expire_after
    }

    /// Move to `status`, refresh the last access time, then persist.
    ///
    /// The error message is kept only for `Cancelled` and `Failed`. Returns
    /// whether storage accepted the update; a rejected or failed persist
    /// does not roll back the in-memory change.
    pub async fn set_status(
        self: &Arc<Self>,
        storage: &dyn JobStorage,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<bool, PulseError> {
        self.transition(status, error)?;
        Ok(storage.try_update(self).await?)
    }

    /// Change status without persisting. Used for jobs no longer in storage.
    pub(crate) fn transition(&self, status: JobStatus, error: Option<String>) -> Result<(), PulseError> {
        let mut state = self.state.lock();
        if !state.status.can_transition_to(status) {
            return Err(PulseError::InvalidTransition {
                id: self.id.clone(),
                from: state.status,
                to: status,
            });
        }
        state.status = status;
        state.error = if status.is_failed() { error } else { None };
        drop(state);
        self.mark_accessed();
        Ok(())
    }

    /// Replace the result, refresh the last access time, then persist.
    pub async fn set_result(
        self: &Arc<Self>,
        storage: &dyn JobStorage,
        result: Value,
    ) -> Result<bool, StorageError> {
        *self.result.lock() = Some(result);
        self.mark_accessed();
        storage.try_update(self).await
    }

    /// Refresh the last access time, then persist.
    pub async fn touch(self: &Arc<Self>, storage: &dyn JobStorage) -> Result<bool, StorageError> {
        self.mark_accessed();
        storage.try_update(self).await
    }

    /// Refresh the last access time in memory only.
    ///
    /// For backends that persist the access time themselves, under their
    /// own locking, instead of writing the whole entity back.
    pub fn mark_accessed(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let mut last_access = self.last_access.lock();
        if now > *last_access {
            *last_access = now;
        }
        *last_access
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_id())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;

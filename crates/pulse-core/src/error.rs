//! Scheduler and storage errors.

use std::time::Duration;

use thiserror::Error;

use crate::job::JobStatus;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying file or socket I/O failed.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A job could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted data for a key is malformed.
    #[error("Corrupted job data at '{key}': {reason}")]
    Corrupted { key: String, reason: String },

    /// Backend-specific failure (connection, protocol, ...).
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn corrupted(key: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::Corrupted {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors surfaced to callers of the [`Coordinator`](crate::Coordinator).
#[derive(Debug, Error)]
pub enum PulseError {
    /// No admission slot became free within the enqueue timeout.
    #[error("Job ({id}) could not be admitted within {timeout:?}: job queue is saturated")]
    EnqueueTimeout { id: String, timeout: Duration },

    /// The caller cancelled while waiting for admission.
    #[error("Scheduling of job ({0}) was cancelled by the caller")]
    Cancelled(String),

    /// A job with this id already exists in storage.
    #[error("Could not add job ({0}) to the storage: id already exists")]
    DuplicateJob(String),

    /// Caller-supplied job id is not acceptable.
    #[error("Invalid job id '{id}': {reason}")]
    InvalidJobId { id: String, reason: String },

    /// Status change not permitted by the job state machine.
    #[error("Job ({id}) cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// The coordinator no longer accepts jobs.
    #[error("Coordinator is shutting down")]
    ShuttingDown,

    /// The detached execution task could not be started.
    #[error("Failed to spawn execution task: {0}")]
    Spawn(String),

    /// Scheduler configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] pulse_config::ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

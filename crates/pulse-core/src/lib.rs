//! # Pulse Core
//!
//! In-process asynchronous job scheduling engine.
//!
//! ## Features
//!
//! - Bounded admission queue and bounded execution parallelism
//! - Per-job run-time limit and explicit cancellation
//! - Self-persisting job entities behind a pluggable storage contract
//! - Boot recovery of orphaned jobs and expiry cleanup sweeps

pub mod coordinator;
pub mod error;
pub mod executable;
pub mod job;
pub mod maintenance;
pub mod memory;
pub mod storage;
pub mod worker;

pub use coordinator::{Coordinator, validate_job_id};
pub use error::{PulseError, StorageError};
pub use executable::{Executable, JobContext};
pub use job::{Job, JobSnapshot, JobStatus};
pub use maintenance::{CleanupReport, RecoveryReport, StorageMaintainer};
pub use memory::InMemoryStorage;
pub use pulse_config::PulseConfig;
pub use storage::{JobStorage, JobStream};
pub use worker::{CancelSource, Worker, WorkerOutcome};

//! Configuration schema definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: PulseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration: backpressure bounds and job timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Maximum number of jobs executing at the same time.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,

    /// Maximum number of admitted jobs still waiting to start execution.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Idle time (since last access) after which a job may be cleaned up.
    #[serde(default = "default_job_expire_time_ms")]
    pub job_expire_time_ms: u64,

    /// Maximum run time of a single job execution.
    #[serde(default = "default_job_max_run_time_ms")]
    pub job_max_run_time_ms: u64,

    /// Maximum time `schedule` waits for an admission slot.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Interval between storage maintenance sweeps.
    #[serde(default = "default_storage_maintain_interval_ms")]
    pub storage_maintain_interval_ms: u64,
}

fn default_max_parallelism() -> usize {
    8
}

fn default_max_queue_size() -> usize {
    100
}

fn default_job_expire_time_ms() -> u64 {
    30 * 60 * 1000
}

fn default_job_max_run_time_ms() -> u64 {
    5 * 60 * 1000
}

fn default_enqueue_timeout_ms() -> u64 {
    15 * 1000
}

fn default_storage_maintain_interval_ms() -> u64 {
    60 * 1000
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            max_queue_size: default_max_queue_size(),
            job_expire_time_ms: default_job_expire_time_ms(),
            job_max_run_time_ms: default_job_max_run_time_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            storage_maintain_interval_ms: default_storage_maintain_interval_ms(),
        }
    }
}

impl PulseConfig {
    pub fn job_expire_time(&self) -> Duration {
        Duration::from_millis(self.job_expire_time_ms)
    }

    pub fn job_max_run_time(&self) -> Duration {
        Duration::from_millis(self.job_max_run_time_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn storage_maintain_interval(&self) -> Duration {
        Duration::from_millis(self.storage_maintain_interval_ms)
    }
}

/// Which storage backend persists jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Filesystem,
    Redis,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Filesystem => write!(f, "filesystem"),
            StorageBackend::Redis => write!(f, "redis"),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory holding job files (filesystem backend).
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Connection URL (redis backend).
    #[serde(default)]
    pub redis_url: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily-rotated log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;

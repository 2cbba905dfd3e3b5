//! Shared helpers for coordinator integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{
    Coordinator, Executable, InMemoryStorage, Job, JobContext, JobStatus, JobStorage, PulseConfig,
};
use tokio_util::sync::CancellationToken;

pub fn config(max_parallelism: usize, max_queue_size: usize) -> PulseConfig {
    PulseConfig {
        max_parallelism,
        max_queue_size,
        enqueue_timeout_ms: 2_000,
        job_max_run_time_ms: 10_000,
        ..PulseConfig::default()
    }
}

pub fn coordinator(config: PulseConfig) -> (Coordinator, Arc<InMemoryStorage>) {
    coordinator_over(Arc::new(InMemoryStorage::new()), config)
}

/// Coordinator over any backend, returning the typed storage handle too.
pub fn coordinator_over<S: JobStorage + 'static>(
    storage: Arc<S>,
    config: PulseConfig,
) -> (Coordinator, Arc<S>) {
    let coordinator = Coordinator::new(storage.clone(), config).expect("valid config");
    (coordinator, storage)
}

/// Body that blocks until `gate` is cancelled.
pub fn gated(gate: &CancellationToken) -> impl Executable {
    let gate = gate.clone();
    move |_ctx: JobContext| {
        let gate = gate.clone();
        async move {
            gate.cancelled().await;
            anyhow::Ok(())
        }
    }
}

/// Body that runs until its own token fires.
pub fn until_cancelled() -> impl Executable {
    |ctx: JobContext| async move {
        ctx.token().cancelled().await;
        anyhow::bail!("stopped")
    }
}

pub async fn wait_for_status(job: &Job, status: JobStatus) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while job.status() != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        reached.is_ok(),
        "job {} stuck in {} waiting for {}",
        job.id(),
        job.status(),
        status
    );
}

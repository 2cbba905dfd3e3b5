//! Demo runner: counter jobs on a live coordinator.

use std::sync::Arc;
use std::time::Duration;

use pulse_config::Config;
use pulse_core::{Coordinator, Executable, Job, JobContext, StorageMaintainer};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::storage::open_storage;

/// Schedule `jobs` counter jobs, then wait for them or Ctrl-C.
pub(crate) async fn run_demo(
    config: Config,
    jobs: usize,
    steps: u64,
    step_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Pulse v{}", env!("CARGO_PKG_VERSION"));

    let storage = open_storage(&config.storage).await?;
    let coordinator = Coordinator::new(storage, config.scheduler.clone())?;

    let shutdown = CancellationToken::new();
    let maintainer = StorageMaintainer::new(coordinator.clone()).spawn(shutdown.clone());

    let mut scheduled = Vec::with_capacity(jobs);
    for n in 1..=jobs {
        let job = coordinator
            .schedule(counter_job(n, steps, Duration::from_millis(step_ms)), &shutdown)
            .await?;
        info!("Scheduled job #{} ({})", n, job);
        scheduled.push(job);
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Received Ctrl-C, shutting down");
        }
        _ = wait_all_finished(&scheduled) => info!("All demo jobs finished"),
    }

    shutdown.cancel();
    coordinator.shutdown().await;
    maintainer.await?;

    print_summary(&scheduled);
    Ok(())
}

/// Body that bumps its numeric result once per step.
fn counter_job(n: usize, steps: u64, step: Duration) -> impl Executable {
    move |ctx: JobContext| async move {
        info!(
            "Job #{} started ({}). Created time: {}",
            n,
            ctx.job(),
            ctx.job().created_time()
        );
        for _ in 0..steps {
            let next = ctx
                .result()
                .and_then(|value| value.as_u64())
                .map_or(0, |count| count + 1);
            ctx.set_result(next).await?;
            info!("Job #{}. Executing job ({}). Current result: {}", n, ctx.job(), next);

            tokio::select! {
                _ = ctx.token().cancelled() => anyhow::bail!("job #{n} was interrupted at {next}"),
                _ = tokio::time::sleep(step) => {}
            }
        }
        anyhow::Ok(())
    }
}

async fn wait_all_finished(jobs: &[Arc<Job>]) {
    while !jobs.iter().all(|job| job.status().is_terminal()) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

fn print_summary(jobs: &[Arc<Job>]) {
    println!("{:<34} {:<12} {:<8} {}", "ID", "STATUS", "RESULT", "ERROR");
    println!("{}", "-".repeat(80));
    for job in jobs {
        let result = job
            .result()
            .map(|value| value.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<34} {:<12} {:<8} {}",
            job.id(),
            job.status(),
            result,
            job.error().unwrap_or_default()
        );
    }
}

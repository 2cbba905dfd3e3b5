//! `jobs` and `maintain` subcommands.

use futures::TryStreamExt;
use pulse_config::Config;
use pulse_core::{Coordinator, JobSnapshot, validate_job_id};

use crate::cli::JobsAction;
use crate::storage::open_storage;

pub(crate) async fn handle_jobs_command(
    config: &Config,
    action: JobsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        JobsAction::List { format } => jobs_list(config, &format).await,
        JobsAction::Get { id } => {
            validate_job_id(&id)?;
            jobs_get(config, &id).await
        }
        JobsAction::Remove { id } => {
            validate_job_id(&id)?;
            jobs_remove(config, &id).await
        }
    }
}

async fn jobs_list(config: &Config, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&config.storage).await?;
    let jobs: Vec<JobSnapshot> = storage
        .enumerate()
        .map_ok(|job| job.snapshot())
        .try_collect()
        .await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&jobs)?;
            println!("{}", json);
        }
        _ => {
            println!(
                "{:<34} {:<12} {:<25} {:<10} {}",
                "ID", "STATUS", "LAST ACCESS", "RUN TIME", "ERROR"
            );
            println!("{}", "-".repeat(100));
            for job in &jobs {
                let run_time = job
                    .execution_time
                    .map(|d| format!("{}ms", d.as_millis()))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<34} {:<12} {:<25} {:<10} {}",
                    job.id,
                    job.status,
                    job.last_access_time.format("%Y-%m-%d %H:%M:%S"),
                    run_time,
                    job.error.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}

async fn jobs_get(config: &Config, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&config.storage).await?;
    let Some(job) = storage.get(id).await? else {
        return Err(format!("Job not found: {}", id).into());
    };
    println!("{}", serde_json::to_string_pretty(&job.snapshot())?);
    Ok(())
}

async fn jobs_remove(config: &Config, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&config.storage).await?;
    match storage.remove(id).await? {
        Some(job) => println!("Removed job {} ({})", job.id(), job.status()),
        None => println!("Job not found: {}", id),
    }
    Ok(())
}

/// One recovery sweep followed by one cleanup sweep.
pub(crate) async fn maintain(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(&config.storage).await?;
    let coordinator = Coordinator::new(storage, config.scheduler.clone())?;

    let recovery = coordinator.resolve_unfinished().await?;
    println!(
        "Recovery: {} jobs, {} unfinished marked failed, {} unreadable",
        recovery.total, recovery.unfinished, recovery.unreadable
    );

    let cleanup = coordinator.cleanup_expired().await?;
    println!(
        "Cleanup: {} jobs, {} expired removed, {} failed, {} unreadable",
        cleanup.total, cleanup.removed, cleanup.failed, cleanup.unreadable
    );
    Ok(())
}

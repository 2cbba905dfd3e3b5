//! Pulse - in-process asynchronous job scheduler.
//!
//! Command line entry point: a demo runner over the scheduler and a small
//! reader for persisted jobs.

mod cli;
mod cmd_jobs;
mod cmd_run;
mod storage;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::warn;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pulse_config::{Config, ConfigLoader, LoggingConfig};

use cli::{Cli, Commands};

/// Get the ~/.pulse directory path.
fn pulse_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".pulse"))
        .unwrap_or_else(|| PathBuf::from(".pulse"))
}

/// Load `path`, falling back to `~/.pulse/pulse.toml`, then to defaults.
fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if path.exists() {
        path.to_path_buf()
    } else {
        pulse_dir().join("pulse.toml")
    };
    Ok(ConfigLoader::load_or_default(&path)?)
}

/// Initialize tracing with console and optional file output.
///
/// `RUST_LOG` overrides the configured level. When `logging.dir` is set, log
/// files rotate daily there.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let console = if logging.json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    let file = match &logging.dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("pulse")
                .filename_suffix("log")
                .max_log_files(30)
                .build(log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Dropping the guard stops the writer thread.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config.logging)?;

    for warning in config.validate()? {
        warn!("Config {}: {}", warning.path, warning.message);
    }

    match cli.command {
        None => cmd_run::run_demo(config, 5, 25, 1000).await,
        Some(Commands::Run {
            jobs,
            steps,
            step_ms,
        }) => cmd_run::run_demo(config, jobs, steps, step_ms).await,
        Some(Commands::Jobs { action }) => cmd_jobs::handle_jobs_command(&config, action).await,
        Some(Commands::Maintain) => cmd_jobs::maintain(&config).await,
    }
}

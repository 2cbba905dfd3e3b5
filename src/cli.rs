//! CLI definitions for Pulse.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Pulse CLI.
#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "In-process asynchronous job scheduler")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/pulse.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Schedule demo counter jobs and run until they finish or Ctrl-C (default)
    Run {
        /// Number of demo jobs
        #[arg(long, default_value_t = 5)]
        jobs: usize,

        /// Counter increments per job
        #[arg(long, default_value_t = 25)]
        steps: u64,

        /// Delay between increments, in milliseconds
        #[arg(long, default_value_t = 1000)]
        step_ms: u64,
    },

    /// Inspect or remove persisted jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Run boot recovery and expiry cleanup once
    Maintain,
}

#[derive(Subcommand)]
pub(crate) enum JobsAction {
    /// List stored jobs
    List {
        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show one job (refreshes its last access time)
    Get {
        /// Job ID
        id: String,
    },

    /// Remove a job
    Remove {
        /// Job ID
        id: String,
    },
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// convoy - Idempotent deployment pipeline runner
#[derive(Parser)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the pipeline, resuming from persisted state
  Deploy {
    /// Path to the deployment manifest
    #[arg(default_value = convoy_lib::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Re-execute this step even if up to date (repeatable)
    #[arg(long = "force-step", value_name = "NAME")]
    force_step: Vec<String>,

    /// Re-execute every step regardless of recorded state
    #[arg(long)]
    force_all: bool,

    /// Discard persisted state before running
    #[arg(long, conflicts_with = "dry_run")]
    reset_state: bool,

    /// Show per-step decisions without executing or persisting anything
    #[arg(long)]
    dry_run: bool,
  },

  /// Show persisted deployment state
  Status {
    /// Path to the deployment manifest
    #[arg(default_value = convoy_lib::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Emit machine-readable JSON
    #[arg(long)]
    json: bool,
  },

  /// Delete persisted deployment state
  Reset {
    /// Path to the deployment manifest
    #[arg(default_value = convoy_lib::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Deploy {
      config,
      force_step,
      force_all,
      reset_state,
      dry_run,
    } => cmd::cmd_deploy(&config, force_step, force_all, reset_state, dry_run),
    Commands::Status { config, json } => cmd::cmd_status(&config, json),
    Commands::Reset { config } => cmd::cmd_reset(&config),
  }
}

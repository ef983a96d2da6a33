//! Implementation of the `convoy deploy` command.
//!
//! Loads the manifest, builds the pipeline, and walks every step through the
//! decision engine. Already-satisfied steps are skipped, so rerunning after a
//! partial failure resumes where the previous run stopped.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use tracing::info;

use convoy_lib::config::Config;
use convoy_lib::pipeline::Pipeline;
use convoy_lib::runner::{RunOptions, StepOutcome};

use crate::output::{print_error, print_info, print_success, symbols};

pub fn cmd_deploy(
  config: &Path,
  force_step: Vec<String>,
  force_all: bool,
  reset_state: bool,
  dry_run: bool,
) -> Result<()> {
  let manifest = Config::load(config).context("Failed to load deployment manifest")?;
  let pipeline = Pipeline::from_config(manifest).context("Failed to build pipeline")?;
  info!(config = %config.display(), target = %pipeline.target(), "pipeline loaded");

  if reset_state {
    pipeline.reset().context("Failed to reset state")?;
    print_info(&format!("State cleared: {}", pipeline.target()));
  }

  let options = RunOptions {
    force_all,
    force: force_step.into_iter().collect(),
    dry_run,
  };

  let summary = match pipeline.run(&options) {
    Ok(summary) => summary,
    Err(e) => {
      // The failing step's record has already been persisted; a rerun
      // resumes from here.
      print_error(&format!("{e}"));
      std::process::exit(1);
    }
  };

  for report in &summary.reports {
    match report.outcome {
      StepOutcome::Skipped => println!(
        "  {} {} {}",
        symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        report.step,
        "(up to date)".if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
      StepOutcome::Completed(reason) => println!(
        "  {} {} {}",
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
        report.step,
        format!("({reason})").if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
      StepOutcome::WouldExecute(reason) => println!(
        "  {} {} {}",
        symbols::RUN.if_supports_color(Stream::Stdout, |s| s.yellow()),
        report.step,
        format!("(would execute: {reason})").if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
    }
  }

  println!();
  if dry_run {
    print_info(&format!(
      "Dry run: {} step(s) would execute, {} up to date",
      summary.pending(),
      summary.skipped()
    ));
  } else {
    print_success(&format!(
      "Deploy complete: {} executed, {} skipped",
      summary.executed(),
      summary.skipped()
    ));
  }

  Ok(())
}

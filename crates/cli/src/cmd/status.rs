//! Implementation of the `convoy status` command.
//!
//! Renders the persisted deployment state on its own, without fingerprinting
//! anything: per-step status, timestamp, truncated hash, and the stored error
//! message for failed steps.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use convoy_lib::config::Config;
use convoy_lib::state::{StepStatus, open_store};

use crate::output::{print_info, print_json, print_stat, print_success, symbols, truncate_hash};

pub fn cmd_status(config: &Path, json: bool) -> Result<()> {
  let manifest = Config::load(config).context("Failed to load deployment manifest")?;
  let store = open_store(&manifest.state).context("Failed to open state store")?;
  let state = store.load().context("Failed to load deployment state")?;

  if json {
    return print_json(&state);
  }

  if state.steps.is_empty() && state.legacy.is_empty() {
    print_info(&format!(
      "No deployment state at {}. Run 'convoy deploy' to create one.",
      store.target()
    ));
    return Ok(());
  }

  print_success(&format!("Deployment state: {}", store.target()));
  print_stat("Version", &state.version);
  if let Some(updated) = state.last_updated {
    print_stat("Last updated", &updated.to_rfc3339());
  }

  if !state.steps.is_empty() {
    println!();
    for (name, record) in &state.steps {
      let symbol = match record.status {
        StepStatus::Completed => format!(
          "{}",
          symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green())
        ),
        StepStatus::Failed => format!(
          "{}",
          symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red())
        ),
      };
      println!(
        "  {} {} {} {}",
        symbol,
        name,
        truncate_hash(&record.dependency_hash).if_supports_color(Stream::Stdout, |s| s.dimmed()),
        format!("({})", record.timestamp.to_rfc3339()).if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
      if let Some(error) = &record.error {
        println!(
          "      {}",
          error.if_supports_color(Stream::Stdout, |s| s.red())
        );
      }
    }
  }

  if !state.resources.is_empty() {
    println!();
    print_stat("Resources", &state.resources.len().to_string());
  }

  Ok(())
}

//! Implementation of the `convoy reset` command.

use std::path::Path;

use anyhow::{Context, Result};

use convoy_lib::config::Config;
use convoy_lib::state::open_store;

use crate::output::print_success;

/// Delete the persisted state so the next deploy starts from scratch.
/// External resources are untouched; only the records are cleared.
pub fn cmd_reset(config: &Path) -> Result<()> {
  let manifest = Config::load(config).context("Failed to load deployment manifest")?;
  let store = open_store(&manifest.state).context("Failed to open state store")?;
  store.reset().context("Failed to reset state")?;

  print_success(&format!("Deployment state cleared: {}", store.target()));
  Ok(())
}

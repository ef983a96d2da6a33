//! The storage seam for deployment state.
//!
//! [`StateStore`] abstracts *where* state lives; the engine only ever loads,
//! saves, and resets. Decoding is shared across backends so both apply the
//! same legacy-format migration.

use std::io;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::{STATE_TOKEN_ENV, StateBackend, StateConfig};
use crate::state::local::LocalStateStore;
use crate::state::remote::RemoteStateStore;
use crate::state::types::{DeploymentState, STATE_VERSION};

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to read state file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write state file {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("state is not valid JSON: {0}")]
  Decode(#[source] serde_json::Error),

  #[error("failed to encode state: {0}")]
  Encode(#[source] serde_json::Error),

  #[error("state request to {url} failed: {source}")]
  Http {
    url: String,
    #[source]
    source: Box<reqwest::Error>,
  },

  #[error("state endpoint {url} returned {status}")]
  RemoteStatus { url: String, status: u16 },

  #[error("state backend \"remote\" requires a url")]
  MissingRemoteUrl,
}

/// Where deployment state is persisted.
///
/// `load` on an empty target returns a fresh [`DeploymentState`], never an
/// error: a missing state file is the normal first-run condition.
pub trait StateStore {
  fn load(&self) -> Result<DeploymentState, StateError>;

  fn save(&self, state: &DeploymentState) -> Result<(), StateError>;

  /// Delete the persisted state entirely. Succeeds if none exists.
  fn reset(&self) -> Result<(), StateError>;

  /// Human-readable description of the storage target, for logs and output.
  fn target(&self) -> String;
}

/// Build the store selected by the manifest's `[state]` table.
pub fn open_store(config: &StateConfig) -> Result<Box<dyn StateStore>, StateError> {
  match config.backend {
    StateBackend::Local => Ok(Box::new(LocalStateStore::new(config.path.clone()))),
    StateBackend::Remote => {
      let url = config.url.clone().ok_or(StateError::MissingRemoteUrl)?;
      let token = std::env::var(STATE_TOKEN_ENV).ok();
      Ok(Box::new(RemoteStateStore::new(url, token)))
    }
  }
}

/// Decode raw state bytes, migrating older formats in place.
pub(crate) fn decode_state(bytes: &[u8]) -> Result<DeploymentState, StateError> {
  let mut value: Value = serde_json::from_slice(bytes).map_err(StateError::Decode)?;
  migrate_in_place(&mut value);
  serde_json::from_value(value).map_err(StateError::Decode)
}

pub(crate) fn encode_state(state: &DeploymentState) -> Result<Vec<u8>, StateError> {
  let mut bytes = serde_json::to_vec_pretty(state).map_err(StateError::Encode)?;
  bytes.push(b'\n');
  Ok(bytes)
}

/// Bring a pre-versioned state document up to the current shape.
///
/// Older deployments wrote flat documents without `version`, `steps`, or
/// `resources`. Migration only fills in what is missing; every key already
/// present, recognized or not, is left untouched so nothing an older tool
/// wrote is ever dropped.
fn migrate_in_place(value: &mut Value) {
  let Some(map) = value.as_object_mut() else {
    return;
  };

  let missing_any = !map.contains_key("version")
    || !map.contains_key("steps")
    || !map.contains_key("resources");
  if !missing_any {
    return;
  }

  warn!("migrating legacy state document to version {STATE_VERSION}");

  map
    .entry("version")
    .or_insert_with(|| Value::String(STATE_VERSION.to_string()));
  map
    .entry("steps")
    .or_insert_with(|| Value::Object(serde_json::Map::new()));
  map
    .entry("resources")
    .or_insert_with(|| Value::Object(serde_json::Map::new()));
  map.entry("last_updated").or_insert(Value::Null);
}

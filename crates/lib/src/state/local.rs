//! Local-file state backend.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use crate::state::store::{StateError, StateStore, decode_state, encode_state};
use crate::state::types::DeploymentState;

/// Persists state as a JSON file on the local filesystem.
///
/// Writes go to a sibling temp file first and are moved into place with a
/// rename, so a crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
  path: PathBuf,
}

impl LocalStateStore {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }

  pub fn path(&self) -> &PathBuf {
    &self.path
  }
}

impl StateStore for LocalStateStore {
  fn load(&self) -> Result<DeploymentState, StateError> {
    let bytes = match fs::read(&self.path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %self.path.display(), "no state file, starting fresh");
        return Ok(DeploymentState::new());
      }
      Err(e) => {
        return Err(StateError::Read {
          path: self.path.clone(),
          source: e,
        });
      }
    };

    decode_state(&bytes)
  }

  fn save(&self, state: &DeploymentState) -> Result<(), StateError> {
    let bytes = encode_state(state)?;

    let write_err = |source| StateError::Write {
      path: self.path.clone(),
      source,
    };

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp = self.path.with_extension("json.tmp");
    fs::write(&tmp, &bytes).map_err(write_err)?;
    fs::rename(&tmp, &self.path).map_err(write_err)?;

    debug!(path = %self.path.display(), "state saved");
    Ok(())
  }

  fn reset(&self) -> Result<(), StateError> {
    match fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StateError::Write {
        path: self.path.clone(),
        source: e,
      }),
    }
  }

  fn target(&self) -> String {
    self.path.display().to_string()
  }
}

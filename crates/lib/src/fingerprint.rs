//! Dependency fingerprinting.
//!
//! A step's fingerprint is a SHA-256 digest summarizing its declared inputs:
//! the full content of each dependency file and the canonical JSON form of
//! each referenced config value. Each input is hashed on its own, the
//! per-input digests are sorted, and the sorted list is hashed into the final
//! fingerprint. Sorting makes the result depend only on the *set* of inputs,
//! so reordering a dependency list never causes a spurious re-execution.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::lookup;

/// A full 64-character lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
  /// A declared dependency file does not exist.
  ///
  /// Deliberately a hard error rather than a sentinel substitution: hashing a
  /// placeholder for missing content would make every later comparison
  /// against the stored fingerprint unreliable.
  #[error("dependency file not found: {0}")]
  MissingFile(PathBuf),

  #[error("failed to read dependency file {path}: {source}")]
  ReadFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// A declared config key does not resolve in the settings snapshot.
  #[error("config key not found in settings: {0}")]
  MissingConfigKey(String),
}

/// Compute the fingerprint over a step's declared inputs.
///
/// `files` are read in full; a missing file fails the computation. Duplicate
/// paths are hashed once. `config_keys` are dotted paths resolved against
/// `settings`; each resolved value is serialized to canonical JSON before
/// hashing so structurally-equal values with incidental formatting
/// differences hash identically.
pub fn compute_fingerprint(
  files: &[PathBuf],
  config_keys: &[String],
  settings: &Value,
) -> Result<Fingerprint, FingerprintError> {
  let mut digests: Vec<String> = Vec::new();

  // Deduplicate paths so a file declared twice contributes once.
  let mut seen: BTreeSet<&Path> = BTreeSet::new();
  for path in files {
    if !seen.insert(path.as_path()) {
      continue;
    }
    digests.push(hash_file(path)?.0);
  }

  for key in config_keys {
    let value = lookup(settings, key).ok_or_else(|| FingerprintError::MissingConfigKey(key.clone()))?;
    digests.push(hash_bytes(canonical_json(value).as_bytes()).0);
  }

  digests.sort();

  let mut hasher = Sha256::new();
  for digest in &digests {
    hasher.update(digest.as_bytes());
    hasher.update(b"\n");
  }

  Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Hash a file's contents, streaming.
pub fn hash_file(path: &Path) -> Result<Fingerprint, FingerprintError> {
  let mut file = match fs::File::open(path) {
    Ok(file) => file,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      return Err(FingerprintError::MissingFile(path.to_path_buf()));
    }
    Err(e) => {
      return Err(FingerprintError::ReadFile {
        path: path.to_path_buf(),
        source: e,
      });
    }
  };

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| FingerprintError::ReadFile {
      path: path.to_path_buf(),
      source: e,
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(Fingerprint(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Fingerprint {
  let mut hasher = Sha256::new();
  hasher.update(data);
  Fingerprint(hex::encode(hasher.finalize()))
}

/// Serialize a JSON value canonically: object keys sorted, no whitespace.
fn canonical_json(value: &Value) -> String {
  match value {
    Value::Null => "null".to_string(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    // String serialization through serde_json never fails.
    Value::String(s) => serde_json::to_string(s).unwrap_or_default(),
    Value::Array(items) => {
      let items: Vec<String> = items.iter().map(canonical_json).collect();
      format!("[{}]", items.join(","))
    }
    Value::Object(map) => {
      let sorted: BTreeMap<&String, &Value> = map.iter().collect();
      let entries: Vec<String> = sorted
        .into_iter()
        .map(|(k, v)| {
          format!(
            "{}:{}",
            serde_json::to_string(k).unwrap_or_default(),
            canonical_json(v)
          )
        })
        .collect();
      format!("{{{}}}", entries.join(","))
    }
  }
}

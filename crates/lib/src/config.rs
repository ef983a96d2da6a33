//! Deployment configuration.
//!
//! A deployment is described by a TOML manifest (`convoy.toml` by default):
//!
//! ```toml
//! version = "1"
//!
//! [settings]
//! region = "eu-west-1"
//! service = { image = "app:1.4.2", replicas = 2 }
//!
//! [state]
//! backend = "local"
//! path = ".convoy/state.json"
//!
//! [[steps]]
//! name = "create-registry"
//! run = "scripts/create_registry.sh"
//! files = ["scripts/create_registry.sh"]
//! config = ["region"]
//! ```
//!
//! The `[settings]` table is an open bag of values addressable by dotted key
//! (`service.image`). Step `config` entries reference these keys; their
//! resolved values feed into the step's dependency fingerprint.
//!
//! The state backend is a configuration-time decision, overridable through
//! `CONVOY_STATE_BACKEND` (and the matching `CONVOY_STATE_PATH` /
//! `CONVOY_STATE_URL` variables) so CI can point every machine at a shared
//! remote target without editing the manifest.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Default manifest file name.
pub const DEFAULT_CONFIG_FILE: &str = "convoy.toml";

/// Default local state file, relative to the working directory.
pub const DEFAULT_STATE_PATH: &str = ".convoy/state.json";

/// Environment override for the state backend (`local` or `remote`).
pub const BACKEND_ENV: &str = "CONVOY_STATE_BACKEND";

/// Environment override for the local state file path.
pub const STATE_PATH_ENV: &str = "CONVOY_STATE_PATH";

/// Environment override for the remote state object URL.
pub const STATE_URL_ENV: &str = "CONVOY_STATE_URL";

/// Bearer token for the remote state backend. Never part of the manifest.
pub const STATE_TOKEN_ENV: &str = "CONVOY_STATE_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: Box<toml::de::Error>,
  },

  #[error("invalid [settings] table: {0}")]
  Settings(#[source] serde_json::Error),

  #[error("unknown state backend {0:?} (expected \"local\" or \"remote\")")]
  UnknownBackend(String),

  #[error("state backend \"remote\" requires a url (set [state].url or {STATE_URL_ENV})")]
  MissingRemoteUrl,
}

/// Where deployment state is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
  #[default]
  Local,
  Remote,
}

/// The `[state]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
  #[serde(default)]
  pub backend: StateBackend,

  #[serde(default = "default_state_path")]
  pub path: PathBuf,

  #[serde(default)]
  pub url: Option<String>,
}

impl Default for StateConfig {
  fn default() -> Self {
    Self {
      backend: StateBackend::Local,
      path: default_state_path(),
      url: None,
    }
  }
}

fn default_state_path() -> PathBuf {
  PathBuf::from(DEFAULT_STATE_PATH)
}

/// One `[[steps]]` entry: a named shell command plus its declared dependencies.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
  pub name: String,

  /// Shell command executed through the platform shell.
  pub run: String,

  /// Files whose content feeds the step's fingerprint.
  #[serde(default)]
  pub files: Vec<PathBuf>,

  /// Dotted `[settings]` keys whose values feed the step's fingerprint.
  #[serde(default, rename = "config")]
  pub config_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
  version: Option<String>,
  settings: Option<toml::Value>,
  #[serde(default)]
  state: StateConfig,
  #[serde(default)]
  steps: Vec<StepSpec>,
}

/// A loaded deployment manifest.
#[derive(Debug, Clone)]
pub struct Config {
  pub version: Option<String>,

  /// The `[settings]` table converted to JSON, the form fingerprints hash.
  pub settings: Value,

  pub state: StateConfig,

  pub steps: Vec<StepSpec>,
}

impl Config {
  /// Load a manifest from `path` and apply environment overrides to the
  /// state backend selection.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ConfigError::NotFound(path.to_path_buf()));
      }
      Err(e) => {
        return Err(ConfigError::Read {
          path: path.to_path_buf(),
          source: e,
        });
      }
    };

    let raw: RawConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
      path: path.to_path_buf(),
      source: Box::new(e),
    })?;

    let settings = match raw.settings {
      Some(table) => serde_json::to_value(table).map_err(ConfigError::Settings)?,
      None => Value::Object(serde_json::Map::new()),
    };

    let mut state = raw.state;
    apply_env_overrides(&mut state)?;

    if state.backend == StateBackend::Remote && state.url.is_none() {
      return Err(ConfigError::MissingRemoteUrl);
    }

    Ok(Self {
      version: raw.version,
      settings,
      state,
      steps: raw.steps,
    })
  }

  /// Resolve a dotted key against the settings snapshot.
  pub fn setting(&self, dotted: &str) -> Option<&Value> {
    lookup(&self.settings, dotted)
  }
}

fn apply_env_overrides(state: &mut StateConfig) -> Result<(), ConfigError> {
  if let Ok(backend) = env::var(BACKEND_ENV) {
    state.backend = match backend.as_str() {
      "local" => StateBackend::Local,
      "remote" => StateBackend::Remote,
      other => return Err(ConfigError::UnknownBackend(other.to_string())),
    };
  }

  if let Ok(path) = env::var(STATE_PATH_ENV) {
    state.path = PathBuf::from(path);
  }

  if let Ok(url) = env::var(STATE_URL_ENV) {
    state.url = Some(url);
  }

  Ok(())
}

/// Walk a dotted path (`service.image`) through nested JSON objects.
pub fn lookup<'a>(root: &'a Value, dotted: &str) -> Option<&'a Value> {
  let mut current = root;
  for part in dotted.split('.') {
    current = current.as_object()?.get(part)?;
  }
  Some(current)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use serial_test::serial;
  use tempfile::TempDir;

  const FULL_CONFIG: &str = r#"
version = "1"

[settings]
region = "eu-west-1"

[settings.service]
image = "app:1.4.2"
replicas = 2

[state]
backend = "local"
path = "deploy/state.json"

[[steps]]
name = "create-registry"
run = "echo registry"
files = ["scripts/registry.sh"]
config = ["region"]

[[steps]]
name = "push-image"
run = "echo push"
config = ["service.image"]
"#;

  fn write_config(content: &str) -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("convoy.toml");
    fs::write(&path, content).unwrap();
    (temp, path)
  }

  #[test]
  #[serial]
  fn load_full_config() {
    let (_temp, path) = write_config(FULL_CONFIG);
    let config = Config::load(&path).unwrap();

    assert_eq!(config.version.as_deref(), Some("1"));
    assert_eq!(config.state.backend, StateBackend::Local);
    assert_eq!(config.state.path, PathBuf::from("deploy/state.json"));
    assert_eq!(config.steps.len(), 2);
    assert_eq!(config.steps[0].name, "create-registry");
    assert_eq!(config.steps[0].config_keys, vec!["region".to_string()]);
    assert_eq!(config.steps[1].files.len(), 0);
  }

  #[test]
  #[serial]
  fn defaults_when_sections_missing() {
    let (_temp, path) = write_config("version = \"1\"\n");
    let config = Config::load(&path).unwrap();

    assert_eq!(config.state.backend, StateBackend::Local);
    assert_eq!(config.state.path, PathBuf::from(DEFAULT_STATE_PATH));
    assert!(config.steps.is_empty());
    assert_eq!(config.settings, json!({}));
  }

  #[test]
  #[serial]
  fn setting_resolves_dotted_keys() {
    let (_temp, path) = write_config(FULL_CONFIG);
    let config = Config::load(&path).unwrap();

    assert_eq!(config.setting("region"), Some(&json!("eu-west-1")));
    assert_eq!(config.setting("service.image"), Some(&json!("app:1.4.2")));
    assert_eq!(config.setting("service.replicas"), Some(&json!(2)));
    assert_eq!(config.setting("service.missing"), None);
    assert_eq!(config.setting("region.deeper"), None);
  }

  #[test]
  #[serial]
  fn load_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let result = Config::load(&temp.path().join("nope.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
  }

  #[test]
  #[serial]
  fn load_invalid_toml_fails() {
    let (_temp, path) = write_config("this is not toml {{{");
    let result = Config::load(&path);
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
  }

  #[test]
  #[serial]
  fn env_overrides_backend_and_path() {
    let (_temp, path) = write_config(FULL_CONFIG);

    temp_env::with_vars(
      [
        (BACKEND_ENV, Some("remote")),
        (STATE_URL_ENV, Some("https://state.example.com/app.json")),
        (STATE_PATH_ENV, Some("elsewhere/state.json")),
      ],
      || {
        let config = Config::load(&path).unwrap();
        assert_eq!(config.state.backend, StateBackend::Remote);
        assert_eq!(
          config.state.url.as_deref(),
          Some("https://state.example.com/app.json")
        );
        assert_eq!(config.state.path, PathBuf::from("elsewhere/state.json"));
      },
    );
  }

  #[test]
  #[serial]
  fn unknown_backend_env_fails() {
    let (_temp, path) = write_config(FULL_CONFIG);

    temp_env::with_var(BACKEND_ENV, Some("s3"), || {
      let result = Config::load(&path);
      assert!(matches!(result, Err(ConfigError::UnknownBackend(_))));
    });
  }

  #[test]
  #[serial]
  fn remote_backend_without_url_fails() {
    let (_temp, path) = write_config(FULL_CONFIG);

    temp_env::with_var(BACKEND_ENV, Some("remote"), || {
      let result = Config::load(&path);
      assert!(matches!(result, Err(ConfigError::MissingRemoteUrl)));
    });
  }

  #[test]
  fn lookup_walks_nested_objects() {
    let root = json!({ "a": { "b": { "c": 3 } } });
    assert_eq!(lookup(&root, "a.b.c"), Some(&json!(3)));
    assert_eq!(lookup(&root, "a.b"), Some(&json!({ "c": 3 })));
    assert_eq!(lookup(&root, "a.x"), None);
    assert_eq!(lookup(&root, ""), None);
  }
}

//! Persisted deployment state.
//!
//! The state file is the engine's single source of truth for what has already
//! been provisioned. A step with no record has never run; a `Completed`
//! record carries the fingerprint of the inputs it was applied with; a
//! `Failed` record carries the error message and keeps whatever fingerprint
//! was last successfully applied.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fingerprint::Fingerprint;

/// Current state format version.
pub const STATE_VERSION: &str = "2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Completed,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
  pub status: StepStatus,

  pub timestamp: DateTime<Utc>,

  /// Fingerprint of the inputs the step last *successfully* applied.
  /// Empty until the first successful run; a failed attempt never updates it.
  #[serde(default)]
  pub dependency_hash: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,

  #[serde(default)]
  pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
  pub version: String,

  #[serde(default)]
  pub last_updated: Option<DateTime<Utc>>,

  #[serde(default)]
  pub steps: BTreeMap<String, StepRecord>,

  /// Provider resource metadata written by step actions. Opaque here.
  #[serde(default)]
  pub resources: BTreeMap<String, Value>,

  /// Keys from older state formats, preserved verbatim across load/save.
  #[serde(flatten)]
  pub legacy: BTreeMap<String, Value>,
}

impl Default for DeploymentState {
  fn default() -> Self {
    Self::new()
  }
}

impl DeploymentState {
  /// A fresh, empty state: every step is considered never-run.
  pub fn new() -> Self {
    Self {
      version: STATE_VERSION.to_string(),
      last_updated: None,
      steps: BTreeMap::new(),
      resources: BTreeMap::new(),
      legacy: BTreeMap::new(),
    }
  }

  pub fn step(&self, name: &str) -> Option<&StepRecord> {
    self.steps.get(name)
  }

  pub fn touch(&mut self) {
    self.last_updated = Some(Utc::now());
  }

  /// Record a successful run: completed, fresh fingerprint, error cleared.
  pub fn record_completed(
    &mut self,
    name: &str,
    fingerprint: &Fingerprint,
    metadata: BTreeMap<String, Value>,
  ) {
    self.steps.insert(
      name.to_string(),
      StepRecord {
        status: StepStatus::Completed,
        timestamp: Utc::now(),
        dependency_hash: fingerprint.0.clone(),
        error: None,
        metadata,
      },
    );
    self.touch();
  }

  /// Record a failed attempt.
  ///
  /// The previous `dependency_hash` is carried over unchanged: an attempted
  /// but failed run does not represent a successfully applied configuration.
  pub fn record_failed(&mut self, name: &str, message: &str, metadata: BTreeMap<String, Value>) {
    let prior_hash = self
      .steps
      .get(name)
      .map(|r| r.dependency_hash.clone())
      .unwrap_or_default();

    self.steps.insert(
      name.to_string(),
      StepRecord {
        status: StepStatus::Failed,
        timestamp: Utc::now(),
        dependency_hash: prior_hash,
        error: Some(message.to_string()),
        metadata,
      },
    );
    self.touch();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn new_state_is_empty() {
    let state = DeploymentState::new();
    assert_eq!(state.version, STATE_VERSION);
    assert!(state.last_updated.is_none());
    assert!(state.steps.is_empty());
    assert!(state.resources.is_empty());
  }

  #[test]
  fn record_completed_sets_hash_and_clears_error() {
    let mut state = DeploymentState::new();
    state.record_failed("create-vm", "quota exceeded", BTreeMap::new());
    state.record_completed("create-vm", &Fingerprint("abc123".to_string()), BTreeMap::new());

    let record = state.step("create-vm").unwrap();
    assert_eq!(record.status, StepStatus::Completed);
    assert_eq!(record.dependency_hash, "abc123");
    assert!(record.error.is_none());
    assert!(state.last_updated.is_some());
  }

  #[test]
  fn record_failed_preserves_prior_hash() {
    let mut state = DeploymentState::new();
    state.record_completed("push-image", &Fingerprint("h1".to_string()), BTreeMap::new());
    state.record_failed("push-image", "registry unreachable", BTreeMap::new());

    let record = state.step("push-image").unwrap();
    assert_eq!(record.status, StepStatus::Failed);
    assert_eq!(record.dependency_hash, "h1");
    assert_eq!(record.error.as_deref(), Some("registry unreachable"));
  }

  #[test]
  fn record_failed_without_prior_run_has_empty_hash() {
    let mut state = DeploymentState::new();
    state.record_failed("bootstrap", "no credentials", BTreeMap::new());

    let record = state.step("bootstrap").unwrap();
    assert_eq!(record.dependency_hash, "");
  }

  #[test]
  fn serializes_wire_format() {
    let mut state = DeploymentState::new();
    state.record_completed("create-vm", &Fingerprint("deadbeef".to_string()), BTreeMap::new());
    state
      .resources
      .insert("vm".to_string(), json!({ "id": "vm-42" }));

    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["version"], json!(STATE_VERSION));
    assert_eq!(value["steps"]["create-vm"]["status"], json!("completed"));
    assert_eq!(value["steps"]["create-vm"]["dependency_hash"], json!("deadbeef"));
    assert!(value["steps"]["create-vm"].get("error").is_none());
    assert_eq!(value["steps"]["create-vm"]["metadata"], json!({}));
    assert_eq!(value["resources"]["vm"]["id"], json!("vm-42"));
  }

  #[test]
  fn legacy_keys_round_trip_verbatim() {
    let raw = json!({
      "version": "2",
      "last_updated": null,
      "steps": {},
      "resources": {},
      "completed_steps": ["create-vm", "push-image"],
      "created_resources": { "vm": "vm-42" }
    });

    let state: DeploymentState = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(
      state.legacy.get("completed_steps"),
      Some(&json!(["create-vm", "push-image"]))
    );

    let back = serde_json::to_value(&state).unwrap();
    assert_eq!(back["completed_steps"], raw["completed_steps"]);
    assert_eq!(back["created_resources"], raw["created_resources"]);
  }
}

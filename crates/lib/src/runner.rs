//! The per-step decision engine.
//!
//! For every step the runner computes the current dependency fingerprint,
//! compares it against the persisted record, and decides: skip, or execute.
//! The decision itself is a pure function ([`decide`]); the runner wraps it
//! with fingerprinting, action invocation, state recording, and persistence.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::fingerprint::{Fingerprint, FingerprintError, compute_fingerprint};
use crate::state::{DeploymentState, StateError, StateStore, StepRecord, StepStatus};
use crate::step::{Step, StepContext, StepError};

#[derive(Debug, Error)]
pub enum RunnerError {
  #[error("failed to fingerprint step {step:?}: {source}")]
  Fingerprint {
    step: String,
    #[source]
    source: FingerprintError,
  },

  #[error(transparent)]
  State(#[from] StateError),

  #[error("step {step:?} failed: {source}")]
  Step {
    step: String,
    #[source]
    source: StepError,
  },
}

/// Why a step is (or would be) executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteReason {
  /// Explicitly forced by the caller.
  Forced,
  /// No record of a previous run.
  NeverRun,
  /// The last recorded run failed.
  PreviousFailed,
  /// The dependency fingerprint no longer matches the record.
  InputsChanged,
}

impl std::fmt::Display for ExecuteReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let text = match self {
      Self::Forced => "forced",
      Self::NeverRun => "never run",
      Self::PreviousFailed => "previous run failed",
      Self::InputsChanged => "inputs changed",
    };
    write!(f, "{text}")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Execute(ExecuteReason),
  Skip,
}

/// Decide a single step's fate.
///
/// Pure: the outcome depends only on the persisted record, the freshly
/// computed fingerprint, and the force flag. Checks are ordered so a forced
/// step executes even when up to date, and a failed record always retries
/// regardless of whether its inputs changed since.
pub fn decide(record: Option<&StepRecord>, fingerprint: &Fingerprint, forced: bool) -> Decision {
  if forced {
    return Decision::Execute(ExecuteReason::Forced);
  }

  match record {
    None => Decision::Execute(ExecuteReason::NeverRun),
    Some(record) if record.status == StepStatus::Failed => {
      Decision::Execute(ExecuteReason::PreviousFailed)
    }
    Some(record) if record.dependency_hash != fingerprint.0 => {
      Decision::Execute(ExecuteReason::InputsChanged)
    }
    Some(_) => Decision::Skip,
  }
}

/// What to force and whether to touch anything at all.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  /// Force every step, ignoring all records.
  pub force_all: bool,

  /// Force these steps by name.
  pub force: BTreeSet<String>,

  /// Decide only: report what would run, execute nothing, persist nothing.
  pub dry_run: bool,
}

impl RunOptions {
  fn forces(&self, step: &str) -> bool {
    self.force_all || self.force.contains(step)
  }
}

/// Outcome of one step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
  Skipped,
  Completed(ExecuteReason),
  /// Dry run: the step would have executed for this reason.
  WouldExecute(ExecuteReason),
}

pub struct StepRunner<'a> {
  config: &'a Config,
  store: &'a dyn StateStore,
  options: &'a RunOptions,
}

impl<'a> StepRunner<'a> {
  pub fn new(config: &'a Config, store: &'a dyn StateStore, options: &'a RunOptions) -> Self {
    Self {
      config,
      store,
      options,
    }
  }

  /// Run one step through the decision engine.
  ///
  /// The fingerprint is computed before any action so the recorded hash is
  /// exactly what was decided on. Outside of dry runs, state is persisted
  /// after every invocation, including skips, so a migrated legacy document
  /// reaches storage on the first pass. A failed action is recorded and
  /// persisted before the error is returned.
  pub fn run_step(
    &self,
    step: &Step,
    state: &mut DeploymentState,
  ) -> Result<StepOutcome, RunnerError> {
    // An incomplete fingerprint would corrupt future change detection, so a
    // fingerprint failure fails the step before its action is ever invoked.
    // It is recorded like any other step failure so the cause survives in
    // state.
    let fingerprint = match compute_fingerprint(
      &step.deps.files,
      &step.deps.config_keys,
      &self.config.settings,
    ) {
      Ok(fingerprint) => fingerprint,
      Err(source) => {
        if !self.options.dry_run {
          state.record_failed(&step.name, &source.to_string(), BTreeMap::new());
          self.store.save(state)?;
        }
        return Err(RunnerError::Fingerprint {
          step: step.name.clone(),
          source,
        });
      }
    };

    let decision = decide(state.step(&step.name), &fingerprint, self.options.forces(&step.name));

    let reason = match decision {
      Decision::Skip => {
        info!(step = %step.name, "up to date, skipping");
        if !self.options.dry_run {
          self.store.save(state)?;
        }
        return Ok(StepOutcome::Skipped);
      }
      Decision::Execute(reason) => reason,
    };

    if self.options.dry_run {
      info!(step = %step.name, %reason, "would execute (dry run)");
      return Ok(StepOutcome::WouldExecute(reason));
    }

    info!(step = %step.name, %reason, "executing");

    let mut metadata = BTreeMap::new();
    let result = {
      let mut ctx = StepContext {
        step: &step.name,
        config: self.config,
        resources: &mut state.resources,
        metadata: &mut metadata,
      };
      (step.action)(&mut ctx)
    };

    match result {
      Ok(()) => {
        state.record_completed(&step.name, &fingerprint, metadata);
        self.store.save(state)?;
        debug!(step = %step.name, hash = %fingerprint, "step completed");
        Ok(StepOutcome::Completed(reason))
      }
      Err(source) => {
        state.record_failed(&step.name, &source.message, metadata);
        self.store.save(state)?;
        Err(RunnerError::Step {
          step: step.name.clone(),
          source,
        })
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::StateConfig;
  use crate::state::LocalStateStore;
  use crate::step::DependencySpec;
  use chrono::Utc;
  use serde_json::json;
  use std::cell::Cell;
  use std::rc::Rc;
  use tempfile::TempDir;

  fn record(status: StepStatus, hash: &str) -> StepRecord {
    StepRecord {
      status,
      timestamp: Utc::now(),
      dependency_hash: hash.to_string(),
      error: None,
      metadata: BTreeMap::new(),
    }
  }

  #[test]
  fn decide_never_run_executes() {
    let fp = Fingerprint("h".to_string());
    assert_eq!(
      decide(None, &fp, false),
      Decision::Execute(ExecuteReason::NeverRun)
    );
  }

  #[test]
  fn decide_matching_hash_skips() {
    let fp = Fingerprint("h".to_string());
    let rec = record(StepStatus::Completed, "h");
    assert_eq!(decide(Some(&rec), &fp, false), Decision::Skip);
  }

  #[test]
  fn decide_changed_hash_executes() {
    let fp = Fingerprint("h2".to_string());
    let rec = record(StepStatus::Completed, "h1");
    assert_eq!(
      decide(Some(&rec), &fp, false),
      Decision::Execute(ExecuteReason::InputsChanged)
    );
  }

  #[test]
  fn decide_failed_record_retries_even_with_matching_hash() {
    let fp = Fingerprint("h".to_string());
    let rec = record(StepStatus::Failed, "h");
    assert_eq!(
      decide(Some(&rec), &fp, false),
      Decision::Execute(ExecuteReason::PreviousFailed)
    );
  }

  #[test]
  fn decide_force_beats_up_to_date() {
    let fp = Fingerprint("h".to_string());
    let rec = record(StepStatus::Completed, "h");
    assert_eq!(
      decide(Some(&rec), &fp, true),
      Decision::Execute(ExecuteReason::Forced)
    );
  }

  fn test_config() -> Config {
    Config {
      version: None,
      settings: json!({}),
      state: StateConfig::default(),
      steps: Vec::new(),
    }
  }

  fn counting_step(name: &str, calls: Rc<Cell<u32>>) -> Step {
    Step::new(name, DependencySpec::default(), move |_ctx| {
      calls.set(calls.get() + 1);
      Ok(())
    })
  }

  #[test]
  fn second_invocation_skips() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::new(temp.path().join("state.json"));
    let config = test_config();
    let options = RunOptions::default();
    let runner = StepRunner::new(&config, &store, &options);

    let calls = Rc::new(Cell::new(0));
    let step = counting_step("noop", calls.clone());

    let mut state = store.load().unwrap();
    let first = runner.run_step(&step, &mut state).unwrap();
    let second = runner.run_step(&step, &mut state).unwrap();

    assert_eq!(first, StepOutcome::Completed(ExecuteReason::NeverRun));
    assert_eq!(second, StepOutcome::Skipped);
    assert_eq!(calls.get(), 1);
  }

  #[test]
  fn failure_is_recorded_and_persisted() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::new(temp.path().join("state.json"));
    let config = test_config();
    let options = RunOptions::default();
    let runner = StepRunner::new(&config, &store, &options);

    let step = Step::new("boom", DependencySpec::default(), |_ctx| {
      Err(StepError::new("exploded"))
    });

    let mut state = store.load().unwrap();
    let err = runner.run_step(&step, &mut state).unwrap_err();
    assert!(matches!(err, RunnerError::Step { .. }));

    let persisted = store.load().unwrap();
    let rec = persisted.step("boom").unwrap();
    assert_eq!(rec.status, StepStatus::Failed);
    assert_eq!(rec.error.as_deref(), Some("exploded"));
    assert_eq!(rec.dependency_hash, "");
  }

  #[test]
  fn dry_run_reports_without_executing_or_persisting() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::new(temp.path().join("state.json"));
    let config = test_config();
    let options = RunOptions {
      dry_run: true,
      ..RunOptions::default()
    };
    let runner = StepRunner::new(&config, &store, &options);

    let calls = Rc::new(Cell::new(0));
    let step = counting_step("noop", calls.clone());

    let mut state = store.load().unwrap();
    let outcome = runner.run_step(&step, &mut state).unwrap();

    assert_eq!(outcome, StepOutcome::WouldExecute(ExecuteReason::NeverRun));
    assert_eq!(calls.get(), 0);
    assert!(!temp.path().join("state.json").exists());
  }

  #[test]
  fn forced_step_reruns_and_updates_hash() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::new(temp.path().join("state.json"));
    let config = test_config();

    let calls = Rc::new(Cell::new(0));
    let step = counting_step("noop", calls.clone());

    let plain = RunOptions::default();
    let mut state = store.load().unwrap();
    StepRunner::new(&config, &store, &plain)
      .run_step(&step, &mut state)
      .unwrap();

    let forced = RunOptions {
      force: BTreeSet::from(["noop".to_string()]),
      ..RunOptions::default()
    };
    let outcome = StepRunner::new(&config, &store, &forced)
      .run_step(&step, &mut state)
      .unwrap();

    assert_eq!(outcome, StepOutcome::Completed(ExecuteReason::Forced));
    assert_eq!(calls.get(), 2);
  }

  #[test]
  fn fingerprint_failure_is_recorded_without_invoking_the_action() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::new(temp.path().join("state.json"));
    let config = test_config();
    let options = RunOptions::default();
    let runner = StepRunner::new(&config, &store, &options);

    let calls = Rc::new(Cell::new(0));
    let deps = crate::step::DependencySpec {
      files: vec![temp.path().join("missing.txt")],
      config_keys: Vec::new(),
    };
    let calls_inner = calls.clone();
    let step = Step::new("deploy", deps, move |_ctx| {
      calls_inner.set(calls_inner.get() + 1);
      Ok(())
    });

    let mut state = store.load().unwrap();
    let err = runner.run_step(&step, &mut state).unwrap_err();
    assert!(matches!(err, RunnerError::Fingerprint { .. }));
    assert_eq!(calls.get(), 0);

    let persisted = store.load().unwrap();
    let rec = persisted.step("deploy").unwrap();
    assert_eq!(rec.status, StepStatus::Failed);
    assert!(rec.error.as_deref().unwrap().contains("missing.txt"));
  }

  #[test]
  fn action_writes_resources_and_metadata_into_state() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::new(temp.path().join("state.json"));
    let config = test_config();
    let options = RunOptions::default();
    let runner = StepRunner::new(&config, &store, &options);

    let step = Step::new("create-vm", DependencySpec::default(), |ctx| {
      ctx.resources.insert("vm".to_string(), json!({ "id": "vm-42" }));
      ctx.metadata.insert("zone".to_string(), json!("b"));
      Ok(())
    });

    let mut state = store.load().unwrap();
    runner.run_step(&step, &mut state).unwrap();

    let persisted = store.load().unwrap();
    assert_eq!(persisted.resources["vm"]["id"], json!("vm-42"));
    assert_eq!(persisted.step("create-vm").unwrap().metadata["zone"], json!("b"));
  }
}

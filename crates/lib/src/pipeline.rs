//! The linear pipeline.
//!
//! A pipeline owns an ordered list of steps and a state store. `run` walks
//! the steps in declaration order, handing each to the [`StepRunner`]; the
//! first failure halts the walk so later steps never run against a broken
//! foundation.

use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::runner::{RunOptions, RunnerError, StepOutcome, StepRunner};
use crate::state::{StateError, StateStore, open_store};
use crate::step::{DependencySpec, Step};

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("duplicate step name {0:?}")]
  DuplicateStep(String),

  #[error("cannot force unknown step {0:?}")]
  UnknownStep(String),

  #[error(transparent)]
  State(#[from] StateError),

  #[error(transparent)]
  Runner(#[from] RunnerError),
}

/// Per-step result of a pipeline run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
  pub step: String,
  pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub reports: Vec<RunReport>,
}

impl RunSummary {
  pub fn executed(&self) -> usize {
    self
      .reports
      .iter()
      .filter(|r| matches!(r.outcome, StepOutcome::Completed(_)))
      .count()
  }

  pub fn skipped(&self) -> usize {
    self
      .reports
      .iter()
      .filter(|r| r.outcome == StepOutcome::Skipped)
      .count()
  }

  pub fn pending(&self) -> usize {
    self
      .reports
      .iter()
      .filter(|r| matches!(r.outcome, StepOutcome::WouldExecute(_)))
      .count()
  }
}

pub struct Pipeline {
  config: Config,
  store: Box<dyn StateStore>,
  steps: Vec<Step>,
}

impl Pipeline {
  /// An empty pipeline over an explicit store. Steps are added with
  /// [`Pipeline::add_step`].
  pub fn new(config: Config, store: Box<dyn StateStore>) -> Self {
    Self {
      config,
      store,
      steps: Vec::new(),
    }
  }

  /// Build a pipeline entirely from the manifest: one shell-command step per
  /// `[[steps]]` entry, in declaration order, over the configured backend.
  pub fn from_config(config: Config) -> Result<Self, PipelineError> {
    let store = open_store(&config.state)?;
    let mut pipeline = Self::new(config, store);

    for spec in pipeline.config.steps.clone() {
      let deps = DependencySpec {
        files: spec.files,
        config_keys: spec.config_keys,
      };
      pipeline.add_step(Step::command(spec.name, spec.run, deps))?;
    }

    Ok(pipeline)
  }

  /// Append a step. Names must be unique within the pipeline.
  pub fn add_step(&mut self, step: Step) -> Result<(), PipelineError> {
    if self.steps.iter().any(|s| s.name == step.name) {
      return Err(PipelineError::DuplicateStep(step.name));
    }
    self.steps.push(step);
    Ok(())
  }

  /// Where this pipeline's state lives, for display.
  pub fn target(&self) -> String {
    self.store.target()
  }

  /// Walk every step in order. Halts at the first failure; everything
  /// decided before the failure has already been persisted.
  pub fn run(&self, options: &RunOptions) -> Result<RunSummary, PipelineError> {
    for name in &options.force {
      if !self.steps.iter().any(|s| &s.name == name) {
        return Err(PipelineError::UnknownStep(name.clone()));
      }
    }

    let mut state = self.store.load()?;
    let runner = StepRunner::new(&self.config, self.store.as_ref(), options);

    let mut summary = RunSummary::default();
    for step in &self.steps {
      let outcome = runner.run_step(step, &mut state)?;
      summary.reports.push(RunReport {
        step: step.name.clone(),
        outcome,
      });
    }

    info!(
      executed = summary.executed(),
      skipped = summary.skipped(),
      "pipeline run finished"
    );
    Ok(summary)
  }

  /// Dry run: report per-step decisions, execute and persist nothing.
  pub fn plan(&self) -> Result<RunSummary, PipelineError> {
    self.run(&RunOptions {
      dry_run: true,
      ..RunOptions::default()
    })
  }

  /// Discard all persisted state, so the next run starts from scratch.
  pub fn reset(&self) -> Result<(), PipelineError> {
    self.store.reset()?;
    info!(target = %self.store.target(), "state reset");
    Ok(())
  }
}

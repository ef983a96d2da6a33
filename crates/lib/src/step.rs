//! The step contract.
//!
//! A step is a named unit of the pipeline: a dependency declaration plus an
//! opaque action. The engine never looks inside the action; it only decides
//! whether to invoke it and records the outcome. Actions are plain closures
//! so callers can wire up anything from an in-process function to a shell
//! command (see [`Step::command`]).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

/// Error raised by a step action.
///
/// The message is recorded verbatim on the step's state record, so it should
/// be meaningful to an operator reading `convoy status` later.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StepError {
  pub message: String,
}

impl StepError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Declares what a step's fingerprint is computed over.
#[derive(Debug, Clone, Default)]
pub struct DependencySpec {
  /// Files whose content affects the step.
  pub files: Vec<PathBuf>,

  /// Dotted settings keys whose values affect the step.
  pub config_keys: Vec<String>,
}

/// Mutable view handed to a step action while it runs.
pub struct StepContext<'a> {
  /// Name of the running step.
  pub step: &'a str,

  pub config: &'a Config,

  /// Provider resource metadata, persisted under `resources` in the state
  /// file. Opaque to the engine.
  pub resources: &'a mut BTreeMap<String, Value>,

  /// Per-step metadata, persisted on the step's own record.
  pub metadata: &'a mut BTreeMap<String, Value>,
}

pub type StepFn = Box<dyn Fn(&mut StepContext) -> Result<(), StepError>>;

/// A named pipeline step.
pub struct Step {
  pub name: String,
  pub deps: DependencySpec,
  pub action: StepFn,
}

impl std::fmt::Debug for Step {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Step")
      .field("name", &self.name)
      .field("deps", &self.deps)
      .finish_non_exhaustive()
  }
}

impl Step {
  pub fn new(
    name: impl Into<String>,
    deps: DependencySpec,
    action: impl Fn(&mut StepContext) -> Result<(), StepError> + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      deps,
      action: Box::new(action),
    }
  }

  /// A step whose action runs a shell command.
  ///
  /// The command gets `CONVOY_STEP` in its environment and inherits the
  /// working directory. Non-zero exit fails the step with the exit code and
  /// the tail of stderr as the recorded error.
  pub fn command(name: impl Into<String>, command: impl Into<String>, deps: DependencySpec) -> Self {
    let command = command.into();
    Self::new(name, deps, move |ctx| run_command(ctx.step, &command))
  }
}

fn run_command(step: &str, command: &str) -> Result<(), StepError> {
  info!(step, cmd = %command, "running step command");

  let (shell, flag) = shell_invocation();
  let output = Command::new(shell)
    .arg(flag)
    .arg(command)
    .env("CONVOY_STEP", step)
    .output()
    .map_err(|e| StepError::new(format!("failed to spawn {command:?}: {e}")))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let mut message = match output.status.code() {
      Some(code) => format!("command exited with status {code}"),
      None => "command terminated by signal".to_string(),
    };
    if let Some(tail) = stderr_tail(&stderr) {
      message.push_str(": ");
      message.push_str(&tail);
    }
    return Err(StepError::new(message));
  }

  let stdout = String::from_utf8_lossy(&output.stdout);
  if !stdout.trim().is_empty() {
    debug!(step, stdout = %stdout.trim(), "step command output");
  }

  Ok(())
}

fn shell_invocation() -> (&'static str, &'static str) {
  #[cfg(unix)]
  {
    ("/bin/sh", "-c")
  }

  #[cfg(windows)]
  {
    ("cmd.exe", "/C")
  }
}

/// Last few non-empty stderr lines, joined; keeps recorded errors short.
fn stderr_tail(stderr: &str) -> Option<String> {
  let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
  if lines.is_empty() {
    return None;
  }
  let start = lines.len().saturating_sub(3);
  Some(lines[start..].join(" / "))
}

// src/dag/step.rs

//! Declarative description of one unit of work in a DAG.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exec::Signal;

/// Retry behaviour on a failed execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of re-attempts after the first failure.
    pub limit: u32,
    /// Wait between attempts.
    pub interval: Duration,
}

/// Repeat behaviour after a successful execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepeatPolicy {
    pub repeat: bool,
    /// Wait between repetitions.
    pub interval: Duration,
}

/// Controls whether dependents may run when this step ended in
/// Error or Skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinueOn {
    pub failure: bool,
    pub skipped: bool,
}

/// A precondition: `condition` is evaluated (command substitution or
/// variable expansion) and its trimmed result must equal `expected`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub condition: String,
    pub expected: String,
}

impl Condition {
    pub fn new(condition: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            expected: expected.into(),
        }
    }
}

/// Opaque executor selection for a step.
///
/// `executor_type` is looked up in the executor registry; the empty string
/// selects the default shell executor. `config` is passed through to the
/// executor implementation untouched.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub executor_type: String,
    pub config: serde_json::Value,
}

/// A user-declared step: command plus policies. Immutable once the
/// execution graph has been built.
#[derive(Debug, Clone, Default)]
pub struct Step {
    /// Unique name within the DAG.
    pub name: String,
    /// Command to run (interpreter when `script` is set).
    pub command: String,
    pub args: Vec<String>,
    /// Optional inline script body, materialised to a temp file at setup.
    pub script: Option<String>,
    /// Working directory.
    pub dir: Option<PathBuf>,
    /// Shell used for command lines and precondition evaluation.
    /// Defaults to `sh`.
    pub shell: Option<String>,
    /// Extra environment variables, appended to the inherited environment.
    pub env: Vec<(String, String)>,
    /// Names of predecessor steps.
    pub depends: Vec<String>,
    pub retry_policy: RetryPolicy,
    pub repeat_policy: RepeatPolicy,
    pub continue_on: ContinueOn,
    pub preconditions: Vec<Condition>,
    /// Name of the variable capturing the first non-empty stdout line.
    pub output: Option<String>,
    /// Optional stdout/stderr file redirects (override the default log paths).
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Signal sent on cancel instead of SIGTERM, when set.
    pub signal_on_stop: Option<Signal>,
    /// Opaque to the core; consumed by external reporting.
    pub mail_on_error: bool,
    pub executor: ExecutorConfig,
}

impl Step {
    /// Minimal step: a named shell command with no policies.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// The shell this step uses for command lines and preconditions.
    pub fn shell_command(&self) -> &str {
        self.shell.as_deref().unwrap_or("sh")
    }

    /// Signal delivered on stop (defaults to SIGTERM).
    pub fn stop_signal(&self) -> Signal {
        self.signal_on_stop.unwrap_or(Signal::Term)
    }
}

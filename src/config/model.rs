// src/config/model.rs

//! TOML model of a DAG definition file.
//!
//! Example:
//!
//! ```toml
//! [dag]
//! name = "etl"
//! max_active_runs = 2
//! timeout_sec = 3600
//!
//! [handlers.on_failure]
//! command = "notify-send 'etl failed'"
//!
//! [step.extract]
//! command = "fetch-data"
//! output = "DATA_FILE"
//!
//! [step.transform]
//! command = "transform ${DATA_FILE}"
//! depends = ["extract"]
//! retry = { limit = 2, interval_ms = 500 }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{Condition, ContinueOn, RepeatPolicy, RetryPolicy, Step};
use crate::engine::SchedulerConfig;
use crate::errors::{DagrunError, Result};

/// Top-level file as deserialised, before semantic validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub dag: DagSection,

    #[serde(default)]
    pub handlers: HandlerSection,

    /// All steps from `[step.<name>]`. Keys are the step names; the map is
    /// ordered, so launch tie-breaking is by name.
    #[serde(default)]
    pub step: BTreeMap<String, StepConfig>,
}

/// `[dag]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DagSection {
    /// DAG name; defaults to the config file stem when empty.
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: usize,

    /// Overall timeout in seconds; 0 means none.
    #[serde(default)]
    pub timeout_sec: u64,

    /// Delay between step launches, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,

    /// Grace period before SIGKILL escalation on stop, in seconds.
    #[serde(default = "default_max_cleanup_sec")]
    pub max_cleanup_sec: u64,

    /// Directory for per-step log files.
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Positional parameters, split on whitespace into `$1`..`$9`.
    #[serde(default)]
    pub params: Option<String>,
}

fn default_max_active_runs() -> usize {
    1
}

fn default_max_cleanup_sec() -> u64 {
    60
}

impl Default for DagSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_active_runs: default_max_active_runs(),
            timeout_sec: 0,
            delay_ms: 0,
            max_cleanup_sec: default_max_cleanup_sec(),
            log_dir: None,
            params: None,
        }
    }
}

/// `[handlers]` section: lifecycle steps run after the graph completes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandlerSection {
    pub on_success: Option<StepConfig>,
    pub on_failure: Option<StepConfig>,
    pub on_cancel: Option<StepConfig>,
    pub on_exit: Option<StepConfig>,
}

/// One `[step.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Inline script body; `command` becomes the interpreter when set.
    pub script: Option<String>,

    pub dir: Option<String>,
    pub shell: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub depends: Vec<String>,

    pub retry: Option<RetryConfig>,
    pub repeat: Option<RepeatConfig>,

    #[serde(default)]
    pub continue_on: ContinueOnConfig,

    #[serde(default)]
    pub preconditions: Vec<PreconditionConfig>,

    pub output: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,

    /// Signal name sent on stop (e.g. "SIGINT"); default SIGTERM.
    pub signal_on_stop: Option<String>,

    #[serde(default)]
    pub mail_on_error: bool,

    /// Executor type; empty selects the shell executor.
    pub executor: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    pub limit: u32,
    #[serde(default)]
    pub interval_ms: u64,
}

/// Presence of `[step.<name>.repeat]` enables repetition.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RepeatConfig {
    #[serde(default)]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ContinueOnConfig {
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreconditionConfig {
    pub condition: String,
    #[serde(default)]
    pub expected: String,
}

impl StepConfig {
    /// Convert to the runtime [`Step`], attaching its name.
    pub fn into_step(self, name: &str) -> Result<Step> {
        let signal_on_stop = match self.signal_on_stop.as_deref() {
            Some(raw) => Some(raw.parse()?),
            None => None,
        };

        let mut step = Step::new(name, self.command);
        step.args = self.args;
        step.script = self.script;
        step.dir = self.dir.map(PathBuf::from);
        step.shell = self.shell;
        step.env = self.env.into_iter().collect();
        step.depends = self.depends;
        step.retry_policy = self
            .retry
            .map(|r| RetryPolicy {
                limit: r.limit,
                interval: Duration::from_millis(r.interval_ms),
            })
            .unwrap_or_default();
        step.repeat_policy = self
            .repeat
            .map(|r| RepeatPolicy {
                repeat: true,
                interval: Duration::from_millis(r.interval_ms),
            })
            .unwrap_or_default();
        step.continue_on = ContinueOn {
            failure: self.continue_on.failure,
            skipped: self.continue_on.skipped,
        };
        step.preconditions = self
            .preconditions
            .into_iter()
            .map(|p| Condition::new(p.condition, p.expected))
            .collect();
        step.output = self.output;
        step.stdout = self.stdout.map(PathBuf::from);
        step.stderr = self.stderr.map(PathBuf::from);
        step.signal_on_stop = signal_on_stop;
        step.mail_on_error = self.mail_on_error;
        if let Some(executor) = self.executor {
            step.executor.executor_type = executor;
        }
        Ok(step)
    }
}

/// A validated configuration, ready to be turned into steps and a
/// scheduler configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub name: String,
    dag: DagSection,
    handlers: HandlerSection,
    steps: BTreeMap<String, StepConfig>,
}

impl ConfigFile {
    /// Used by the validation layer after all checks pass.
    pub(crate) fn new_unchecked(raw: RawConfigFile, name: String) -> Self {
        Self {
            name,
            dag: raw.dag,
            handlers: raw.handlers,
            steps: raw.step,
        }
    }

    pub fn step_configs(&self) -> &BTreeMap<String, StepConfig> {
        &self.steps
    }

    /// Steps in map order.
    pub fn to_steps(&self) -> Result<Vec<Step>> {
        self.steps
            .iter()
            .map(|(name, cfg)| cfg.clone().into_step(name))
            .collect()
    }

    /// Scheduler configuration for one run under the given request ID.
    pub fn scheduler_config(&self, request_id: String) -> Result<SchedulerConfig> {
        let handler = |cfg: &Option<StepConfig>, name: &str| -> Result<Option<Step>> {
            cfg.clone().map(|c| c.into_step(name)).transpose()
        };

        Ok(SchedulerConfig {
            max_active_runs: self.dag.max_active_runs,
            timeout: match self.dag.timeout_sec {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            delay: match self.dag.delay_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            max_cleanup_time: Duration::from_secs(self.dag.max_cleanup_sec),
            log_dir: self
                .dag
                .log_dir
                .clone()
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("dagrun-logs").join(&self.name)),
            request_id,
            params: self
                .dag
                .params
                .as_deref()
                .map(|p| p.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            on_success: handler(&self.handlers.on_success, "onSuccess")?,
            on_failure: handler(&self.handlers.on_failure, "onFailure")?,
            on_cancel: handler(&self.handlers.on_cancel, "onCancel")?,
            on_exit: handler(&self.handlers.on_exit, "onExit")?,
        })
    }

    pub fn max_active_runs(&self) -> usize {
        self.dag.max_active_runs
    }
}

impl RawConfigFile {
    /// Basic shape check shared by the validation layer.
    pub(crate) fn ensure_has_steps(&self) -> Result<()> {
        if self.step.is_empty() {
            return Err(DagrunError::Config(
                "config must contain at least one [step.<name>] section".to_string(),
            ));
        }
        Ok(())
    }
}

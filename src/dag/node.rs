// src/dag/node.rs

//! Runtime state of one step bound to an execution graph.
//!
//! A `Node` owns everything mutable about a step while it runs: status,
//! timing, retry bookkeeping, log files, captured output and the handle to
//! the currently running executor. All mutation goes through a per-node
//! mutex; the scheduler and the IPC reader observe through accessors.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::dag::env;
use crate::dag::step::Step;
use crate::engine::NodeStatus;
use crate::errors::{DagrunError, Result};
use crate::exec::{ExecContext, Executor, ExecutorRegistry, OutputWriter, Signal};

#[derive(Default)]
struct NodeState {
    status: Option<NodeStatus>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    retried_at: Option<DateTime<Utc>>,
    retry_count: u32,
    done_count: u32,
    error: Option<String>,
    stdout_path: Option<PathBuf>,
    stderr_path: Option<PathBuf>,
    stdout_log: Option<Arc<Mutex<std::fs::File>>>,
    stderr_log: Option<Arc<Mutex<std::fs::File>>>,
    script_file: Option<PathBuf>,
    output_variables: HashMap<String, String>,
    executor: Option<Arc<dyn Executor>>,
    logs_closed: bool,
}

pub struct Node {
    step: Step,
    state: Mutex<NodeState>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("step", &self.step.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.step.name
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().expect("node state lock poisoned")
    }

    pub fn status(&self) -> NodeStatus {
        self.lock().status.unwrap_or(NodeStatus::None)
    }

    /// Set the status, maintaining the invariant that `finished_at` is set
    /// iff the status is terminal.
    pub fn set_status(&self, status: NodeStatus) {
        let mut state = self.lock();
        state.status = Some(status);
        if status.is_terminal() {
            if state.finished_at.is_none() {
                state.finished_at = Some(Utc::now());
            }
        } else {
            state.finished_at = None;
        }
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.lock().error = Some(message.into());
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn done_count(&self) -> u32 {
        self.lock().done_count
    }

    pub fn increment_done_count(&self) {
        self.lock().done_count += 1;
    }

    /// Record one retry attempt. The scheduler is the only caller.
    pub fn increment_retry_count(&self) {
        let mut state = self.lock();
        state.retry_count += 1;
        state.retried_at = Some(Utc::now());
    }

    pub fn stdout_path(&self) -> Option<PathBuf> {
        self.lock().stdout_path.clone()
    }

    pub fn stderr_path(&self) -> Option<PathBuf> {
        self.lock().stderr_path.clone()
    }

    /// Captured output variables, as `NAME -> NAME=value`.
    pub fn output_variables(&self) -> HashMap<String, String> {
        self.lock().output_variables.clone()
    }

    /// Open log files, materialise the inline script (if any) and record
    /// the start timestamp.
    pub fn setup(&self, log_dir: &Path, request_id: &str) -> Result<()> {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| DagrunError::Setup(format!("creating log dir {log_dir:?}: {e}")))?;

        if let Some(dir) = &self.step.dir {
            if !dir.is_dir() {
                return Err(DagrunError::Setup(format!(
                    "working directory {dir:?} for step '{}' does not exist",
                    self.step.name
                )));
            }
        }

        let id_prefix: String = request_id.chars().take(8).collect();
        let stdout_path = self
            .step
            .stdout
            .clone()
            .unwrap_or_else(|| log_dir.join(format!("{}.{id_prefix}.out", self.step.name)));
        let stderr_path = self
            .step
            .stderr
            .clone()
            .unwrap_or_else(|| log_dir.join(format!("{}.{id_prefix}.err", self.step.name)));

        let stdout_log = open_log(&stdout_path)?;
        let stderr_log = open_log(&stderr_path)?;

        let script_file = match &self.step.script {
            Some(body) => Some(self.write_script(body, &id_prefix)?),
            None => None,
        };

        let mut state = self.lock();
        state.stdout_path = Some(stdout_path);
        state.stderr_path = Some(stderr_path);
        state.stdout_log = Some(stdout_log);
        state.stderr_log = Some(stderr_log);
        state.script_file = script_file;
        state.started_at = Some(Utc::now());
        Ok(())
    }

    fn write_script(&self, body: &str, id_prefix: &str) -> Result<PathBuf> {
        let dir = self
            .step
            .dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let path = dir.join(format!(".dagrun-script-{}-{id_prefix}.sh", self.step.name));

        std::fs::write(&path, body)
            .map_err(|e| DagrunError::Setup(format!("writing script {path:?}: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| DagrunError::Setup(format!("chmod script {path:?}: {e}")))?;
        }

        Ok(path)
    }

    /// Run one attempt of this step to completion through its executor.
    ///
    /// Status transitions are the scheduler's responsibility; this only
    /// reports the attempt outcome and captures output on success.
    pub async fn execute(
        &self,
        registry: &ExecutorRegistry,
        vars: &HashMap<String, String>,
        params: &[String],
    ) -> Result<()> {
        let ctx = self.build_exec_context(vars, params);

        let capture = self
            .step
            .output
            .as_ref()
            .map(|_| Arc::new(Mutex::new(Vec::new())));

        let executor = {
            let mut executor = registry.create(&self.step, ctx)?;

            let state = self.lock();
            let mut stdout_writer = OutputWriter::new(state.stdout_log.clone());
            if let Some(buffer) = &capture {
                stdout_writer = stdout_writer.with_capture(Arc::clone(buffer));
            }
            executor.set_stdout(stdout_writer);
            executor.set_stderr(OutputWriter::new(state.stderr_log.clone()));
            drop(state);

            let executor: Arc<dyn Executor> = Arc::from(executor);
            self.lock().executor = Some(Arc::clone(&executor));
            executor
        };

        let result = executor.run().await;
        self.lock().executor = None;

        if result.is_ok() {
            if let (Some(name), Some(buffer)) = (&self.step.output, &capture) {
                let bytes = buffer.lock().expect("capture lock poisoned");
                let text = String::from_utf8_lossy(&bytes);
                let value = text
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or("")
                    .to_string();
                debug!(step = %self.step.name, output = %name, value = %value, "captured output");
                self.lock()
                    .output_variables
                    .insert(name.clone(), format!("{name}={value}"));
            }
        }

        result
    }

    fn build_exec_context(&self, vars: &HashMap<String, String>, params: &[String]) -> ExecContext {
        let command = env::expand(&self.step.command, vars, params);
        let args: Vec<String> = self
            .step
            .args
            .iter()
            .map(|a| env::expand(a, vars, params))
            .collect();
        let dir = self
            .step
            .dir
            .as_ref()
            .map(|d| PathBuf::from(env::expand(&d.to_string_lossy(), vars, params)));

        let script_file = self.lock().script_file.clone();

        let (program, args) = match script_file {
            Some(script) => {
                // The command (if any) acts as the interpreter.
                let interpreter = if command.is_empty() {
                    self.step.shell_command().to_string()
                } else {
                    command
                };
                let mut full = args;
                full.push(script.to_string_lossy().into_owned());
                (interpreter, full)
            }
            None => {
                let shell = self.step.shell_command().to_string();
                let mut cmdline = command;
                for arg in &args {
                    cmdline.push(' ');
                    cmdline.push_str(arg);
                }
                (shell, vec!["-c".to_string(), cmdline])
            }
        };

        let env_pairs: Vec<(String, String)> =
            vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        ExecContext {
            program,
            args,
            dir,
            env: env_pairs,
        }
    }

    /// Close log files and remove the materialised script.
    pub fn teardown(&self) -> Result<()> {
        let mut state = self.lock();
        if state.logs_closed {
            return Err(DagrunError::Teardown(format!(
                "logs for step '{}' already closed",
                self.step.name
            )));
        }
        state.logs_closed = true;
        state.stdout_log = None;
        state.stderr_log = None;

        if let Some(script) = state.script_file.take() {
            if let Err(e) = std::fs::remove_file(&script) {
                warn!(step = %self.step.name, script = ?script, error = %e, "failed to remove script file");
                return Err(DagrunError::Teardown(format!(
                    "removing script {script:?}: {e}"
                )));
            }
        }
        Ok(())
    }

    /// Forward a signal to the running executor, substituting the step's
    /// `signal_on_stop` when allowed. Best-effort.
    pub async fn signal(&self, signal: Signal, allow_override: bool) {
        let actual = if allow_override && self.step.signal_on_stop.is_some() {
            self.step.stop_signal()
        } else {
            signal
        };

        let executor = self.lock().executor.clone();
        if let Some(executor) = executor {
            debug!(step = %self.step.name, signal = %actual, "forwarding signal to executor");
            if let Err(e) = executor.kill(actual).await {
                warn!(step = %self.step.name, error = %e, "failed to signal executor");
            }
        }
    }

    /// Cancel the node: mark it `Cancel` unless already terminal and kill
    /// any running executor with the step's stop signal.
    pub async fn cancel(&self) {
        if !self.status().is_terminal() {
            self.set_status(NodeStatus::Cancel);
        }
        self.signal(self.step.stop_signal(), false).await;
    }
}

fn open_log(path: &Path) -> Result<Arc<Mutex<std::fs::File>>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DagrunError::Setup(format!("creating log parent {parent:?}: {e}")))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| DagrunError::Setup(format!("opening log {path:?}: {e}")))?;
    Ok(Arc::new(Mutex::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_at_tracks_terminal_status() {
        let node = Node::new(Step::new("a", "true"));
        assert!(node.finished_at().is_none());

        node.set_status(NodeStatus::Running);
        assert!(node.finished_at().is_none());

        node.set_status(NodeStatus::Success);
        assert!(node.finished_at().is_some());

        // A retry resets the node to pending and clears the timestamp.
        node.set_status(NodeStatus::None);
        assert!(node.finished_at().is_none());
    }

    #[test]
    fn teardown_twice_is_an_error() {
        let node = Node::new(Step::new("a", "true"));
        let dir = tempfile::tempdir().unwrap();
        node.setup(dir.path(), "req-1").unwrap();

        node.teardown().unwrap();
        assert!(matches!(
            node.teardown(),
            Err(DagrunError::Teardown(_))
        ));
    }

    #[test]
    fn setup_rejects_missing_working_directory() {
        let mut step = Step::new("a", "true");
        step.dir = Some(PathBuf::from("/nonexistent/dagrun/dir"));
        let node = Node::new(step);
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            node.setup(dir.path(), "req-1"),
            Err(DagrunError::Setup(_))
        ));
    }

    #[tokio::test]
    async fn execute_captures_first_non_empty_line() {
        let mut step = Step::new("cap", "printf");
        step.args = vec!["'\\n  hello world  \\nsecond'".to_string()];
        step.output = Some("GREETING".to_string());
        let node = Node::new(step);

        let dir = tempfile::tempdir().unwrap();
        node.setup(dir.path(), "req-1").unwrap();

        let registry = ExecutorRegistry::with_builtins();
        node.execute(&registry, &HashMap::new(), &[]).await.unwrap();
        node.teardown().unwrap();

        let vars = node.output_variables();
        assert_eq!(vars["GREETING"], "GREETING=hello world");
    }

    #[tokio::test]
    async fn execute_runs_materialised_scripts() {
        let mut step = Step::new("scripted", "");
        step.script = Some("#!/bin/sh\necho from-script\n".to_string());
        step.output = Some("OUT".to_string());
        let node = Node::new(step);

        let dir = tempfile::tempdir().unwrap();
        node.setup(dir.path(), "req-2").unwrap();

        let registry = ExecutorRegistry::with_builtins();
        node.execute(&registry, &HashMap::new(), &[]).await.unwrap();
        node.teardown().unwrap();

        assert_eq!(node.output_variables()["OUT"], "OUT=from-script");
    }
}

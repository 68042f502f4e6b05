// src/exec/shell.rs

//! Shell executor: runs a resolved command line as a child process, piping
//! stdout/stderr into the node's log sinks.

use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::dag::Step;
use crate::errors::{DagrunError, Result};

use super::{ExecContext, Executor, OutputWriter, Signal};

/// Default executor: spawns `ctx.program ctx.args...` and waits for it.
///
/// `kill` resolves the child's PID and delivers the signal via the platform
/// `kill(1)` command, so it can run concurrently with `run`.
#[derive(Debug)]
pub struct ShellExecutor {
    step_name: String,
    ctx: ExecContext,
    stdout: Mutex<Option<OutputWriter>>,
    stderr: Mutex<Option<OutputWriter>>,
    pid: Mutex<Option<u32>>,
}

impl ShellExecutor {
    pub fn new(step: &Step, ctx: ExecContext) -> Self {
        Self {
            step_name: step.name.clone(),
            ctx,
            stdout: Mutex::new(None),
            stderr: Mutex::new(None),
            pid: Mutex::new(None),
        }
    }

    fn current_pid(&self) -> Option<u32> {
        *self.pid.lock().expect("pid lock poisoned")
    }
}

/// Copy a child stream into an [`OutputWriter`] until EOF.
async fn pump<R>(mut reader: R, writer: OutputWriter)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => writer.write(&buf[..n]),
        }
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn set_stdout(&mut self, writer: OutputWriter) {
        *self.stdout.lock().expect("stdout lock poisoned") = Some(writer);
    }

    fn set_stderr(&mut self, writer: OutputWriter) {
        *self.stderr.lock().expect("stderr lock poisoned") = Some(writer);
    }

    async fn run(&self) -> Result<()> {
        let mut cmd = Command::new(&self.ctx.program);
        cmd.args(&self.ctx.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.ctx.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.ctx.env {
            cmd.env(key, value);
        }

        debug!(
            step = %self.step_name,
            program = %self.ctx.program,
            "spawning step process"
        );

        let mut child = cmd.spawn().map_err(|e| {
            DagrunError::Other(anyhow::anyhow!(
                "spawning process for step '{}': {e}",
                self.step_name
            ))
        })?;

        *self.pid.lock().expect("pid lock poisoned") = child.id();

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let writer = self
                .stdout
                .lock()
                .expect("stdout lock poisoned")
                .clone()
                .unwrap_or_default();
            pumps.push(tokio::spawn(pump(stdout, writer)));
        }
        if let Some(stderr) = child.stderr.take() {
            let writer = self
                .stderr
                .lock()
                .expect("stderr lock poisoned")
                .clone()
                .unwrap_or_default();
            pumps.push(tokio::spawn(pump(stderr, writer)));
        }

        let status = child.wait().await;

        // Drain the streams before reporting so captured output is complete.
        for handle in pumps {
            let _ = handle.await;
        }
        *self.pid.lock().expect("pid lock poisoned") = None;

        let status = status.map_err(|e| {
            DagrunError::Other(anyhow::anyhow!(
                "waiting for process of step '{}': {e}",
                self.step_name
            ))
        })?;

        if status.success() {
            Ok(())
        } else {
            let code = status.code().unwrap_or(-1);
            Err(DagrunError::Other(anyhow::anyhow!(
                "step '{}' exited with status {code}",
                self.step_name
            )))
        }
    }

    async fn kill(&self, signal: Signal) -> Result<()> {
        let Some(pid) = self.current_pid() else {
            return Ok(());
        };

        debug!(step = %self.step_name, pid, signal = %signal, "signaling step process");

        let result = Command::new("kill")
            .arg("-s")
            .arg(signal.flag())
            .arg(pid.to_string())
            .status()
            .await;

        // The process may already be gone; that is not an error.
        if let Err(e) = result {
            warn!(step = %self.step_name, pid, error = %e, "failed to deliver signal");
        }
        Ok(())
    }
}

// src/exec/mod.rs

//! Pluggable executor abstraction.
//!
//! A step's command runs through an [`Executor`]: the core wires stdout and
//! stderr sinks, calls [`Executor::run`], and may deliver a signal through
//! [`Executor::kill`] concurrently. Implementations are registered by name
//! in an [`ExecutorRegistry`]; a step selects one through
//! `Step.executor.executor_type` (the empty string means `shell`).

pub mod shell;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dag::Step;
use crate::errors::{DagrunError, Result};

pub use shell::ShellExecutor;

/// Signals the core knows how to deliver to a running step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Term,
    Int,
    Hup,
    Kill,
}

impl Signal {
    /// Name understood by `kill(1)` (without the `SIG` prefix).
    pub fn flag(self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Int => "INT",
            Signal::Hup => "HUP",
            Signal::Kill => "KILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.flag())
    }
}

impl FromStr for Signal {
    type Err = DagrunError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_uppercase();
        let name = name.strip_prefix("SIG").unwrap_or(&name);
        match name {
            "TERM" => Ok(Signal::Term),
            "INT" => Ok(Signal::Int),
            "HUP" => Ok(Signal::Hup),
            "KILL" => Ok(Signal::Kill),
            _ => Err(DagrunError::UnknownSignal(s.to_string())),
        }
    }
}

/// Byte cap on in-memory output capture buffers.
pub const OUTPUT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Sink for a child stream: an optional log file plus an optional bounded
/// in-memory capture buffer. Cloneable so the copy task can own one.
#[derive(Clone, Default)]
pub struct OutputWriter {
    file: Option<Arc<Mutex<std::fs::File>>>,
    capture: Option<Arc<Mutex<Vec<u8>>>>,
}

impl OutputWriter {
    pub fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            file,
            capture: None,
        }
    }

    /// Attach a capture buffer; the writer stops appending once the cap is
    /// reached but keeps forwarding to the log file.
    pub fn with_capture(mut self, buffer: Arc<Mutex<Vec<u8>>>) -> Self {
        self.capture = Some(buffer);
        self
    }

    pub fn write(&self, data: &[u8]) {
        use std::io::Write;

        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(data);
            }
        }
        if let Some(capture) = &self.capture {
            if let Ok(mut buf) = capture.lock() {
                let remaining = OUTPUT_CAPTURE_LIMIT.saturating_sub(buf.len());
                let n = remaining.min(data.len());
                buf.extend_from_slice(&data[..n]);
            }
        }
    }
}

impl fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputWriter")
            .field("has_file", &self.file.is_some())
            .field("has_capture", &self.capture.is_some())
            .finish()
    }
}

/// Fully resolved invocation handed to an executor: variable expansion has
/// already been applied by the node.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub program: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Capability set every executor implements.
///
/// Contract:
/// - `run` blocks until the work completes or `kill` fires; returns `Ok` on
///   exit status 0 and an error otherwise. It must not be called twice.
/// - `kill` is safe to call concurrently with `run` and is idempotent; it
///   causes `run` to return promptly with an error.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    fn set_stdout(&mut self, writer: OutputWriter);
    fn set_stderr(&mut self, writer: OutputWriter);
    async fn run(&self) -> Result<()>;
    async fn kill(&self, signal: Signal) -> Result<()>;
}

/// Factory producing an executor for one step attempt.
pub type ExecutorFactory = fn(&Step, ExecContext) -> Result<Box<dyn Executor>>;

/// Registry of executor factories keyed by type name.
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    /// Empty registry, for callers that wire their own executors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `shell` executor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("shell", |step, ctx| {
            Ok(Box::new(ShellExecutor::new(step, ctx)))
        });
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ExecutorFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Instantiate an executor for the step. An empty type selects `shell`.
    pub fn create(&self, step: &Step, ctx: ExecContext) -> Result<Box<dyn Executor>> {
        let name = match step.executor.executor_type.as_str() {
            "" => "shell",
            other => other,
        };
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DagrunError::ExecutorNotFound(name.to_string()))?;
        factory(step, ctx)
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ExecutorRegistry")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_parses_with_and_without_prefix() {
        assert_eq!("SIGTERM".parse::<Signal>().unwrap(), Signal::Term);
        assert_eq!("term".parse::<Signal>().unwrap(), Signal::Term);
        assert_eq!("KILL".parse::<Signal>().unwrap(), Signal::Kill);
        assert!("SIGUSR1".parse::<Signal>().is_err());
    }

    #[test]
    fn unknown_executor_type_is_an_error() {
        let registry = ExecutorRegistry::with_builtins();
        let mut step = Step::new("a", "true");
        step.executor.executor_type = "docker".to_string();

        let err = registry.create(&step, ExecContext::default()).unwrap_err();
        assert!(matches!(err, DagrunError::ExecutorNotFound(name) if name == "docker"));
    }

    #[test]
    fn capture_buffer_is_bounded() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let writer = OutputWriter::new(None).with_capture(Arc::clone(&buf));

        let chunk = vec![b'x'; OUTPUT_CAPTURE_LIMIT];
        writer.write(&chunk);
        writer.write(b"overflow");

        assert_eq!(buf.lock().unwrap().len(), OUTPUT_CAPTURE_LIMIT);
    }
}

// src/errors.rs

//! Crate-wide error type and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DagrunError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cycle detected in DAG: {0}")]
    CycleDetected(String),

    #[error("executor not found: {0}")]
    ExecutorNotFound(String),

    /// A precondition evaluated to something other than its expected value.
    #[error("condition was not met: condition={condition} expected={expected}")]
    ConditionNotMet { condition: String, expected: String },

    #[error("step setup failed: {0}")]
    Setup(String),

    #[error("step teardown failed: {0}")]
    Teardown(String),

    #[error("socket server is requested to shutdown")]
    ServerRequestedShutdown,

    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DagrunError {
    /// Whether this error is the precondition sentinel.
    pub fn is_condition_not_met(&self) -> bool {
        matches!(self, DagrunError::ConditionNotMet { .. })
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagrunError>;

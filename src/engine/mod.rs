// src/engine/mod.rs

//! Execution engine for dagrun.
//!
//! This module ties together:
//! - the status vocabulary shared by nodes, the scheduler and the IPC
//!   snapshot (legacy integer codes preserved on the wire)
//! - scheduler configuration
//! - the concurrent scheduler itself ([`scheduler`])
//! - status snapshots served over the control socket ([`status`])

pub mod scheduler;
pub mod status;

use std::path::PathBuf;
use std::time::Duration;

use crate::dag::Step;
use crate::errors::{DagrunError, Result};

pub use scheduler::Scheduler;
pub use status::{NodeSnapshot, StatusSnapshot};

/// Status of a single node.
///
/// Wire codes are part of the IPC contract: `None=0, Running=1, Error=2,
/// Cancel=3, Success=4, Skipped=6` (5 is unused, kept for compatibility).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    None,
    Running,
    Error,
    Cancel,
    Success,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Error | NodeStatus::Cancel | NodeStatus::Success | NodeStatus::Skipped
        )
    }

    pub fn code(self) -> u8 {
        match self {
            NodeStatus::None => 0,
            NodeStatus::Running => 1,
            NodeStatus::Error => 2,
            NodeStatus::Cancel => 3,
            NodeStatus::Success => 4,
            NodeStatus::Skipped => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(NodeStatus::None),
            1 => Some(NodeStatus::Running),
            2 => Some(NodeStatus::Error),
            3 => Some(NodeStatus::Cancel),
            4 => Some(NodeStatus::Success),
            6 => Some(NodeStatus::Skipped),
            _ => None,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            NodeStatus::None => "not started",
            NodeStatus::Running => "running",
            NodeStatus::Error => "failed",
            NodeStatus::Cancel => "canceled",
            NodeStatus::Success => "finished",
            NodeStatus::Skipped => "skipped",
        }
    }
}

/// Overall status of a DAG run. Shares the node integer space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    None,
    Running,
    Error,
    Cancel,
    Success,
}

impl RunStatus {
    pub fn code(self) -> u8 {
        match self {
            RunStatus::None => 0,
            RunStatus::Running => 1,
            RunStatus::Error => 2,
            RunStatus::Cancel => 3,
            RunStatus::Success => 4,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            RunStatus::None => "not started",
            RunStatus::Running => "running",
            RunStatus::Error => "failed",
            RunStatus::Cancel => "canceled",
            RunStatus::Success => "finished",
        }
    }
}

/// Lifecycle handlers run by the scheduler after the graph completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerOn {
    Success,
    Failure,
    Cancel,
    Exit,
}

impl HandlerOn {
    pub fn name(self) -> &'static str {
        match self {
            HandlerOn::Success => "onSuccess",
            HandlerOn::Failure => "onFailure",
            HandlerOn::Cancel => "onCancel",
            HandlerOn::Exit => "onExit",
        }
    }
}

/// Grace period between a stop request and SIGKILL escalation.
pub const DEFAULT_MAX_CLEANUP_TIME: Duration = Duration::from_secs(60);

/// Scheduler configuration for one DAG run.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of nodes in `Running` at any instant. Must be >= 1.
    pub max_active_runs: usize,
    /// Overall run timeout; `None` means unbounded.
    pub timeout: Option<Duration>,
    /// Delay applied between consecutive step launches.
    pub delay: Option<Duration>,
    /// Grace period before escalating a stop to SIGKILL.
    pub max_cleanup_time: Duration,
    /// Directory receiving per-step log files.
    pub log_dir: PathBuf,
    /// Opaque identifier for this run, stamped into logs and the snapshot.
    pub request_id: String,
    /// Positional parameters exposed to steps as `$1`..`$9`.
    pub params: Vec<String>,
    pub on_success: Option<Step>,
    pub on_failure: Option<Step>,
    pub on_cancel: Option<Step>,
    pub on_exit: Option<Step>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_active_runs: 1,
            timeout: None,
            delay: None,
            max_cleanup_time: DEFAULT_MAX_CLEANUP_TIME,
            log_dir: std::env::temp_dir().join("dagrun-logs"),
            request_id: String::new(),
            params: Vec::new(),
            on_success: None,
            on_failure: None,
            on_cancel: None,
            on_exit: None,
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations under which no step could ever run.
    pub fn validate(&self) -> Result<()> {
        if self.max_active_runs < 1 {
            return Err(DagrunError::Config(
                "max_active_runs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_wire_contract() {
        assert_eq!(NodeStatus::None.code(), 0);
        assert_eq!(NodeStatus::Running.code(), 1);
        assert_eq!(NodeStatus::Error.code(), 2);
        assert_eq!(NodeStatus::Cancel.code(), 3);
        assert_eq!(NodeStatus::Success.code(), 4);
        assert_eq!(NodeStatus::Skipped.code(), 6);
        assert_eq!(NodeStatus::from_code(5), None);
        assert_eq!(NodeStatus::from_code(6), Some(NodeStatus::Skipped));
    }

    #[test]
    fn zero_max_active_runs_is_rejected() {
        let config = SchedulerConfig {
            max_active_runs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

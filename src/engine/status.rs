// src/engine/status.rs

//! JSON status snapshot served over the control socket.
//!
//! Field names and integer codes are wire contract; external clients parse
//! them, so they stay stable even where the in-memory names differ.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{ExecutionGraph, Node};
use crate::engine::{NodeStatus, RunStatus};

/// Timestamp rendering used across the snapshot: `-` when unset.
fn format_time(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

/// Static step description embedded in a node snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "Args")]
    pub args: Vec<String>,
    #[serde(rename = "Depends")]
    pub depends: Vec<String>,
    #[serde(rename = "Output")]
    pub output: String,
}

/// Live view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(rename = "Step")]
    pub step: StepSnapshot,
    #[serde(rename = "Status")]
    pub status: u8,
    #[serde(rename = "StatusText")]
    pub status_text: String,
    #[serde(rename = "StartedAt")]
    pub started_at: String,
    #[serde(rename = "FinishedAt")]
    pub finished_at: String,
    #[serde(rename = "RetryCount")]
    pub retry_count: u32,
    #[serde(rename = "DoneCount")]
    pub done_count: u32,
    #[serde(rename = "Log")]
    pub log: String,
    #[serde(rename = "Error")]
    pub error: String,
}

impl NodeSnapshot {
    pub fn from_node(node: &Node) -> Self {
        let step = node.step();
        Self {
            step: StepSnapshot {
                name: step.name.clone(),
                command: step.command.clone(),
                args: step.args.clone(),
                depends: step.depends.clone(),
                output: step.output.clone().unwrap_or_default(),
            },
            status: node.status().code(),
            status_text: node.status().text().to_string(),
            started_at: format_time(node.started_at()),
            finished_at: format_time(node.finished_at()),
            retry_count: node.retry_count(),
            done_count: node.done_count(),
            log: node
                .stdout_path()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            error: node.error().unwrap_or_default(),
        }
    }

    pub fn node_status(&self) -> Option<NodeStatus> {
        NodeStatus::from_code(self.status)
    }
}

/// Snapshot of a whole run, as served by `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: u8,
    #[serde(rename = "StatusText")]
    pub status_text: String,
    #[serde(rename = "PID")]
    pub pid: i64,
    #[serde(rename = "StartedAt")]
    pub started_at: String,
    #[serde(rename = "FinishedAt")]
    pub finished_at: String,
    #[serde(rename = "Params")]
    pub params: String,
    #[serde(rename = "Nodes")]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(rename = "OnSuccess")]
    pub on_success: Option<NodeSnapshot>,
    #[serde(rename = "OnFailure")]
    pub on_failure: Option<NodeSnapshot>,
    #[serde(rename = "OnCancel")]
    pub on_cancel: Option<NodeSnapshot>,
    #[serde(rename = "OnExit")]
    pub on_exit: Option<NodeSnapshot>,
}

impl StatusSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        name: &str,
        request_id: &str,
        params: &[String],
        run_status: RunStatus,
        graph: &ExecutionGraph,
        on_success: Option<&Node>,
        on_failure: Option<&Node>,
        on_cancel: Option<&Node>,
        on_exit: Option<&Node>,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            name: name.to_string(),
            status: run_status.code(),
            status_text: run_status.text().to_string(),
            pid: std::process::id() as i64,
            started_at: format_time(graph.started_at()),
            finished_at: format_time(graph.finished_at()),
            params: params.join(" "),
            nodes: graph
                .nodes()
                .iter()
                .map(|n| NodeSnapshot::from_node(n))
                .collect(),
            on_success: on_success.map(NodeSnapshot::from_node),
            on_failure: on_failure.map(NodeSnapshot::from_node),
            on_cancel: on_cancel.map(NodeSnapshot::from_node),
            on_exit: on_exit.map(NodeSnapshot::from_node),
        }
    }

    pub fn run_status_code(&self) -> u8 {
        self.status
    }
}

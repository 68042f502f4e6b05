// src/dag/graph.rs

//! Immutable dependency topology over mutable per-node state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::node::Node;
use crate::dag::step::Step;
use crate::engine::NodeStatus;
use crate::errors::{DagrunError, Result};

/// The execution graph: a keyed set of nodes plus the `depends` relation.
///
/// Topology is fixed at construction and safe for concurrent reads; all
/// run-time mutation lives inside the individual [`Node`]s.
pub struct ExecutionGraph {
    /// Nodes in step-declaration order (the launch tie-break order).
    nodes: Vec<Arc<Node>>,
    index: HashMap<String, usize>,
    /// name -> direct successors.
    dependents: HashMap<String, Vec<String>>,
    /// name -> direct predecessors.
    dependencies: HashMap<String, Vec<String>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    last_scheduler_error: Mutex<Option<String>>,
}

impl std::fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGraph")
            .field("nodes", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionGraph {
    /// Build the graph from the full step list.
    ///
    /// Fails on duplicate names, unknown or self dependencies, and cycles.
    pub fn new(steps: Vec<Step>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if step.name.is_empty() {
                return Err(DagrunError::Config("step with empty name".to_string()));
            }
            if index.insert(step.name.clone(), i).is_some() {
                return Err(DagrunError::Config(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for step in &steps {
            dependents.entry(step.name.clone()).or_default();
            let deps = dependencies.entry(step.name.clone()).or_default();
            for dep in &step.depends {
                if dep == &step.name {
                    return Err(DagrunError::Config(format!(
                        "step '{}' cannot depend on itself",
                        step.name
                    )));
                }
                if !index.contains_key(dep) {
                    return Err(DagrunError::Config(format!(
                        "step '{}' has unknown dependency '{}'",
                        step.name, dep
                    )));
                }
                deps.push(dep.clone());
            }
        }
        for step in &steps {
            for dep in &step.depends {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.name.clone());
            }
        }

        detect_cycles(&steps)?;

        let nodes = steps
            .into_iter()
            .map(|step| Arc::new(Node::new(step)))
            .collect();

        Ok(Self {
            nodes,
            index,
            dependents,
            dependencies,
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
            last_scheduler_error: Mutex::new(None),
        })
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Arc<Node>> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Direct successors of a node.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.dependents
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Direct predecessors of a node.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether every node has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.nodes.iter().all(|n| n.status().is_terminal())
    }

    /// Number of nodes in a terminal state.
    pub fn done_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status().is_terminal())
            .count()
    }

    /// Number of nodes currently running.
    pub fn running_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status() == NodeStatus::Running)
            .count()
    }

    /// Record the time the first node started.
    pub fn mark_started(&self) {
        let mut started = self.started_at.lock().expect("graph lock poisoned");
        if started.is_none() {
            *started = Some(Utc::now());
        }
    }

    /// Record the time the run finished.
    pub fn mark_finished(&self) {
        let mut finished = self.finished_at.lock().expect("graph lock poisoned");
        *finished = Some(Utc::now());
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().expect("graph lock poisoned")
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock().expect("graph lock poisoned")
    }

    pub fn record_scheduler_error(&self, message: impl Into<String>) {
        *self
            .last_scheduler_error
            .lock()
            .expect("graph lock poisoned") = Some(message.into());
    }

    pub fn last_scheduler_error(&self) -> Option<String> {
        self.last_scheduler_error
            .lock()
            .expect("graph lock poisoned")
            .clone()
    }
}

/// Cycle check over the `depends` relation.
///
/// Edge direction: dep -> step, so a topological order exists iff the
/// declaration is acyclic.
fn detect_cycles(steps: &[Step]) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for step in steps {
        graph.add_node(step.name.as_str());
    }
    for step in steps {
        for dep in &step.depends {
            graph.add_edge(dep.as_str(), step.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(DagrunError::CycleDetected(format!(
            "involving step '{}'",
            cycle.node_id()
        ))),
    }
}

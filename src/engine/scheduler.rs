// src/engine/scheduler.rs

//! Concurrent scheduler: drives every node of an execution graph to a
//! terminal state under the configured concurrency cap, honoring per-step
//! retry/repeat policies, precondition skips, continuation rules, overall
//! timeout, stop requests and lifecycle handlers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::dag::condition::eval_conditions;
use crate::dag::{env, ExecutionGraph, Node};
use crate::engine::{HandlerOn, NodeStatus, RunStatus, SchedulerConfig};
use crate::errors::{DagrunError, Result};
use crate::exec::{ExecutorRegistry, Signal};

/// Interval at which the selection loop re-examines the graph when no
/// completion event arrives.
const TICK: Duration = Duration::from_millis(100);

/// Completion channel payload: a node that reached a terminal state.
pub type CompletionSender = mpsc::UnboundedSender<Arc<Node>>;

/// Outcome of the readiness check for a pending node.
enum Readiness {
    /// Some predecessor has not reached a terminal state yet.
    Wait,
    /// All predecessors terminal with acceptable outcomes.
    Ready,
    /// An upstream error or cancellation blocks this node forever.
    Cancel,
    /// An upstream skip (without continue-on) propagates as a skip.
    Skip,
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: ExecutorRegistry,
    handlers: HashMap<HandlerOn, Arc<Node>>,
    canceled: AtomicBool,
    timed_out: AtomicBool,
    kill_sent: AtomicBool,
    cancel_tx: watch::Sender<bool>,
    cancel_requested_at: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_registry(config, ExecutorRegistry::with_builtins())
    }

    pub fn with_registry(config: SchedulerConfig, registry: ExecutorRegistry) -> Result<Self> {
        config.validate()?;

        let mut handlers = HashMap::new();
        let pairs = [
            (HandlerOn::Success, config.on_success.clone()),
            (HandlerOn::Failure, config.on_failure.clone()),
            (HandlerOn::Cancel, config.on_cancel.clone()),
            (HandlerOn::Exit, config.on_exit.clone()),
        ];
        for (on, step) in pairs {
            if let Some(mut step) = step {
                // Handler nodes answer to their reserved names.
                step.name = on.name().to_string();
                handlers.insert(on, Arc::new(Node::new(step)));
            }
        }

        let (cancel_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            registry,
            handlers,
            canceled: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            kill_sent: AtomicBool::new(false),
            cancel_tx,
            cancel_requested_at: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn handler_node(&self, on: HandlerOn) -> Option<&Arc<Node>> {
        self.handlers.get(&on)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Drive the graph to completion. Returns when every reachable node has
    /// reached a terminal state and the lifecycle handlers have run.
    ///
    /// Returns `Ok` on success or graceful cancel, and the first node error
    /// when the run terminates in `Error`.
    pub async fn schedule(
        self: Arc<Self>,
        graph: Arc<ExecutionGraph>,
        done_tx: Option<CompletionSender>,
    ) -> Result<()> {
        info!(
            request_id = %self.config.request_id,
            max_active_runs = self.config.max_active_runs,
            steps = graph.nodes().len(),
            "scheduler starting"
        );
        graph.mark_started();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Arc<Node>>();
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut cancel_rx = self.cancel_tx.subscribe();
        let deadline = self.config.timeout.map(|t| Instant::now() + t);

        loop {
            self.maybe_escalate_kill(&graph).await;

            if self.accepting_new_work(&graph) {
                Self::launch_ready(&self, &graph, &event_tx, &mut workers, &done_tx).await;
            } else {
                // Stop request or unhandled failure: pending nodes are
                // finalized as Cancel while running nodes drain.
                for node in graph.nodes() {
                    if node.status() == NodeStatus::None {
                        node.set_status(NodeStatus::Cancel);
                        debug!(step = %node.name(), "pending node canceled");
                        publish(&done_tx, node);
                    }
                }
            }

            if graph.is_finished() {
                break;
            }

            tokio::select! {
                finished = event_rx.recv() => {
                    if let Some(node) = finished {
                        debug!(step = %node.name(), status = ?node.status(), "node reached terminal state");
                        publish(&done_tx, &node);
                    }
                }
                _ = tokio::time::sleep(TICK) => {}
                _ = cancel_rx.changed() => {}
                _ = sleep_until_deadline(deadline), if deadline.is_some() && !self.is_timed_out() => {
                    warn!(timeout = ?self.config.timeout, "run timed out; canceling");
                    self.timed_out.store(true, Ordering::SeqCst);
                    self.cancel(&graph).await;
                }
            }
        }

        // Workers have all reported terminal states; let them finish
        // teardown before running handlers.
        while workers.join_next().await.is_some() {}
        graph.mark_finished();

        self.run_handlers(&graph, &done_tx).await;

        let status = self.final_status(&graph);
        info!(
            request_id = %self.config.request_id,
            status = %status.text(),
            "scheduler finished"
        );

        if status == RunStatus::Error {
            let message = first_error(&graph)
                .or_else(|| graph.last_scheduler_error())
                .unwrap_or_else(|| "run failed".to_string());
            graph.record_scheduler_error(message.clone());
            return Err(DagrunError::Other(anyhow::anyhow!(message)));
        }
        Ok(())
    }

    /// Launch every runnable node, in step-declaration order, up to the
    /// concurrency cap.
    async fn launch_ready(
        scheduler: &Arc<Self>,
        graph: &Arc<ExecutionGraph>,
        event_tx: &mpsc::UnboundedSender<Arc<Node>>,
        workers: &mut JoinSet<()>,
        done_tx: &Option<CompletionSender>,
    ) {
        for node in graph.nodes() {
            if graph.running_count() >= scheduler.config.max_active_runs {
                break;
            }
            if node.status() != NodeStatus::None {
                continue;
            }

            match scheduler.readiness(graph, node) {
                Readiness::Wait => continue,
                Readiness::Cancel => {
                    debug!(step = %node.name(), "upstream outcome cancels this step");
                    node.set_status(NodeStatus::Cancel);
                    publish(done_tx, node);
                    continue;
                }
                Readiness::Skip => {
                    debug!(step = %node.name(), "upstream skip propagates");
                    node.set_status(NodeStatus::Skipped);
                    publish(done_tx, node);
                    continue;
                }
                Readiness::Ready => {}
            }

            // Preconditions run at launch, before any setup.
            if !node.step().preconditions.is_empty() {
                let vars = scheduler.compose_env(graph, Some(node));
                let shell = node.step().shell_command().to_string();
                match eval_conditions(&node.step().preconditions, &shell, &vars).await {
                    Ok(()) => {}
                    Err(err) => {
                        if !err.is_condition_not_met() {
                            warn!(step = %node.name(), error = %err, "precondition evaluation failed");
                        }
                        info!(step = %node.name(), "precondition not met; skipping");
                        node.set_status(NodeStatus::Skipped);
                        publish(done_tx, node);
                        continue;
                    }
                }
            }

            if let Err(err) = node.setup(&scheduler.config.log_dir, &scheduler.config.request_id) {
                error!(step = %node.name(), error = %err, "step setup failed");
                node.set_error(err.to_string());
                node.set_status(NodeStatus::Error);
                publish(done_tx, node);
                continue;
            }

            info!(step = %node.name(), "launching step");
            node.set_status(NodeStatus::Running);

            let worker_scheduler = Arc::clone(scheduler);
            let worker_graph = Arc::clone(graph);
            let worker_node = Arc::clone(node);
            let worker_tx = event_tx.clone();
            workers.spawn(async move {
                worker_scheduler.run_node(&worker_graph, &worker_node).await;
                let _ = worker_tx.send(worker_node);
            });

            if let Some(delay) = scheduler.config.delay {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Execute one node to its terminal state, applying retry and repeat
    /// policies. Runs on the node's worker task.
    async fn run_node(&self, graph: &ExecutionGraph, node: &Arc<Node>) {
        let mut repeated = false;

        loop {
            let vars = self.compose_env(graph, Some(node));
            let result = node
                .execute(&self.registry, &vars, &self.config.params)
                .await;
            node.increment_done_count();

            match result {
                Ok(()) => {
                    let repeat = node.step().repeat_policy;
                    if repeat.repeat && !self.is_canceled() {
                        debug!(step = %node.name(), interval = ?repeat.interval, "repeating step");
                        repeated = true;
                        if self.wait_cancelable(repeat.interval).await {
                            node.set_status(NodeStatus::Cancel);
                            break;
                        }
                        continue;
                    }
                    node.set_status(NodeStatus::Success);
                    break;
                }
                Err(err) => {
                    if self.is_canceled() {
                        node.set_error(err.to_string());
                        node.set_status(NodeStatus::Cancel);
                        break;
                    }

                    // A failure while repeating stops the repetition and
                    // does not consult the retry policy.
                    let retry = node.step().retry_policy;
                    if !repeated && node.retry_count() < retry.limit {
                        node.increment_retry_count();
                        info!(
                            step = %node.name(),
                            retry = node.retry_count(),
                            limit = retry.limit,
                            error = %err,
                            "step failed; retrying"
                        );
                        if self.wait_cancelable(retry.interval).await {
                            node.set_status(NodeStatus::Cancel);
                            break;
                        }
                        continue;
                    }

                    error!(step = %node.name(), error = %err, "step failed");
                    node.set_error(err.to_string());
                    node.set_status(NodeStatus::Error);
                    break;
                }
            }
        }

        if let Err(err) = node.teardown() {
            warn!(step = %node.name(), error = %err, "step teardown failed");
            node.set_error(err.to_string());
            if node.status() == NodeStatus::Success {
                node.set_status(NodeStatus::Error);
            }
        }
    }

    /// Whether the given pending node may start now.
    fn readiness(&self, graph: &ExecutionGraph, node: &Node) -> Readiness {
        let mut ready = Readiness::Ready;
        for dep_name in graph.dependencies_of(node.name()) {
            let Some(dep) = graph.node_by_name(dep_name) else {
                return Readiness::Cancel;
            };
            match dep.status() {
                NodeStatus::Success => {}
                NodeStatus::Error => {
                    if !dep.step().continue_on.failure {
                        return Readiness::Cancel;
                    }
                }
                NodeStatus::Cancel => return Readiness::Cancel,
                NodeStatus::Skipped => {
                    if !dep.step().continue_on.skipped {
                        return Readiness::Skip;
                    }
                }
                NodeStatus::None | NodeStatus::Running => ready = Readiness::Wait,
            }
        }
        ready
    }

    /// New launches stop once a stop was requested or a node failed
    /// without `continue_on.failure` (draining).
    fn accepting_new_work(&self, graph: &ExecutionGraph) -> bool {
        if self.is_canceled() {
            return false;
        }
        !graph
            .nodes()
            .iter()
            .any(|n| n.status() == NodeStatus::Error && !n.step().continue_on.failure)
    }

    /// Compose the environment a node (or handler, when `node` is `None`)
    /// sees: process env, captured predecessor outputs, then the step env.
    fn compose_env(
        &self,
        graph: &ExecutionGraph,
        node: Option<&Arc<Node>>,
    ) -> HashMap<String, String> {
        let mut vars = env::base_env();

        match node {
            Some(node) => {
                // Transitive predecessors, farthest first so closer steps
                // win on conflicts.
                let mut stack: Vec<String> = node.step().depends.clone();
                let mut seen: HashSet<String> = HashSet::new();
                let mut order: Vec<String> = Vec::new();
                while let Some(name) = stack.pop() {
                    if !seen.insert(name.clone()) {
                        continue;
                    }
                    stack.extend(graph.dependencies_of(&name).iter().cloned());
                    order.push(name);
                }
                for name in order.iter().rev() {
                    if let Some(pred) = graph.node_by_name(name) {
                        apply_output_variables(&mut vars, pred);
                    }
                }
                env::apply_step_env(&mut vars, &node.step().env, &self.config.params);
            }
            None => {
                for n in graph.nodes() {
                    apply_output_variables(&mut vars, n);
                }
            }
        }

        vars
    }

    /// Request cancellation: pending nodes finalize as `Cancel`, running
    /// nodes receive their stop signal. A second request escalates to
    /// SIGKILL immediately.
    pub async fn cancel(&self, graph: &ExecutionGraph) {
        if self.canceled.swap(true, Ordering::SeqCst) {
            info!("second stop request; escalating to SIGKILL");
            self.kill_running(graph).await;
            return;
        }

        info!("stop requested; signaling running steps");
        *self
            .cancel_requested_at
            .lock()
            .expect("cancel lock poisoned") = Some(Instant::now());
        self.cancel_tx.send_replace(true);

        for node in graph.nodes() {
            if node.status() == NodeStatus::Running {
                node.signal(Signal::Term, true).await;
            }
        }
    }

    /// Broadcast a signal to every running node.
    pub async fn signal(&self, graph: &ExecutionGraph, signal: Signal, allow_override: bool) {
        info!(signal = %signal, "broadcasting signal to running steps");
        for node in graph.nodes() {
            if node.status() == NodeStatus::Running {
                node.signal(signal, allow_override).await;
            }
        }
    }

    async fn kill_running(&self, graph: &ExecutionGraph) {
        if self.kill_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        for node in graph.nodes() {
            if node.status() == NodeStatus::Running {
                node.signal(Signal::Kill, false).await;
            }
        }
    }

    /// SIGKILL running nodes once the cleanup grace period has elapsed.
    async fn maybe_escalate_kill(&self, graph: &ExecutionGraph) {
        if !self.is_canceled() || self.kill_sent.load(Ordering::SeqCst) {
            return;
        }
        let elapsed = self
            .cancel_requested_at
            .lock()
            .expect("cancel lock poisoned")
            .map(|at| at.elapsed());
        if let Some(elapsed) = elapsed {
            if elapsed >= self.config.max_cleanup_time {
                warn!(?elapsed, "cleanup grace period expired; sending SIGKILL");
                self.kill_running(graph).await;
            }
        }
    }

    /// Run the outcome handler and then `onExit`, each as a regular node.
    async fn run_handlers(&self, graph: &ExecutionGraph, done_tx: &Option<CompletionSender>) {
        let outcome = match self.final_status(graph) {
            RunStatus::Success => HandlerOn::Success,
            RunStatus::Cancel => HandlerOn::Cancel,
            _ => HandlerOn::Failure,
        };

        for on in [outcome, HandlerOn::Exit] {
            if let Some(node) = self.handlers.get(&on).cloned() {
                self.run_handler(graph, on, &node).await;
                publish(done_tx, &node);
            }
        }
    }

    async fn run_handler(&self, graph: &ExecutionGraph, on: HandlerOn, node: &Arc<Node>) {
        info!(handler = on.name(), "running lifecycle handler");

        if !node.step().preconditions.is_empty() {
            let vars = self.compose_env(graph, None);
            let shell = node.step().shell_command().to_string();
            if eval_conditions(&node.step().preconditions, &shell, &vars)
                .await
                .is_err()
            {
                node.set_status(NodeStatus::Skipped);
                return;
            }
        }

        if let Err(err) = node.setup(&self.config.log_dir, &self.config.request_id) {
            error!(handler = on.name(), error = %err, "handler setup failed");
            node.set_error(err.to_string());
            node.set_status(NodeStatus::Error);
            return;
        }

        node.set_status(NodeStatus::Running);
        let vars = self.compose_env(graph, None);
        let result = node
            .execute(&self.registry, &vars, &self.config.params)
            .await;
        node.increment_done_count();

        match result {
            Ok(()) => node.set_status(NodeStatus::Success),
            Err(err) => {
                error!(handler = on.name(), error = %err, "handler failed");
                node.set_error(err.to_string());
                node.set_status(if self.is_canceled() {
                    NodeStatus::Cancel
                } else {
                    NodeStatus::Error
                });
            }
        }

        if let Err(err) = node.teardown() {
            warn!(handler = on.name(), error = %err, "handler teardown failed");
            node.set_error(err.to_string());
        }
    }

    /// Overall status while running (`Running`) or after completion.
    pub fn run_status(&self, graph: &ExecutionGraph) -> RunStatus {
        if graph.started_at().is_none() {
            return RunStatus::None;
        }
        if graph.finished_at().is_none() {
            return RunStatus::Running;
        }
        self.final_status(graph)
    }

    /// Terminal status of the run: timeout and handler failures report
    /// `Error`, an explicit stop reports `Cancel`, otherwise any node error
    /// makes the run `Error`.
    fn final_status(&self, graph: &ExecutionGraph) -> RunStatus {
        let handler_failed = self
            .handlers
            .values()
            .any(|n| n.status() == NodeStatus::Error);
        if self.is_timed_out() || handler_failed {
            return RunStatus::Error;
        }
        if self.is_canceled() {
            return RunStatus::Cancel;
        }
        if graph
            .nodes()
            .iter()
            .any(|n| n.status() == NodeStatus::Error)
        {
            return RunStatus::Error;
        }
        RunStatus::Success
    }

    /// Sleep that resolves early (returning `true`) when a stop arrives.
    async fn wait_cancelable(&self, duration: Duration) -> bool {
        let mut rx = self.cancel_tx.subscribe();
        if *rx.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_canceled(),
            _ = rx.changed() => true,
        }
    }
}

fn publish(done_tx: &Option<CompletionSender>, node: &Arc<Node>) {
    if let Some(tx) = done_tx {
        let _ = tx.send(Arc::clone(node));
    }
}

fn apply_output_variables(vars: &mut HashMap<String, String>, node: &Node) {
    for (name, pair) in node.output_variables() {
        let value = pair
            .split_once('=')
            .map(|(_, v)| v.to_string())
            .unwrap_or(pair);
        vars.insert(name, value);
    }
}

fn first_error(graph: &ExecutionGraph) -> Option<String> {
    graph
        .nodes()
        .iter()
        .find(|n| n.status() == NodeStatus::Error)
        .map(|n| {
            n.error()
                .unwrap_or_else(|| format!("step '{}' failed", n.name()))
        })
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

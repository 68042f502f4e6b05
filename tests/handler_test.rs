mod common;

use crate::common::builders::{fail_step, success_step, test_config, StepBuilder};
use crate::common::init_tracing;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use dagrun::dag::{ExecutionGraph, Node, Step};
use dagrun::engine::{HandlerOn, NodeStatus, RunStatus, Scheduler, SchedulerConfig};

const RUN_DEADLINE: Duration = Duration::from_secs(30);

async fn schedule(
    steps: Vec<Step>,
    config: SchedulerConfig,
) -> (
    Arc<ExecutionGraph>,
    Arc<Scheduler>,
    dagrun::errors::Result<()>,
    Vec<String>,
) {
    init_tracing();

    let graph = Arc::new(ExecutionGraph::new(steps).unwrap());
    let scheduler = Arc::new(Scheduler::new(config).unwrap());
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Arc<Node>>();

    let result = timeout(
        RUN_DEADLINE,
        Arc::clone(&scheduler).schedule(Arc::clone(&graph), Some(done_tx)),
    )
    .await
    .expect("scheduler did not terminate in time");

    let mut completions = Vec::new();
    while let Ok(node) = done_rx.try_recv() {
        completions.push(node.name().to_string());
    }

    (graph, scheduler, result, completions)
}

fn handler_status(scheduler: &Scheduler, on: HandlerOn) -> Option<NodeStatus> {
    scheduler.handler_node(on).map(|n| n.status())
}

#[tokio::test]
async fn on_success_runs_after_a_successful_graph() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("success-marker");

    let config = SchedulerConfig {
        on_success: Some(Step::new(
            "notify",
            &format!("touch {}", marker.display()),
        )),
        on_failure: Some(Step::new("unreachable", "false")),
        ..test_config(dir.path())
    };

    let (graph, scheduler, result, _) = schedule(vec![success_step("1", &[])], config).await;

    assert!(result.is_ok());
    assert_eq!(scheduler.run_status(&graph), RunStatus::Success);
    assert!(marker.exists(), "onSuccess handler should have run");
    assert_eq!(
        handler_status(&scheduler, HandlerOn::Success),
        Some(NodeStatus::Success)
    );
    // The failure handler never ran.
    assert_eq!(
        handler_status(&scheduler, HandlerOn::Failure),
        Some(NodeStatus::None)
    );
}

#[tokio::test]
async fn on_failure_runs_after_a_failed_graph() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("failure-marker");

    let config = SchedulerConfig {
        on_failure: Some(Step::new(
            "notify",
            &format!("touch {}", marker.display()),
        )),
        on_success: Some(Step::new("unreachable", "true")),
        ..test_config(dir.path())
    };

    let (_, scheduler, result, _) = schedule(vec![fail_step("1", &[])], config).await;

    assert!(result.is_err());
    assert!(marker.exists(), "onFailure handler should have run");
    assert_eq!(
        handler_status(&scheduler, HandlerOn::Failure),
        Some(NodeStatus::Success)
    );
    assert_eq!(
        handler_status(&scheduler, HandlerOn::Success),
        Some(NodeStatus::None)
    );
}

#[tokio::test]
async fn on_exit_always_runs_last() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        on_success: Some(Step::new("a", "true")),
        on_exit: Some(Step::new("b", "true")),
        ..test_config(dir.path())
    };

    let (_, scheduler, result, completions) =
        schedule(vec![success_step("1", &[])], config).await;

    assert!(result.is_ok());
    assert_eq!(
        handler_status(&scheduler, HandlerOn::Exit),
        Some(NodeStatus::Success)
    );
    assert_eq!(
        completions.last().map(String::as_str),
        Some("onExit"),
        "onExit must be the last completion event"
    );
}

#[tokio::test]
async fn handler_failure_upgrades_the_run_status() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        on_success: Some(Step::new("broken", "false")),
        ..test_config(dir.path())
    };

    let (graph, scheduler, result, _) = schedule(vec![success_step("1", &[])], config).await;

    assert!(result.is_err(), "handler failure must fail the run");
    assert_eq!(scheduler.run_status(&graph), RunStatus::Error);
    assert_eq!(
        handler_status(&scheduler, HandlerOn::Success),
        Some(NodeStatus::Error)
    );
    // The graph itself stayed green.
    assert_eq!(
        graph.node_by_name("1").unwrap().status(),
        NodeStatus::Success
    );
}

#[tokio::test]
async fn handlers_see_captured_output_variables() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        on_exit: Some(Step::new("check", "test \"${RESULT}\" = \"42\"")),
        ..test_config(dir.path())
    };

    let (_, scheduler, result, _) = schedule(
        vec![StepBuilder::new("compute", "echo 42")
            .output("RESULT")
            .build()],
        config,
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(
        handler_status(&scheduler, HandlerOn::Exit),
        Some(NodeStatus::Success)
    );
}

#[tokio::test]
async fn on_cancel_runs_when_the_run_is_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("cancel-marker");

    let config = SchedulerConfig {
        on_cancel: Some(Step::new(
            "notify",
            &format!("touch {}", marker.display()),
        )),
        ..test_config(dir.path())
    };

    init_tracing();
    let graph = Arc::new(
        ExecutionGraph::new(vec![StepBuilder::new("1", "sleep 100").build()]).unwrap(),
    );
    let scheduler = Arc::new(Scheduler::new(config).unwrap());

    {
        let scheduler = Arc::clone(&scheduler);
        let graph = Arc::clone(&graph);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            scheduler.cancel(&graph).await;
        });
    }

    let result = timeout(
        RUN_DEADLINE,
        Arc::clone(&scheduler).schedule(Arc::clone(&graph), None),
    )
    .await
    .expect("scheduler did not terminate");

    assert!(result.is_ok());
    assert_eq!(scheduler.run_status(&graph), RunStatus::Cancel);
    assert!(marker.exists(), "onCancel handler should have run");
}

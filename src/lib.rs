// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod sock;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::dag::{ExecutionGraph, Step};
use crate::engine::{HandlerOn, RunStatus, Scheduler, SchedulerConfig, StatusSnapshot};
use crate::errors::{DagrunError, Result};
use crate::exec::Signal;
use crate::sock::{HandlerFunc, HttpResponse, SockClient, SockServer};

/// Generate an opaque request ID for one run.
pub fn generate_request_id(dag_name: &str) -> String {
    let seed = format!(
        "{dag_name}:{}:{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    blake3::hash(seed.as_bytes()).to_hex().as_str()[..16].to_string()
}

/// Build the live status snapshot for a run.
pub fn build_snapshot(
    name: &str,
    scheduler: &Scheduler,
    graph: &ExecutionGraph,
) -> StatusSnapshot {
    StatusSnapshot::build(
        name,
        &scheduler.config().request_id,
        &scheduler.config().params,
        scheduler.run_status(graph),
        graph,
        scheduler.handler_node(HandlerOn::Success).map(Arc::as_ref),
        scheduler.handler_node(HandlerOn::Failure).map(Arc::as_ref),
        scheduler.handler_node(HandlerOn::Cancel).map(Arc::as_ref),
        scheduler.handler_node(HandlerOn::Exit).map(Arc::as_ref),
    )
}

/// Control-socket request routing: `GET /status`, `POST /stop`,
/// `POST /signal`. Everything else is 404.
fn control_handler(
    name: String,
    scheduler: Arc<Scheduler>,
    graph: Arc<ExecutionGraph>,
) -> HandlerFunc {
    Arc::new(move |request: sock::HttpRequest| {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/status") => {
                let snapshot = build_snapshot(&name, &scheduler, &graph);
                match serde_json::to_string(&snapshot) {
                    Ok(json) => HttpResponse::json(json),
                    Err(e) => HttpResponse::internal_error(e.to_string()),
                }
            }
            ("POST", "/stop") => {
                // Cancellation is asynchronous; the 200 only acknowledges
                // the request.
                let scheduler = Arc::clone(&scheduler);
                let graph = Arc::clone(&graph);
                tokio::spawn(async move {
                    scheduler.cancel(&graph).await;
                });
                HttpResponse::ok("OK")
            }
            ("POST", "/signal") => match request.body.trim().parse::<Signal>() {
                Ok(signal) => {
                    let scheduler = Arc::clone(&scheduler);
                    let graph = Arc::clone(&graph);
                    tokio::spawn(async move {
                        scheduler.signal(&graph, signal, true).await;
                    });
                    HttpResponse::ok("OK")
                }
                Err(e) => HttpResponse::bad_request(e.to_string()),
            },
            _ => HttpResponse::not_found(),
        }
    })
}

/// Run one DAG to completion.
///
/// Builds the execution graph, binds the per-run control socket, schedules
/// every step to a terminal state, runs lifecycle handlers and returns the
/// final snapshot. A bind or construction failure is an error; a run that
/// terminates in `Error` is reported through the snapshot's status.
pub async fn run_dag(
    name: &str,
    steps: Vec<Step>,
    config: SchedulerConfig,
) -> Result<StatusSnapshot> {
    let graph = Arc::new(ExecutionGraph::new(steps)?);
    let scheduler = Arc::new(Scheduler::new(config)?);

    let socket_path = sock::socket_path(name);
    let handler = control_handler(
        name.to_string(),
        Arc::clone(&scheduler),
        Arc::clone(&graph),
    );
    let server = Arc::new(SockServer::new(socket_path, handler));

    let (ready_tx, ready_rx) = oneshot::channel();
    let server_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(Some(ready_tx)).await })
    };

    // The sender is dropped without firing when bind fails.
    if ready_rx.await.is_err() {
        return match server_task.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) | Err(_) => Err(DagrunError::Other(anyhow::anyhow!(
                "control socket server exited before accepting"
            ))),
        };
    }

    let result = Arc::clone(&scheduler)
        .schedule(Arc::clone(&graph), None)
        .await;
    if let Err(err) = &result {
        debug!(error = %err, "run terminated with error");
    }

    server.shutdown();
    match server_task.await {
        Ok(Err(DagrunError::ServerRequestedShutdown)) | Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "control socket server failed"),
        Err(e) => warn!(error = %e, "control socket task panicked"),
    }

    Ok(build_snapshot(name, &scheduler, &graph))
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - DAG definition loading
/// - the `--status` / `--stop` client paths
/// - graph + scheduler + control socket for an actual run
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.status {
        let client = SockClient::new(sock::socket_path(&cfg.name));
        let body = client.get_status().await?;
        println!("{body}");
        return Ok(());
    }

    if args.stop {
        let client = SockClient::new(sock::socket_path(&cfg.name));
        client.stop().await?;
        info!(dag = %cfg.name, "stop requested");
        return Ok(());
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let request_id = generate_request_id(&cfg.name);
    let mut scheduler_config = cfg.scheduler_config(request_id.clone())?;
    if let Some(params) = &args.params {
        scheduler_config.params = params.split_whitespace().map(str::to_string).collect();
    }

    info!(dag = %cfg.name, request_id = %request_id, "starting run");
    let snapshot = run_dag(&cfg.name, cfg.to_steps()?, scheduler_config).await?;

    for node in &snapshot.nodes {
        info!(
            step = %node.step.name,
            status = %node.status_text,
            error = %node.error,
            "step result"
        );
    }
    info!(dag = %cfg.name, status = %snapshot.status_text, "run finished");

    if snapshot.status == RunStatus::Error.code() {
        return Err(DagrunError::Other(anyhow::anyhow!(
            "run '{}' failed",
            cfg.name
        )));
    }
    Ok(())
}

/// Simple dry-run output: print steps, dependencies and commands.
fn print_dry_run(cfg: &config::ConfigFile) {
    println!("dagrun dry-run: {}", cfg.name);
    println!("  max_active_runs = {}", cfg.max_active_runs());
    println!();

    println!("steps ({}):", cfg.step_configs().len());
    for (name, step) in cfg.step_configs().iter() {
        println!("  - {name}");
        println!("      command: {}", step.command);
        if !step.depends.is_empty() {
            println!("      depends: {:?}", step.depends);
        }
        if let Some(output) = &step.output {
            println!("      output: {output}");
        }
        if let Some(retry) = &step.retry {
            println!(
                "      retry: limit={} interval_ms={}",
                retry.limit, retry.interval_ms
            );
        }
        if step.repeat.is_some() {
            println!("      repeat: true");
        }
    }
}

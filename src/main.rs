// src/main.rs

use clap::Parser;

use dagrun::cli::CliArgs;
use dagrun::errors::DagrunError;
use dagrun::logging;

/// Exit code for a run that executed but terminated in error (or could
/// not reach a running instance for `--status` / `--stop`).
const EXIT_RUN_FAILED: i32 = 1;
/// Exit code for a DAG definition that never became a run.
const EXIT_BAD_DEFINITION: i32 = 2;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    if let Err(err) = logging::init_logging(args.log_level) {
        eprintln!("dagrun: {err}");
        std::process::exit(EXIT_BAD_DEFINITION);
    }

    if let Err(err) = dagrun::run(args).await {
        let code = match &err {
            DagrunError::Config(_)
            | DagrunError::CycleDetected(_)
            | DagrunError::Toml(_)
            | DagrunError::UnknownSignal(_) => EXIT_BAD_DEFINITION,
            _ => EXIT_RUN_FAILED,
        };
        eprintln!("dagrun: {err}");
        std::process::exit(code);
    }
}

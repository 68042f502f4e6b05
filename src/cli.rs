// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `dagrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagrun",
    version,
    about = "Run a DAG of command steps to completion.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the DAG definition file (TOML).
    #[arg(value_name = "CONFIG", default_value = "Dagrun.toml")]
    pub config: String,

    /// Positional parameters exposed to steps as $1..$9
    /// (whitespace-separated).
    #[arg(long, value_name = "PARAMS")]
    pub params: Option<String>,

    /// Query the status of a running instance of this DAG and exit.
    #[arg(long)]
    pub status: bool,

    /// Ask a running instance of this DAG to stop and exit.
    #[arg(long)]
    pub stop: bool,

    /// Parse + validate, print the DAG, but don't execute any steps.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The `tracing` filter directive this level pins globally.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

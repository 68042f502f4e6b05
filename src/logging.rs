// src/logging.rs

//! Logging setup built on `tracing` + `tracing-subscriber`.
//!
//! Scheduler internals log with structured fields (`step`, `request_id`,
//! `handler`, `signal`) and everything goes to stderr, so a step's stdout
//! and stderr redirects stay clean for the commands themselves.
//!
//! Verbosity is resolved as an [`EnvFilter`]:
//! 1. a `--log-level` flag pins a single global level
//! 2. otherwise `DAGRUN_LOG` is parsed as a full filter spec, so targeted
//!    directives like `dagrun::engine=trace,info` work
//! 3. otherwise `info`
//!
//! An unparsable `DAGRUN_LOG` is an error rather than a silent downgrade:
//! a run that was meant to be traced should not quietly lose its logs.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable holding a `tracing` filter spec.
pub const LOG_ENV_VAR: &str = "DAGRUN_LOG";

/// Initialise the global subscriber. Call once, before the first run.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    fmt()
        .with_env_filter(resolve_filter(cli_level)?)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
    Ok(())
}

fn resolve_filter(cli_level: Option<LogLevel>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level.directive()));
    }

    match std::env::var(LOG_ENV_VAR) {
        Ok(spec) if !spec.trim().is_empty() => EnvFilter::try_new(spec.trim())
            .map_err(|e| anyhow!("invalid {LOG_ENV_VAR} filter {spec:?}: {e}")),
        _ => Ok(EnvFilter::new("info")),
    }
}

// src/config/validate.rs

//! Semantic validation of a raw DAG definition.
//!
//! Cycle detection happens later, when the [`crate::dag::ExecutionGraph`]
//! is built; this layer checks everything that can be judged from the file
//! alone.

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{DagrunError, Result};

/// Names reserved for lifecycle handler nodes.
const RESERVED_NAMES: [&str; 4] = ["onSuccess", "onFailure", "onCancel", "onExit"];

pub fn validate_raw_config(raw: &RawConfigFile) -> Result<()> {
    raw.ensure_has_steps()?;
    validate_dag_section(raw)?;
    validate_step_names(raw)?;
    validate_step_dependencies(raw)?;
    Ok(())
}

/// Validate and attach the DAG name (falling back to `fallback_name`).
pub fn into_validated(raw: RawConfigFile, fallback_name: &str) -> Result<ConfigFile> {
    validate_raw_config(&raw)?;
    let name = if raw.dag.name.trim().is_empty() {
        fallback_name.to_string()
    } else {
        raw.dag.name.trim().to_string()
    };
    Ok(ConfigFile::new_unchecked(raw, name))
}

fn validate_dag_section(raw: &RawConfigFile) -> Result<()> {
    if raw.dag.max_active_runs < 1 {
        return Err(DagrunError::Config(
            "[dag].max_active_runs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_step_names(raw: &RawConfigFile) -> Result<()> {
    for name in raw.step.keys() {
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(DagrunError::Config(format!(
                "step name '{name}' is reserved for lifecycle handlers"
            )));
        }
        let has_body = raw
            .step
            .get(name)
            .map(|s| !s.command.is_empty() || s.script.is_some())
            .unwrap_or(false);
        if !has_body {
            return Err(DagrunError::Config(format!(
                "step '{name}' needs a command or a script"
            )));
        }
    }
    Ok(())
}

fn validate_step_dependencies(raw: &RawConfigFile) -> Result<()> {
    for (name, step) in raw.step.iter() {
        for dep in step.depends.iter() {
            if !raw.step.contains_key(dep) {
                return Err(DagrunError::Config(format!(
                    "step '{name}' has unknown dependency '{dep}' in `depends`"
                )));
            }
            if dep == name {
                return Err(DagrunError::Config(format!(
                    "step '{name}' cannot depend on itself"
                )));
            }
        }
    }
    Ok(())
}

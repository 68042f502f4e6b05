// src/dag/condition.rs

//! Precondition evaluation.
//!
//! A condition wrapped in backticks is command substitution: the inner
//! command runs through the step's shell and its trimmed stdout is the
//! value. Anything else is variable-expanded and compared literally.
//! Evaluation failures count as the condition not being met.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::dag::env;
use crate::dag::step::Condition;
use crate::errors::{DagrunError, Result};

/// Evaluate all preconditions in declared order; the first mismatch
/// short-circuits with [`DagrunError::ConditionNotMet`].
pub async fn eval_conditions(
    conditions: &[Condition],
    shell: &str,
    vars: &HashMap<String, String>,
) -> Result<()> {
    for condition in conditions {
        eval_condition(condition, shell, vars).await?;
    }
    Ok(())
}

/// Evaluate a single precondition.
pub async fn eval_condition(
    condition: &Condition,
    shell: &str,
    vars: &HashMap<String, String>,
) -> Result<()> {
    let actual = eval_string(&condition.condition, shell, vars).await?;

    debug!(
        condition = %condition.condition,
        expected = %condition.expected,
        actual = %actual,
        "evaluated precondition"
    );

    if actual == condition.expected {
        Ok(())
    } else {
        Err(not_met(condition))
    }
}

/// Resolve a condition string to its comparison value.
async fn eval_string(
    raw: &str,
    shell: &str,
    vars: &HashMap<String, String>,
) -> Result<String> {
    let trimmed = raw.trim();

    if trimmed.len() >= 2 && trimmed.starts_with('`') && trimmed.ends_with('`') {
        let command = &trimmed[1..trimmed.len() - 1];
        let command = env::expand(command, vars, &[]);
        return run_substitution(&command, shell, vars).await;
    }

    Ok(env::expand(trimmed, vars, &[]))
}

async fn run_substitution(
    command: &str,
    shell: &str,
    vars: &HashMap<String, String>,
) -> Result<String> {
    let output = Command::new(shell)
        .arg("-c")
        .arg(command)
        .envs(vars)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| DagrunError::ConditionNotMet {
            condition: command.to_string(),
            expected: format!("(failed to evaluate: {e})"),
        })?;

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn not_met(condition: &Condition) -> DagrunError {
    DagrunError::ConditionNotMet {
        condition: condition.condition.clone(),
        expected: condition.expected.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_substitution_compares_trimmed_stdout() {
        let cond = Condition::new("`echo 1`", "1");
        assert!(eval_condition(&cond, "sh", &HashMap::new()).await.is_ok());

        let cond = Condition::new("`echo 1`", "0");
        let err = eval_condition(&cond, "sh", &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_condition_not_met());
    }

    #[tokio::test]
    async fn variable_conditions_compare_literally() {
        let mut vars = HashMap::new();
        vars.insert("MODE".to_string(), "prod".to_string());

        let cond = Condition::new("${MODE}", "prod");
        assert!(eval_condition(&cond, "sh", &vars).await.is_ok());

        let cond = Condition::new("${MODE}", "dev");
        assert!(eval_condition(&cond, "sh", &vars)
            .await
            .unwrap_err()
            .is_condition_not_met());
    }

    #[tokio::test]
    async fn first_mismatch_short_circuits() {
        let conditions = vec![
            Condition::new("`echo a`", "a"),
            Condition::new("`echo b`", "nope"),
            Condition::new("`echo c`", "c"),
        ];
        let err = eval_conditions(&conditions, "sh", &HashMap::new())
            .await
            .unwrap_err();
        match err {
            DagrunError::ConditionNotMet { condition, .. } => {
                assert_eq!(condition, "`echo b`")
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

//! Step and scheduler-config builders shared by the integration tests.

use std::time::Duration;

use dagrun::dag::{Condition, RepeatPolicy, RetryPolicy, Step};
use dagrun::engine::SchedulerConfig;

/// Fluent builder over [`Step`] for test DAGs.
pub struct StepBuilder {
    step: Step,
}

impl StepBuilder {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            step: Step::new(name, command),
        }
    }

    pub fn depends(mut self, deps: &[&str]) -> Self {
        self.step.depends = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.step.continue_on.failure = true;
        self
    }

    pub fn continue_on_skipped(mut self) -> Self {
        self.step.continue_on.skipped = true;
        self
    }

    pub fn precondition(mut self, condition: &str, expected: &str) -> Self {
        self.step
            .preconditions
            .push(Condition::new(condition, expected));
        self
    }

    pub fn retry(mut self, limit: u32, interval: Duration) -> Self {
        self.step.retry_policy = RetryPolicy { limit, interval };
        self
    }

    pub fn repeat(mut self, interval: Duration) -> Self {
        self.step.repeat_policy = RepeatPolicy {
            repeat: true,
            interval,
        };
        self
    }

    pub fn output(mut self, name: &str) -> Self {
        self.step.output = Some(name.to_string());
        self
    }

    pub fn build(self) -> Step {
        self.step
    }
}

/// A step that always succeeds.
pub fn success_step(name: &str, deps: &[&str]) -> Step {
    StepBuilder::new(name, "true").depends(deps).build()
}

/// A step that always fails.
pub fn fail_step(name: &str, deps: &[&str]) -> Step {
    StepBuilder::new(name, "false").depends(deps).build()
}

/// Scheduler config writing logs into a scratch directory.
pub fn test_config(log_dir: &std::path::Path) -> SchedulerConfig {
    SchedulerConfig {
        max_active_runs: 4,
        log_dir: log_dir.to_path_buf(),
        request_id: "test-request".to_string(),
        ..Default::default()
    }
}

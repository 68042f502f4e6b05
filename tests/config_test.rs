mod common;

use crate::common::init_tracing;

use std::io::Write;
use std::time::Duration;

use dagrun::config::load_and_validate;
use dagrun::exec::Signal;

fn write_config(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn full_definition_round_trips_into_steps() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "etl.toml",
        r#"
        [dag]
        name = "etl"
        max_active_runs = 2
        timeout_sec = 30
        params = "input.csv fast"

        [handlers.on_failure]
        command = "echo failed"

        [step.extract]
        command = "fetch-data $1"
        output = "DATA_FILE"

        [step.transform]
        command = "transform ${DATA_FILE}"
        depends = ["extract"]
        signal_on_stop = "SIGINT"
        retry = { limit = 2, interval_ms = 500 }
        continue_on = { failure = true }

        [[step.transform.preconditions]]
        condition = "`echo ready`"
        expected = "ready"
        "#,
    );

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.name, "etl");

    let steps = cfg.to_steps().unwrap();
    assert_eq!(steps.len(), 2);

    let extract = steps.iter().find(|s| s.name == "extract").unwrap();
    assert_eq!(extract.output.as_deref(), Some("DATA_FILE"));

    let transform = steps.iter().find(|s| s.name == "transform").unwrap();
    assert_eq!(transform.depends, vec!["extract".to_string()]);
    assert_eq!(transform.signal_on_stop, Some(Signal::Int));
    assert_eq!(transform.retry_policy.limit, 2);
    assert_eq!(transform.retry_policy.interval, Duration::from_millis(500));
    assert!(transform.continue_on.failure);
    assert_eq!(transform.preconditions.len(), 1);

    let scheduler_config = cfg.scheduler_config("req-1".to_string()).unwrap();
    assert_eq!(scheduler_config.max_active_runs, 2);
    assert_eq!(scheduler_config.timeout, Some(Duration::from_secs(30)));
    assert_eq!(
        scheduler_config.params,
        vec!["input.csv".to_string(), "fast".to_string()]
    );
    assert!(scheduler_config.on_failure.is_some());
    assert!(scheduler_config.on_success.is_none());
}

#[test]
fn invalid_definitions_are_rejected() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    // Unknown dependency.
    let path = write_config(
        &dir,
        "bad-dep.toml",
        r#"
        [step.a]
        command = "true"
        depends = ["missing"]
        "#,
    );
    assert!(load_and_validate(&path).is_err());

    // Unknown signal name.
    let path = write_config(
        &dir,
        "bad-signal.toml",
        r#"
        [step.a]
        command = "true"
        signal_on_stop = "SIGUSR9"
        "#,
    );
    let cfg = load_and_validate(&path).unwrap();
    assert!(cfg.to_steps().is_err());

    // Not TOML at all.
    let path = write_config(&dir, "garbage.toml", "{ not toml }");
    assert!(load_and_validate(&path).is_err());
}

#[test]
fn dag_name_falls_back_to_the_file_stem() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "nightly-build.toml",
        r#"
        [step.a]
        command = "true"
        "#,
    );
    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.name, "nightly-build");
}

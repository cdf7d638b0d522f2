//! Observability tests for the envrun run lifecycle.
//!
//! Each test emits one lifecycle event under `#[traced_test]` and checks the
//! captured log carries the structured fields consumers filter on.

use chrono::Utc;
use envrun_core::{
    emit_command_finished, emit_env_finished, emit_env_provision_failed, emit_env_provisioned,
    emit_run_finished, emit_run_started, emit_teardown_error, CommandOutcome, CommandStatus,
    EnvSpan, EnvironmentResult, EnvironmentState, RunReport,
};
use tracing_test::traced_test;
use uuid::Uuid;

fn passed(index: usize, display: &str) -> CommandOutcome {
    CommandOutcome {
        index,
        display: display.to_string(),
        status: CommandStatus::Passed,
        exit_code: Some(0),
        duration_ms: 12,
        stdout: String::new(),
        stderr: String::new(),
        error: None,
    }
}

/// Test: emit_run_started logs the selection and parallelism
#[traced_test]
#[test]
fn test_emit_run_started_logs_environments() {
    emit_run_started("run-123", &["py35", "py36"], 2);

    assert!(logs_contain("run.started"));
    assert!(logs_contain("run-123"));
    assert!(logs_contain("parallel=2"));
}

/// Test: emit_env_provisioned carries the dependency digest
#[traced_test]
#[test]
fn test_emit_env_provisioned_logs_digest() {
    emit_env_provisioned("py36", "abc123", 250);

    assert!(logs_contain("env.provisioned"));
    assert!(logs_contain("abc123"));
}

/// Test: provisioning failures are logged at warn level
#[traced_test]
#[test]
fn test_emit_env_provision_failed_logs_warning() {
    emit_env_provision_failed("py37", &"installer exited with code 1");

    assert!(logs_contain("WARN"));
    assert!(logs_contain("env.provision_failed"));
    assert!(logs_contain("installer exited with code 1"));
}

/// Test: emit_command_finished logs the command and its status
#[traced_test]
#[test]
fn test_emit_command_finished_logs_status() {
    emit_command_finished("py35", &passed(0, "pytest -q"));

    assert!(logs_contain("command.finished"));
    assert!(logs_contain("pytest -q"));
    assert!(logs_contain("Passed"));
}

/// Test: emit_env_finished logs the per-environment counts
#[traced_test]
#[test]
fn test_emit_env_finished_logs_counts() {
    let result = EnvironmentResult {
        name: "py36".to_string(),
        status: EnvironmentState::Failed,
        outcomes: vec![passed(0, "cmd-A"), CommandOutcome::skipped(1, "cmd-B")],
        failure: None,
        duration_ms: 40,
    };
    emit_env_finished(&result);

    assert!(logs_contain("env.finished"));
    assert!(logs_contain("status=failed"));
    assert!(logs_contain("skipped=1"));
}

/// Test: teardown errors are logged at warn level
#[traced_test]
#[test]
fn test_emit_teardown_error_logs_warning() {
    emit_teardown_error("py35", &"permission denied");

    assert!(logs_contain("env.teardown_error"));
    assert!(logs_contain("permission denied"));
}

/// Test: emit_run_finished logs the exit code
#[traced_test]
#[test]
fn test_emit_run_finished_logs_exit_code() {
    let report = RunReport::new(Uuid::new_v4(), Utc::now(), 100, vec![]);
    emit_run_finished(&report);

    assert!(logs_contain("run.finished"));
    assert!(logs_contain("exit_code=0"));
}

/// Test: events inside an EnvSpan are tagged with the environment
#[traced_test]
#[test]
fn test_env_span_tags_nested_events() {
    let _span = EnvSpan::enter("lint");
    tracing::info!("inside span");

    assert!(logs_contain("envrun.env"));
    assert!(logs_contain("lint"));
}

//! Structured observability hooks for the run lifecycle.
//!
//! - `EnvSpan`: RAII guard tagging everything inside one environment's run
//! - `emit_*`: one function per lifecycle event, so field names stay stable
//!
//! Control verbosity with `RUST_LOG`; pass `--json` for JSON lines.

use tracing::{info, warn};

use crate::domain::result::{CommandOutcome, EnvironmentResult, RunReport};

/// Span covering one environment's provisioning, commands and teardown.
///
/// ```ignore
/// let _span = EnvSpan::enter("py36");
/// // every event below carries env = "py36"
/// ```
pub struct EnvSpan {
    _span: tracing::span::EnteredSpan,
}

impl EnvSpan {
    pub fn enter(env: &str) -> Self {
        let span = tracing::info_span!("envrun.env", env = %env);
        Self {
            _span: span.entered(),
        }
    }

    /// The span without entering it, for instrumenting futures.
    pub fn span(env: &str) -> tracing::Span {
        tracing::info_span!("envrun.env", env = %env)
    }
}

pub fn emit_run_started(run_id: &str, environments: &[&str], parallel: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        environments = ?environments,
        parallel = parallel,
    );
}

pub fn emit_env_provisioned(env: &str, digest: &str, duration_ms: u64) {
    info!(
        event = "env.provisioned",
        env = %env,
        digest = %digest,
        duration_ms = duration_ms,
    );
}

/// Provisioning failed; the environment will not run.
pub fn emit_env_provision_failed(env: &str, error: &dyn std::fmt::Display) {
    warn!(event = "env.provision_failed", env = %env, error = %error);
}

pub fn emit_command_finished(env: &str, outcome: &CommandOutcome) {
    info!(
        event = "command.finished",
        env = %env,
        index = outcome.index,
        command = %outcome.display,
        status = ?outcome.status,
        exit_code = ?outcome.exit_code,
        duration_ms = outcome.duration_ms,
    );
}

pub fn emit_env_finished(result: &EnvironmentResult) {
    info!(
        event = "env.finished",
        env = %result.name,
        status = %result.status,
        passed = result.passed_count(),
        failed = result.failed_count(),
        skipped = result.skipped_count(),
        duration_ms = result.duration_ms,
    );
}

/// Teardown failed; the context may be left on disk.
pub fn emit_teardown_error(env: &str, error: &dyn std::fmt::Display) {
    warn!(event = "env.teardown_error", env = %env, error = %error);
}

pub fn emit_run_finished(report: &RunReport) {
    info!(
        event = "run.finished",
        run_id = %report.run_id,
        environments = report.len(),
        exit_code = report.exit_code,
        duration_ms = report.duration_ms,
    );
}

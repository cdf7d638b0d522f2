//! Human-readable and JSON renderings of a [`RunReport`].

use envrun_core::{CommandOutcome, CommandStatus, EnvironmentResult, EnvironmentState, RunReport};
use std::fmt::Write as _;
use std::path::Path;

/// Per-command log lines for one environment, failures with captured output.
pub fn render_environment(result: &EnvironmentResult) -> String {
    let mut out = String::new();
    for outcome in &result.outcomes {
        let _ = writeln!(
            out,
            "{}: commands[{}] `{}` {}",
            result.name,
            outcome.index,
            outcome.display,
            describe_outcome(outcome)
        );
        if !outcome.passed() && !outcome.was_skipped() {
            append_output(&mut out, "stdout", &outcome.stdout);
            append_output(&mut out, "stderr", &outcome.stderr);
        }
    }
    if let (EnvironmentState::ProvisionFailed, Some(failure)) = (result.status, &result.failure) {
        let _ = writeln!(out, "{}: provisioning failed: {failure}", result.name);
    }
    out
}

/// Final summary grouped per environment, ending with an overall verdict.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:_^60}", " summary ");

    let width = report
        .environments
        .iter()
        .map(|env| env.name.len())
        .max()
        .unwrap_or(0);
    for env in &report.environments {
        let mark = if env.succeeded() { '✓' } else { '✗' };
        let _ = write!(
            out,
            "  {mark} {:<width$}  {}",
            env.name,
            env.status.category()
        );
        if env.status != EnvironmentState::Skipped {
            let _ = write!(
                out,
                " ({} passed, {} failed, {} skipped, {:.2}s)",
                env.passed_count(),
                env.failed_count(),
                env.skipped_count(),
                env.duration_ms as f64 / 1000.0
            );
        }
        out.push('\n');
    }

    let failed = report
        .environments
        .iter()
        .filter(|env| !env.succeeded())
        .count();
    if failed == 0 {
        let _ = writeln!(
            out,
            ":) all {} environment(s) succeeded",
            report.len()
        );
    } else {
        let _ = writeln!(
            out,
            ":( {failed} of {} environment(s) did not succeed",
            report.len()
        );
    }
    out
}

/// Write the report as pretty-printed JSON.
pub fn write_json_report(path: &Path, report: &RunReport) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
}

fn describe_outcome(outcome: &CommandOutcome) -> String {
    match outcome.status {
        CommandStatus::Passed => format!("passed ({}ms)", outcome.duration_ms),
        CommandStatus::Failed => match outcome.exit_code {
            Some(code) => format!("failed with exit code {code} ({}ms)", outcome.duration_ms),
            None => format!("terminated by signal ({}ms)", outcome.duration_ms),
        },
        CommandStatus::TimedOut => format!("timed out after {}ms", outcome.duration_ms),
        CommandStatus::Cancelled => "cancelled".to_string(),
        CommandStatus::Skipped => "skipped".to_string(),
        CommandStatus::Error => format!(
            "could not run: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn append_output(out: &mut String, label: &str, text: &str) {
    let text = text.trim_end();
    if text.is_empty() {
        return;
    }
    let _ = writeln!(out, "  --- {label} ---");
    for line in text.lines() {
        let _ = writeln!(out, "  {line}");
    }
}

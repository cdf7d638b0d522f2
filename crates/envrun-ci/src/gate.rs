//! Pass/fail evaluation of a finished run.

use envrun_core::{EnvironmentState, RunReport};
use serde::{Deserialize, Serialize};

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// One line per environment that did not succeed (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// Run gate rules.
pub struct RunGate;

impl RunGate {
    /// Evaluate whether every requested environment succeeded.
    ///
    /// Failed, provision-failed and skipped environments are all violations.
    pub fn evaluate(report: &RunReport) -> GateVerdict {
        let violations: Vec<String> = report
            .environments
            .iter()
            .filter(|env| !env.succeeded())
            .map(|env| {
                let reason = match (env.status, env.failure.as_deref()) {
                    (_, Some(reason)) => reason.to_string(),
                    (EnvironmentState::Skipped, None) => "not started".to_string(),
                    (_, None) => format!("{} command(s) failed", env.failed_count()),
                };
                format!(
                    "Environment '{}' {}: {}",
                    env.name,
                    env.status.category(),
                    reason
                )
            })
            .collect();

        let passed = violations.is_empty();
        let message = if passed {
            format!("All {} environment(s) succeeded", report.len())
        } else {
            format!(
                "{} of {} environment(s) did not succeed",
                violations.len(),
                report.len()
            )
        };

        GateVerdict {
            passed,
            violations,
            message,
        }
    }
}

//! Per-command, per-environment and per-run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::EnvironmentState;

/// How a single declared command ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Exited with code 0.
    Passed,
    /// Exited with a non-zero code.
    Failed,
    /// Killed after exceeding its timeout.
    TimedOut,
    /// Killed because the run was cancelled.
    Cancelled,
    /// Never started.
    Skipped,
    /// Could not be resolved or launched.
    Error,
}

/// Outcome of one command declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandOutcome {
    /// Position in the environment's command list.
    pub index: usize,

    /// Command line as declared (after placeholder expansion when run).
    pub display: String,

    pub status: CommandStatus,

    /// Exit code, when the program exited on its own.
    pub exit_code: Option<i32>,

    pub duration_ms: u64,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,

    /// Runner-level error message, for `Error` outcomes.
    pub error: Option<String>,
}

impl CommandOutcome {
    /// Outcome for a command that never ran.
    pub fn skipped(index: usize, display: impl Into<String>) -> Self {
        Self {
            index,
            display: display.into(),
            status: CommandStatus::Skipped,
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        }
    }

    /// Outcome for a command the runner could not start.
    pub fn errored(index: usize, display: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            index,
            display: display.into(),
            status: CommandStatus::Error,
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == CommandStatus::Passed
    }

    pub fn was_skipped(&self) -> bool {
        self.status == CommandStatus::Skipped
    }
}

/// Result of running one environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentResult {
    pub name: String,

    /// Terminal lifecycle state.
    pub status: EnvironmentState,

    /// One outcome per declared command, in declared order.
    pub outcomes: Vec<CommandOutcome>,

    /// Provisioning or runner error message, if any.
    pub failure: Option<String>,

    pub duration_ms: u64,
}

impl EnvironmentResult {
    /// Result for an environment that never started.
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: EnvironmentState::Skipped,
            outcomes: Vec::new(),
            failure: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == EnvironmentState::Succeeded
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    /// Commands that ran and did not pass.
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.passed() && !o.was_skipped())
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.was_skipped()).count()
    }

    /// Commands that actually started.
    pub fn executed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, CommandStatus::Skipped | CommandStatus::Error))
            .count()
    }
}

/// Aggregated outcome of running a requested set of environments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,

    /// Results in declaration order.
    pub environments: Vec<EnvironmentResult>,

    /// 0 iff every requested environment succeeded, 1 otherwise.
    pub exit_code: i32,
}

impl RunReport {
    /// Assemble a report; the exit code is derived from the results.
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        environments: Vec<EnvironmentResult>,
    ) -> Self {
        let exit_code = if environments.iter().all(EnvironmentResult::succeeded) {
            0
        } else {
            1
        };
        Self {
            run_id,
            started_at,
            duration_ms,
            environments,
            exit_code,
        }
    }

    /// Look up one environment's result.
    pub fn get(&self, name: &str) -> Option<&EnvironmentResult> {
        self.environments.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.environments.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

//! Environment lifecycle state machine.
//!
//! ```text
//! Pending -> Provisioning -> Running -> {Succeeded, Failed}
//!                         -> ProvisionFailed
//! Pending -> Skipped
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::StateError;

/// Lifecycle state of one environment within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentState {
    Pending,
    Provisioning,
    Running,
    Succeeded,
    Failed,
    ProvisionFailed,
    /// Never started because the run was cancelled first.
    Skipped,
}

impl EnvironmentState {
    /// Move to `next`, rejecting edges the lifecycle does not allow.
    pub fn transition(self, next: EnvironmentState) -> Result<EnvironmentState, StateError> {
        use EnvironmentState::*;

        let allowed = matches!(
            (self, next),
            (Pending, Provisioning)
                | (Pending, Skipped)
                | (Provisioning, Running)
                | (Provisioning, ProvisionFailed)
                | (Running, Succeeded)
                | (Running, Failed)
        );

        if allowed {
            Ok(next)
        } else {
            Err(StateError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnvironmentState::Succeeded
                | EnvironmentState::Failed
                | EnvironmentState::ProvisionFailed
                | EnvironmentState::Skipped
        )
    }

    /// Summary category shown to users.
    pub fn category(self) -> &'static str {
        match self {
            EnvironmentState::Succeeded => "succeeded",
            EnvironmentState::Failed => "failed (commands)",
            EnvironmentState::ProvisionFailed => "failed (provisioning/config)",
            EnvironmentState::Skipped => "skipped",
            EnvironmentState::Pending
            | EnvironmentState::Provisioning
            | EnvironmentState::Running => "incomplete",
        }
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentState::Pending => "pending",
            EnvironmentState::Provisioning => "provisioning",
            EnvironmentState::Running => "running",
            EnvironmentState::Succeeded => "succeeded",
            EnvironmentState::Failed => "failed",
            EnvironmentState::ProvisionFailed => "provision_failed",
            EnvironmentState::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

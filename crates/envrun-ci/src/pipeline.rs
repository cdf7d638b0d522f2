//! Sequential execution of one environment's command list.

use crate::runner::{CommandRunner, RunContext};
use envrun_core::{
    emit_command_finished, CommandOutcome, CommandStatus, EnvironmentResult, EnvironmentSpec,
    EnvironmentState, ScopedEnvironment,
};
use std::time::Instant;
use tracing::{info, warn};

/// Runs every command of an environment inside its provisioned context.
#[derive(Clone, Default)]
pub struct EnvironmentRunner {
    runner: CommandRunner,
}

impl EnvironmentRunner {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Execute `spec.commands` in declaration order.
    ///
    /// - Without `continue_on_error` the first non-passing command stops
    ///   the environment; the remaining commands are recorded as skipped.
    /// - With it, every command runs and the environment fails if any did.
    /// - Cancellation always stops the environment.
    ///
    /// The result carries one outcome per declared command.
    pub async fn run_all(
        &self,
        spec: &EnvironmentSpec,
        env: &ScopedEnvironment,
        ctx: &RunContext,
    ) -> EnvironmentResult {
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(spec.commands.len());
        let mut failure: Option<String> = None;
        let mut stopped = false;

        for (index, command) in spec.commands.iter().enumerate() {
            if stopped {
                outcomes.push(CommandOutcome::skipped(index, command.display()));
                continue;
            }
            if ctx.cancel.is_cancelled() {
                info!(env = %spec.name, index, "Run cancelled, skipping remaining commands");
                failure.get_or_insert_with(|| "run cancelled".to_string());
                stopped = true;
                outcomes.push(CommandOutcome::skipped(index, command.display()));
                continue;
            }

            let outcome = match self.runner.run(index, command, spec, env, ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(env = %spec.name, command = %command.display(), error = %e, "Command could not start");
                    CommandOutcome::errored(index, command.display(), e.to_string())
                }
            };
            emit_command_finished(&spec.name, &outcome);

            if !outcome.passed() {
                failure.get_or_insert_with(|| describe_failure(&outcome));
                if outcome.status == CommandStatus::Cancelled || !spec.continue_on_error {
                    stopped = true;
                }
            }
            outcomes.push(outcome);
        }

        let status = if failure.is_none() {
            EnvironmentState::Succeeded
        } else {
            EnvironmentState::Failed
        };

        EnvironmentResult {
            name: spec.name.clone(),
            status,
            outcomes,
            failure,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn describe_failure(outcome: &CommandOutcome) -> String {
    match (outcome.status, outcome.exit_code, &outcome.error) {
        (_, _, Some(error)) => format!("`{}`: {error}", outcome.display),
        (CommandStatus::Failed, Some(code), _) => {
            format!("`{}` exited with code {code}", outcome.display)
        }
        (CommandStatus::Failed, None, _) => {
            format!("`{}` was terminated by a signal", outcome.display)
        }
        (CommandStatus::TimedOut, _, _) => format!("`{}` timed out", outcome.display),
        (CommandStatus::Cancelled, _, _) => format!("`{}` was cancelled", outcome.display),
        (status, _, _) => format!("`{}` ended as {status:?}", outcome.display),
    }
}

//! envrun CI - running environments end to end
//!
//! Provides the execution layers on top of `envrun-core`:
//! - Resolves and runs single commands inside a provisioned context
//! - Runs an environment's command list with fail-fast semantics
//! - Orchestrates many environments, serially or in parallel
//! - Evaluates and renders the resulting run report

pub mod gate;
pub mod orchestrator;
pub mod pipeline;
pub mod reporting;
pub mod runner;

#[cfg(all(test, unix))]
mod testing;

// Re-export key types
pub use gate::{GateVerdict, RunGate};
pub use orchestrator::{Orchestrator, RunOptions, Selection};
pub use pipeline::EnvironmentRunner;
pub use reporting::{render_environment, render_summary, write_json_report};
pub use runner::{
    expand_placeholders, AmbientExecutable, CommandRunner, Executable, ExitOutcome,
    Invocation, IsolatedExecutable, RunContext,
};

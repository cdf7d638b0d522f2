//! Domain models for envrun.
//!
//! - `EnvironmentState`: lifecycle of one environment within a run
//! - `CommandOutcome` / `EnvironmentResult` / `RunReport`: run results
//! - Error taxonomy shared by every layer

pub mod error;
pub mod result;
pub mod state;

pub use error::{CommandError, ConfigError, OrchestrationError, StateError};
pub use result::{CommandOutcome, CommandStatus, EnvironmentResult, RunReport};
pub use state::EnvironmentState;

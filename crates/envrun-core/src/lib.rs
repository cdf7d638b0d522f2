//! envrun Core Library
//!
//! Configuration model, run results, error taxonomy and the ambient
//! plumbing (cancellation, tracing) shared by the runner crates.

pub mod cancel;
pub mod config;
pub mod domain;
pub mod obs;
pub mod telemetry;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};

pub use config::{
    split_command_line, CommandDeclaration, Config, EnvironmentSpec, Settings,
    ALL_ENVIRONMENTS, DEFAULT_CONFIG_FILE,
};

pub use domain::{
    CommandError, CommandOutcome, CommandStatus, ConfigError, EnvironmentResult,
    EnvironmentState, OrchestrationError, RunReport, StateError,
};

pub use env_provisioner::{
    CommandInstaller, DependencySource, Installer, ProvisionError, Provisioner,
    ProvisionerConfig, ScopedEnvironment,
};

pub use obs::{
    emit_command_finished, emit_env_finished, emit_env_provision_failed, emit_env_provisioned,
    emit_run_finished, emit_run_started, emit_teardown_error, EnvSpan,
};
pub use telemetry::{init_tracing, level_for};

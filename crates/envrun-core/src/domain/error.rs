//! Error taxonomy for envrun.
//!
//! - [`ConfigError`]: malformed or ambiguous declarations, fatal before
//!   anything executes.
//! - [`OrchestrationError`]: the request cannot be resolved against the
//!   configuration, fatal before anything is provisioned.
//! - [`CommandError`]: a declared command could not be resolved or launched,
//!   scoped to one environment.
//! - [`StateError`]: an illegal environment lifecycle transition.
//!
//! Provisioning failures are `env_provisioner::ProvisionError`. Non-zero exit
//! codes are outcome data, never errors.

use std::path::PathBuf;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    MalformedSyntax(String),

    #[error("environment '{0}' is declared more than once")]
    DuplicateEnvironment(String),

    #[error("environment '{env}': command `{command}` requires '{reference}', which no dependency source declares")]
    UnknownReference {
        env: String,
        command: String,
        reference: String,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("cannot read configuration {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that abort a run before any environment starts.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("invalid run options: {0}")]
    InvalidOptions(String),
}

/// Runner-level command failures (resolution or launch, never exit codes).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("executable '{program}' not found: {hint}")]
    ExecutableNotFound { program: String, hint: String },

    #[error("failed to launch '{program}': {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("command has no program")]
    EmptyCommand,
}

/// Illegal lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("invalid environment state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

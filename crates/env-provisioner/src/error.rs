//! Error types for env-provisioner

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while provisioning an isolated environment
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A dependency declaration could not be understood
    #[error("invalid dependency source: '{0}'")]
    InvalidSource(String),

    /// The install command exited with a code outside the accepted set
    #[error("failed to install '{dependency}' into environment '{env}' (exit code {exit_code})")]
    DependencyInstallFailed {
        env: String,
        dependency: String,
        exit_code: i32,
        stderr: String,
    },

    /// The install command could not be launched at all
    #[error("installer '{program}' could not be started: {reason}")]
    InstallerUnavailable { program: String, reason: String },

    /// No install command configured
    #[error("install command is empty")]
    EmptyInstallCommand,

    /// Filesystem failure while building or destroying a context
    #[error("environment context error at {path:?}: {source}")]
    Context {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metadata (de)serialization failed
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl ProvisionError {
    pub(crate) fn context(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Context {
            path: path.into(),
            source,
        }
    }
}

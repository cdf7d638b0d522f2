//! env-provisioner: isolated execution contexts for envrun
//!
//! Materializes one isolated context per environment identifier, installs
//! the environment's dependency sources into it in declared order through an
//! [`Installer`], and hands it out as a [`ScopedEnvironment`] that is torn
//! down on every exit path.
//!
//! ## Layer 1 - Environment Provisioning
//!
//! Focus: clean, reproducible contexts and safe concurrent access per
//! identifier.

pub mod context;
pub mod error;
pub mod installer;
pub mod lock;
pub mod source;

pub use context::{
    EnvMetadata, ProvisionRequest, Provisioner, ProvisionerConfig, ScopedEnvironment,
    METADATA_FILE,
};
pub use error::ProvisionError;
pub use installer::{
    CommandInstaller, InstallOutcome, InstallTarget, Installer, DEFAULT_INSTALL_COMMAND,
};
pub use lock::{ContextGuard, ContextLocks};
pub use source::{dependency_digest, normalize_package_name, resolve_sources, DependencySource};

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

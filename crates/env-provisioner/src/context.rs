//! Provisioning and scoped teardown of isolated execution contexts
//!
//! Layout of a context:
//!
//! ```text
//! <work_dir>/<name>/
//!     bin/                 executables installed for the environment
//!     tmp/                 scratch space handed to commands
//!     .envrun-env.json     provisioning metadata
//! ```

use crate::error::ProvisionError;
use crate::installer::{InstallTarget, Installer};
use crate::lock::{ContextGuard, ContextLocks};
use crate::source::{dependency_digest, resolve_sources, DependencySource};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the metadata file written into every provisioned context
pub const METADATA_FILE: &str = ".envrun-env.json";

/// Settings shared by every context a provisioner builds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Directory holding all contexts
    pub work_dir: PathBuf,
    /// Project root; manifests and installers resolve against it
    pub root: PathBuf,
    /// Leave contexts on disk after teardown
    pub keep_envs: bool,
    /// Installer exit codes treated as success
    pub install_ok_codes: Vec<i32>,
}

impl ProvisionerConfig {
    /// Config rooted at `root` with contexts under `root/.envrun`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            work_dir: root.join(".envrun"),
            root,
            keep_envs: false,
            install_ok_codes: vec![0],
        }
    }
}

/// What to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub name: String,
    pub deps: Vec<DependencySource>,
}

/// Metadata recorded after a successful provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvMetadata {
    pub name: String,
    /// SHA-256 of the resolved sources
    pub digest: String,
    pub sources: Vec<DependencySource>,
    pub created_at: DateTime<Utc>,
}

impl EnvMetadata {
    /// Read the metadata of an existing context.
    pub fn read(env_dir: &Path) -> Result<Self> {
        let path = env_dir.join(METADATA_FILE);
        let content = std::fs::read(&path).map_err(|e| ProvisionError::context(&path, e))?;
        Ok(serde_json::from_slice(&content)?)
    }
}

/// Builds isolated contexts and hands them out as [`ScopedEnvironment`]s.
#[derive(Clone)]
pub struct Provisioner {
    config: ProvisionerConfig,
    installer: Arc<dyn Installer>,
    locks: ContextLocks,
}

impl Provisioner {
    /// Provisioner sharing the process-wide lock registry.
    pub fn new(config: ProvisionerConfig, installer: Arc<dyn Installer>) -> Self {
        Self::with_locks(config, installer, ContextLocks::global())
    }

    /// Provisioner with an explicit lock registry.
    pub fn with_locks(
        config: ProvisionerConfig,
        installer: Arc<dyn Installer>,
        locks: ContextLocks,
    ) -> Self {
        Self {
            config,
            installer,
            locks,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Directory a given environment's context lives in.
    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.config.work_dir.join(name)
    }

    /// Build a fresh context for `request`.
    ///
    /// Any context left behind by an earlier run is destroyed first. On
    /// failure the partially built context is destroyed before the error
    /// is returned.
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<ScopedEnvironment> {
        let guard = self.locks.acquire(&request.name).await;

        let resolved = resolve_sources(&request.deps);
        let metadata = EnvMetadata {
            name: request.name.clone(),
            digest: dependency_digest(&resolved),
            sources: resolved,
            created_at: Utc::now(),
        };

        // Owns the directory from here on, so every exit path removes it.
        let mut scoped = ScopedEnvironment {
            name: request.name.clone(),
            dir: self.env_dir(&request.name),
            root: self.config.root.clone(),
            keep: self.config.keep_envs,
            metadata,
            ready: false,
            torn_down: false,
            _guard: guard,
        };

        let built = match prepare_layout(&scoped).await {
            Ok(()) => self.install_all(&scoped).await,
            Err(err) => Err(err),
        };

        match built {
            Ok(()) => {
                scoped.ready = true;
                info!(
                    env = %scoped.name,
                    digest = %&scoped.metadata.digest[..12],
                    sources = scoped.metadata.sources.len(),
                    "Environment provisioned"
                );
                Ok(scoped)
            }
            Err(err) => {
                warn!(env = %scoped.name, error = %err, "Provisioning failed, discarding context");
                if let Err(cleanup) = scoped.discard().await {
                    warn!(error = %cleanup, "Failed to discard partial context");
                }
                Err(err)
            }
        }
    }

    async fn install_all(&self, scoped: &ScopedEnvironment) -> Result<()> {
        let target = InstallTarget {
            env_name: &scoped.name,
            env_dir: &scoped.dir,
            root: &scoped.root,
        };

        for source in &scoped.metadata.sources {
            debug!(env = %scoped.name, source = %source, "Installing");
            let outcome = self.installer.install(source, target).await?;
            if !self.config.install_ok_codes.contains(&outcome.exit_code) {
                return Err(ProvisionError::DependencyInstallFailed {
                    env: scoped.name.clone(),
                    dependency: source.to_string(),
                    exit_code: outcome.exit_code,
                    stderr: outcome.stderr,
                });
            }
        }

        let path = scoped.dir.join(METADATA_FILE);
        let body = serde_json::to_vec_pretty(&scoped.metadata)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ProvisionError::context(&path, e))
    }
}

/// An isolated context that is released on every exit path.
///
/// Call [`ScopedEnvironment::teardown`] when done. If the value is dropped
/// without teardown (panic, cancellation, early return) the context is
/// removed synchronously in `Drop`. The identifier's lock is held until the
/// value is gone.
#[derive(Debug)]
pub struct ScopedEnvironment {
    name: String,
    dir: PathBuf,
    root: PathBuf,
    keep: bool,
    metadata: EnvMetadata,
    /// Set once every dependency is installed; `keep` only applies after that
    ready: bool,
    torn_down: bool,
    _guard: ContextGuard,
}

impl ScopedEnvironment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root of the isolated context.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory searched for in-context executables.
    pub fn bin_dir(&self) -> PathBuf {
        self.dir.join("bin")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.dir.join("tmp")
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &EnvMetadata {
        &self.metadata
    }

    /// Release the context (removing it unless `keep_envs` is set).
    pub async fn teardown(mut self) -> Result<()> {
        if !self.keep {
            remove_context(&self.dir).await?;
            debug!(env = %self.name, "Context removed");
        }
        self.torn_down = true;
        Ok(())
    }

    /// Remove the context regardless of `keep_envs`.
    async fn discard(mut self) -> Result<()> {
        remove_context(&self.dir).await?;
        self.torn_down = true;
        Ok(())
    }
}

impl Drop for ScopedEnvironment {
    fn drop(&mut self) {
        if self.torn_down || (self.keep && self.ready) {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(env = %self.name, "Context removed on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(env = %self.name, error = %e, "Failed to remove context on drop"),
        }
    }
}

/// Replace any stale context with an empty `bin/` and `tmp/` layout.
async fn prepare_layout(scoped: &ScopedEnvironment) -> Result<()> {
    if tokio::fs::try_exists(&scoped.dir).await.unwrap_or(false) {
        debug!(env = %scoped.name, path = ?scoped.dir, "Removing stale context");
        remove_context(&scoped.dir).await?;
    }
    for sub in ["bin", "tmp"] {
        let path = scoped.dir.join(sub);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| ProvisionError::context(&path, e))?;
    }
    Ok(())
}

async fn remove_context(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProvisionError::context(dir, e)),
    }
}

//! Dependency installation capability
//!
//! The provisioner never knows how a packaging ecosystem installs things.
//! It hands each resolved source to an [`Installer`], which reports an exit
//! code. [`CommandInstaller`] shells out to a configured install command.

use crate::error::ProvisionError;
use crate::source::DependencySource;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Install command used when the configuration does not name one
pub const DEFAULT_INSTALL_COMMAND: &[&str] = &[
    "python", "-m", "pip", "install", "--prefix", "{envdir}", "{source}",
];

/// Where a source is being installed
#[derive(Debug, Clone, Copy)]
pub struct InstallTarget<'a> {
    /// Environment identifier
    pub env_name: &'a str,
    /// Root of the isolated context
    pub env_dir: &'a Path,
    /// Project root (manifest paths are relative to it)
    pub root: &'a Path,
}

/// Result of one installation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Installs one dependency source into an isolated context.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install `source`; a non-zero exit code is returned, not raised.
    async fn install(
        &self,
        source: &DependencySource,
        target: InstallTarget<'_>,
    ) -> Result<InstallOutcome>;
}

/// Installer that runs an external install command per source.
///
/// Placeholders: `{source}` (as a whole argument, expands to the source's
/// install arguments), `{envdir}`, `{envname}` and `{root}` (substituted
/// anywhere in an argument).
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    command: Vec<String>,
}

impl Default for CommandInstaller {
    fn default() -> Self {
        Self {
            command: DEFAULT_INSTALL_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CommandInstaller {
    /// Create an installer from an explicit command template.
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(ProvisionError::EmptyInstallCommand);
        }
        Ok(Self { command })
    }

    /// The command template.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Expand the template for one source.
    pub fn expand(&self, source: &DependencySource, target: InstallTarget<'_>) -> Vec<String> {
        let env_dir = target.env_dir.to_string_lossy();
        let root = target.root.to_string_lossy();

        let mut argv = Vec::with_capacity(self.command.len() + 1);
        for arg in &self.command {
            if arg == "{source}" {
                argv.extend(source.install_args(target.root));
                continue;
            }
            argv.push(
                arg.replace("{envdir}", &env_dir)
                    .replace("{envname}", target.env_name)
                    .replace("{root}", &root),
            );
        }
        argv
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(
        &self,
        source: &DependencySource,
        target: InstallTarget<'_>,
    ) -> Result<InstallOutcome> {
        let argv = self.expand(source, target);
        let (program, args) = argv.split_first().ok_or(ProvisionError::EmptyInstallCommand)?;

        debug!(env = %target.env_name, command = ?argv, "Installing dependency");

        let output = Command::new(program)
            .args(args)
            .current_dir(target.root)
            .env("ENVRUN_ENV_DIR", target.env_dir)
            .env("ENVRUN_ENV_NAME", target.env_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProvisionError::InstallerUnavailable {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        Ok(InstallOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target<'a>(env_dir: &'a Path, root: &'a Path) -> InstallTarget<'a> {
        InstallTarget {
            env_name: "py36",
            env_dir,
            root,
        }
    }

    #[test]
    fn test_empty_install_command_rejected() {
        assert!(matches!(
            CommandInstaller::new(vec![]),
            Err(ProvisionError::EmptyInstallCommand)
        ));
    }

    #[test]
    fn test_expand_package_source() {
        let installer = CommandInstaller::default();
        let source = DependencySource::parse("pytest>=7").unwrap();
        let env_dir = PathBuf::from("/work/.envrun/py36");
        let root = PathBuf::from("/work");

        let argv = installer.expand(&source, target(&env_dir, &root));
        assert_eq!(
            argv,
            vec!["python", "-m", "pip", "install", "--prefix", "/work/.envrun/py36", "pytest>=7"]
        );
    }

    #[test]
    fn test_expand_manifest_source_splices_arguments() {
        let installer = CommandInstaller::new(vec![
            "installer".to_string(),
            "--into={envdir}/{envname}".to_string(),
            "{source}".to_string(),
        ])
        .unwrap();
        let source = DependencySource::parse("-r requirements.txt").unwrap();
        let env_dir = PathBuf::from("/e");
        let root = PathBuf::from("/p");

        let argv = installer.expand(&source, target(&env_dir, &root));
        assert_eq!(argv, vec!["installer", "--into=/e/py36", "-r", "/p/requirements.txt"]);
    }

    #[tokio::test]
    async fn test_missing_installer_program_is_unavailable() {
        let installer =
            CommandInstaller::new(vec!["envrun-no-such-installer-xyz".to_string(), "{source}".to_string()])
                .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let source = DependencySource::parse("pytest").unwrap();

        let err = installer
            .install(&source, target(dir.path(), dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InstallerUnavailable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_installer_exit_is_reported() {
        let installer = CommandInstaller::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo broken >&2; exit 3".to_string(),
        ])
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let source = DependencySource::parse("pytest").unwrap();

        let outcome = installer
            .install(&source, target(dir.path(), dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.stderr.contains("broken"));
    }
}

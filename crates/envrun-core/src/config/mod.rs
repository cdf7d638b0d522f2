//! Configuration model.
//!
//! Loads the TOML configuration file, resolves the `[default]` base into
//! every `[[env]]` table (see [`merge`]) and validates the result. The
//! resulting [`Config`] is immutable for the whole run.

pub mod command;
pub mod merge;
mod raw;

use env_provisioner::{DependencySource, ProvisionRequest, DEFAULT_INSTALL_COMMAND};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

pub use command::{split_command_line, CommandDeclaration};

use crate::domain::error::ConfigError;
use raw::{RawConfig, RawSettings};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "envrun.toml";

/// Reserved selection keyword meaning "every declared environment".
pub const ALL_ENVIRONMENTS: &str = "ALL";

/// Global settings from the `[settings]` table.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding isolated contexts (absolute).
    pub work_dir: PathBuf,

    /// Default selection when none is requested.
    pub envlist: Option<Vec<String>>,

    /// Maximum environments run at once (1 = serial).
    pub parallel: usize,

    /// Leave contexts on disk after teardown.
    pub keep_envs: bool,

    /// Install command template.
    pub install_command: Vec<String>,

    /// Installer exit codes treated as success.
    pub install_ok_codes: Vec<i32>,
}

/// One fully merged environment declaration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: String,
    pub description: Option<String>,
    pub deps: Vec<DependencySource>,
    pub commands: Vec<CommandDeclaration>,
    pub allowlist_externals: Vec<String>,
    pub setenv: BTreeMap<String, String>,
    /// Working directory for commands, relative to the project root.
    pub change_dir: Option<PathBuf>,
    pub continue_on_error: bool,
    /// Per-command timeout in seconds, 0 for none.
    pub timeout_secs: u64,
}

impl EnvironmentSpec {
    /// Environment with no commands; nothing to provision or run.
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }

    /// Request for the provisioner.
    pub fn provision_request(&self) -> ProvisionRequest {
        ProvisionRequest {
            name: self.name.clone(),
            deps: self.deps.clone(),
        }
    }
}

/// Parsed, merged and validated configuration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Config {
    root: PathBuf,
    settings: Settings,
    environments: Vec<EnvironmentSpec>,
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("identifier pattern is valid"))
}

impl Config {
    /// Read and parse a configuration file; its directory becomes the root.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        debug!(path = ?path, root = ?root, "Loading configuration");
        Self::parse(&raw, &root)
    }

    /// Parse configuration text rooted at `root`.
    pub fn parse(raw: &str, root: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(raw).map_err(|e| ConfigError::MalformedSyntax(e.to_string()))?;

        let settings = resolve_settings(raw.settings, root)?;

        // Pass one: the shared base.
        let base = merge::resolve_base(raw.default)?;

        // Pass two: every named environment over the base.
        let mut seen = HashSet::new();
        let mut environments = Vec::with_capacity(raw.env.len());
        for (position, mut env) in raw.env.into_iter().enumerate() {
            let name = env.name.take().ok_or_else(|| {
                ConfigError::invalid(format!("env[{position}].name"), "missing environment name")
            })?;
            validate_identifier(&name)?;
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateEnvironment(name));
            }
            environments.push(merge::merge_environment(&base, name, env)?);
        }

        if let Some(envlist) = &settings.envlist {
            for name in envlist {
                if !seen.contains(name) {
                    return Err(ConfigError::invalid(
                        "settings.envlist",
                        format!("'{name}' is not a declared environment"),
                    ));
                }
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            settings,
            environments,
        })
    }

    /// Project root; relative paths resolve against it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// All environments in declaration order.
    pub fn environments(&self) -> &[EnvironmentSpec] {
        &self.environments
    }

    pub fn get(&self, name: &str) -> Option<&EnvironmentSpec> {
        self.environments.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.environments.iter().map(|e| e.name.as_str())
    }

    /// Environments selected when the caller names none.
    pub fn default_selection(&self) -> Vec<&str> {
        match &self.settings.envlist {
            Some(list) => list.iter().map(String::as_str).collect(),
            None => self.names().collect(),
        }
    }
}

fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    if name == ALL_ENVIRONMENTS {
        return Err(ConfigError::invalid(
            "env.name",
            format!("'{ALL_ENVIRONMENTS}' is reserved"),
        ));
    }
    if !identifier_pattern().is_match(name) {
        return Err(ConfigError::invalid(
            "env.name",
            format!("'{name}' must match [A-Za-z0-9][A-Za-z0-9._-]*"),
        ));
    }
    Ok(())
}

fn resolve_settings(raw: RawSettings, root: &Path) -> Result<Settings, ConfigError> {
    let parallel = raw.parallel.unwrap_or(1);
    if parallel == 0 {
        return Err(ConfigError::invalid("settings.parallel", "must be at least 1"));
    }

    let install_command = raw.install_command.unwrap_or_else(|| {
        DEFAULT_INSTALL_COMMAND.iter().map(|s| s.to_string()).collect()
    });
    if install_command.is_empty() {
        return Err(ConfigError::invalid("settings.install_command", "must not be empty"));
    }

    let install_ok_codes = raw.install_ok_codes.unwrap_or_else(|| vec![0]);
    if install_ok_codes.is_empty() {
        return Err(ConfigError::invalid("settings.install_ok_codes", "must not be empty"));
    }

    let work_dir = root.join(raw.work_dir.unwrap_or_else(|| PathBuf::from(".envrun")));

    Ok(Settings {
        work_dir,
        envlist: raw.envlist,
        parallel,
        keep_envs: raw.keep_envs.unwrap_or(false),
        install_command,
        install_ok_codes,
    })
}

//! Serde shapes of the configuration file, before merging and validation.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConfig {
    #[serde(default)]
    pub settings: RawSettings,

    #[serde(default)]
    pub default: RawEnv,

    #[serde(default)]
    pub env: Vec<RawEnv>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawSettings {
    pub work_dir: Option<PathBuf>,
    pub envlist: Option<Vec<String>>,
    pub parallel: Option<usize>,
    pub keep_envs: Option<bool>,
    pub install_command: Option<Vec<String>>,
    pub install_ok_codes: Option<Vec<i32>>,
}

/// One environment table, or the `[default]` base table.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawEnv {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub commands: Vec<RawCommand>,
    #[serde(default)]
    pub allowlist_externals: Vec<String>,
    #[serde(default)]
    pub setenv: BTreeMap<String, String>,
    pub change_dir: Option<PathBuf>,
    pub continue_on_error: Option<bool>,
    pub timeout_secs: Option<u64>,
}

/// A command written as a line, an argv array, or a detailed table.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawCommand {
    Line(String),
    Argv(Vec<String>),
    Detailed(RawCommandTable),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawCommandTable {
    pub run: RawRun,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub requires: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawRun {
    Line(String),
    Argv(Vec<String>),
}

//! Two-pass resolution of the `[default]` base and named environments.
//!
//! Pass one resolves the base table against built-in defaults. Pass two
//! merges every `[[env]]` table over the resolved base:
//!
//! | field | rule |
//! |---|---|
//! | `description`, `change_dir`, `continue_on_error`, `timeout_secs` | replace |
//! | `deps`, `commands`, `allowlist_externals` | append, base first |
//! | `setenv` | per key, environment wins |
//!
//! External flags and command requirements are checked only after merging,
//! so a base allow-list covers environment commands and vice versa.

use env_provisioner::{normalize_package_name, DependencySource};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::command::{split_command_line, CommandDeclaration};
use super::raw::{RawCommand, RawEnv, RawRun};
use super::EnvironmentSpec;
use crate::domain::error::ConfigError;

/// Allow-list entry admitting every program.
pub const ALLOW_ALL: &str = "*";

/// Parsed fields of one table, before merging.
#[derive(Debug, Default)]
struct Layer {
    description: Option<String>,
    deps: Vec<DependencySource>,
    commands: Vec<CommandDeclaration>,
    allowlist_externals: Vec<String>,
    setenv: BTreeMap<String, String>,
    change_dir: Option<PathBuf>,
    continue_on_error: Option<bool>,
    timeout_secs: Option<u64>,
}

/// The `[default]` table with built-in defaults applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct BaseSpec {
    description: Option<String>,
    deps: Vec<DependencySource>,
    commands: Vec<CommandDeclaration>,
    allowlist_externals: Vec<String>,
    setenv: BTreeMap<String, String>,
    change_dir: Option<PathBuf>,
    continue_on_error: bool,
    timeout_secs: u64,
}

/// Pass one.
pub(crate) fn resolve_base(raw: RawEnv) -> Result<BaseSpec, ConfigError> {
    if raw.name.is_some() {
        return Err(ConfigError::invalid(
            "default.name",
            "the [default] table cannot be named",
        ));
    }
    let layer = parse_layer(raw, "default")?;
    Ok(BaseSpec {
        description: layer.description,
        deps: layer.deps,
        commands: layer.commands,
        allowlist_externals: layer.allowlist_externals,
        setenv: layer.setenv,
        change_dir: layer.change_dir,
        continue_on_error: layer.continue_on_error.unwrap_or(false),
        timeout_secs: layer.timeout_secs.unwrap_or(0),
    })
}

/// Pass two, for one named environment.
pub(crate) fn merge_environment(
    base: &BaseSpec,
    name: String,
    raw: RawEnv,
) -> Result<EnvironmentSpec, ConfigError> {
    let layer = parse_layer(raw, &format!("env.{name}"))?;

    let mut deps = base.deps.clone();
    deps.extend(layer.deps);

    let mut commands = base.commands.clone();
    commands.extend(layer.commands);

    let mut allowlist_externals = base.allowlist_externals.clone();
    for entry in layer.allowlist_externals {
        if !allowlist_externals.contains(&entry) {
            allowlist_externals.push(entry);
        }
    }

    let mut setenv = base.setenv.clone();
    setenv.extend(layer.setenv);

    let mut spec = EnvironmentSpec {
        name,
        description: layer.description.or_else(|| base.description.clone()),
        deps,
        commands,
        allowlist_externals,
        setenv,
        change_dir: layer.change_dir.or_else(|| base.change_dir.clone()),
        continue_on_error: layer.continue_on_error.unwrap_or(base.continue_on_error),
        timeout_secs: layer.timeout_secs.unwrap_or(base.timeout_secs),
    };

    finalize(&mut spec)?;
    Ok(spec)
}

fn finalize(spec: &mut EnvironmentSpec) -> Result<(), ConfigError> {
    let allowlist = spec.allowlist_externals.clone();
    let declared: Vec<String> = spec
        .deps
        .iter()
        .filter_map(|d| d.package_name())
        .map(normalize_package_name)
        .collect();

    for command in &mut spec.commands {
        if is_allowlisted(&allowlist, command.program()) {
            command.external = true;
        }

        for reference in &command.requires {
            if !declared.contains(reference) {
                return Err(ConfigError::UnknownReference {
                    env: spec.name.clone(),
                    command: command.display(),
                    reference: reference.clone(),
                });
            }
        }
    }
    Ok(())
}

fn is_allowlisted(allowlist: &[String], program: &str) -> bool {
    allowlist.iter().any(|entry| {
        entry == ALLOW_ALL
            || entry == program
            || (!program.contains('/')
                && std::path::Path::new(entry)
                    .file_name()
                    .is_some_and(|f| f == program))
    })
}

fn parse_layer(raw: RawEnv, table: &str) -> Result<Layer, ConfigError> {
    let deps = raw
        .deps
        .iter()
        .map(|d| {
            DependencySource::parse(d)
                .map_err(|_| ConfigError::invalid(format!("{table}.deps"), format!("cannot parse '{d}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let commands = raw
        .commands
        .into_iter()
        .map(|c| parse_command(c, table))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Layer {
        description: raw.description,
        deps,
        commands,
        allowlist_externals: raw.allowlist_externals,
        setenv: raw.setenv,
        change_dir: raw.change_dir,
        continue_on_error: raw.continue_on_error,
        timeout_secs: raw.timeout_secs,
    })
}

fn parse_command(raw: RawCommand, table: &str) -> Result<CommandDeclaration, ConfigError> {
    let field = format!("{table}.commands");
    let (argv, external, requires) = match raw {
        RawCommand::Line(line) => (split_line(&line, &field)?, false, Vec::new()),
        RawCommand::Argv(argv) => (argv, false, Vec::new()),
        RawCommand::Detailed(table) => {
            let argv = match table.run {
                RawRun::Line(line) => split_line(&line, &field)?,
                RawRun::Argv(argv) => argv,
            };
            (argv, table.external, table.requires)
        }
    };

    if argv.first().map_or(true, |p| p.trim().is_empty()) {
        return Err(ConfigError::invalid(field, "empty command"));
    }

    Ok(CommandDeclaration {
        argv,
        external,
        requires: requires.iter().map(|r| normalize_package_name(r)).collect(),
    })
}

fn split_line(line: &str, field: &str) -> Result<Vec<String>, ConfigError> {
    split_command_line(line).map_err(|e| match e {
        ConfigError::InvalidValue { reason, .. } => ConfigError::invalid(field, reason),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_env(toml_src: &str) -> RawEnv {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_scalar_fields_replace() {
        let base = resolve_base(raw_env(
            r#"
            description = "base"
            continue_on_error = true
            timeout_secs = 30
            "#,
        ))
        .unwrap();

        let spec = merge_environment(
            &base,
            "py36".to_string(),
            raw_env(
                r#"
                description = "py36 suite"
                continue_on_error = false
                "#,
            ),
        )
        .unwrap();

        assert_eq!(spec.description.as_deref(), Some("py36 suite"));
        assert!(!spec.continue_on_error);
        assert_eq!(spec.timeout_secs, 30);
    }

    #[test]
    fn test_list_fields_append_base_first() {
        let base = resolve_base(raw_env(
            r#"
            deps = ["-r requirements.txt"]
            commands = ["rm -rf build"]
            allowlist_externals = ["rm"]
            "#,
        ))
        .unwrap();

        let spec = merge_environment(
            &base,
            "py35".to_string(),
            raw_env(
                r#"
                deps = ["pytest"]
                commands = ["pytest -q"]
                allowlist_externals = ["rm", "make"]
                "#,
            ),
        )
        .unwrap();

        let deps: Vec<String> = spec.deps.iter().map(|d| d.to_string()).collect();
        assert_eq!(deps, vec!["-r requirements.txt", "pytest"]);
        let commands: Vec<String> = spec.commands.iter().map(|c| c.display()).collect();
        assert_eq!(commands, vec!["rm -rf build", "pytest -q"]);
        assert_eq!(spec.allowlist_externals, vec!["rm", "make"]);
    }

    #[test]
    fn test_setenv_merges_per_key() {
        let base = resolve_base(raw_env(
            r#"setenv = { A = "base", B = "base" }"#,
        ))
        .unwrap();
        let spec = merge_environment(
            &base,
            "e".to_string(),
            raw_env(r#"setenv = { B = "env", C = "env" }"#),
        )
        .unwrap();

        assert_eq!(spec.setenv["A"], "base");
        assert_eq!(spec.setenv["B"], "env");
        assert_eq!(spec.setenv["C"], "env");
    }

    #[test]
    fn test_base_allowlist_marks_env_commands_external() {
        let base = resolve_base(raw_env(r#"allowlist_externals = ["make"]"#)).unwrap();
        let spec = merge_environment(
            &base,
            "docs".to_string(),
            raw_env(r#"commands = ["make html", "sphinx-build docs out"]"#),
        )
        .unwrap();

        assert!(spec.commands[0].external);
        assert!(!spec.commands[1].external);
    }

    #[test]
    fn test_allowlist_by_path_and_wildcard() {
        assert!(is_allowlisted(&["/usr/bin/make".to_string()], "make"));
        assert!(is_allowlisted(&["*".to_string()], "anything"));
        assert!(!is_allowlisted(&["make".to_string()], "./make"));
        assert!(is_allowlisted(&["./scripts/check.sh".to_string()], "./scripts/check.sh"));
    }

    #[test]
    fn test_detailed_command_table() {
        let base = BaseSpec::default();
        let spec = merge_environment(
            &base,
            "lint".to_string(),
            raw_env(
                r#"
                deps = ["Flake8>=6"]
                commands = [
                    { run = ["flake8", "src"], requires = ["flake8"] },
                    { run = "make check", external = true },
                ]
                "#,
            ),
        )
        .unwrap();

        assert_eq!(spec.commands[0].requires, vec!["flake8"]);
        assert!(!spec.commands[0].external);
        assert_eq!(spec.commands[1].argv, vec!["make", "check"]);
        assert!(spec.commands[1].external);
    }

    #[test]
    fn test_requires_unknown_package_is_unknown_reference() {
        let err = merge_environment(
            &BaseSpec::default(),
            "lint".to_string(),
            raw_env(
                r#"
                deps = ["pytest"]
                commands = [{ run = "flake8 src", requires = ["flake8"] }]
                "#,
            ),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            ConfigError::UnknownReference { ref env, ref reference, .. }
                if env == "lint" && reference == "flake8"
        ));
    }

    #[test]
    fn test_requires_satisfied_by_base_deps() {
        let base = resolve_base(raw_env(r#"deps = ["pytest-cov"]"#)).unwrap();
        let spec = merge_environment(
            &base,
            "cov".to_string(),
            raw_env(r#"commands = [{ run = "pytest --cov", requires = ["pytest_cov"] }]"#),
        );
        assert!(spec.is_ok());
    }

    #[test]
    fn test_default_table_cannot_be_named() {
        assert!(resolve_base(raw_env(r#"name = "base""#)).is_err());
    }
}

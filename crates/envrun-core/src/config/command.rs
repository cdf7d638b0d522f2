//! Command declarations and command-line tokenising.

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// One command an environment runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandDeclaration {
    /// Program followed by its arguments. Never empty.
    pub argv: Vec<String>,

    /// Program may come from the ambient system instead of the
    /// environment's installed set.
    pub external: bool,

    /// Normalized package names this command relies on.
    pub requires: Vec<String>,
}

impl CommandDeclaration {
    /// Declaration with no external flag and no requirements.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            external: false,
            requires: Vec::new(),
        }
    }

    /// Parse a command line written as a single string.
    pub fn from_line(line: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(split_command_line(line)?))
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Command as a single display string.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| quote_for_display(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote_for_display(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Split a command line into arguments with POSIX shell quoting rules.
pub fn split_command_line(line: &str) -> Result<Vec<String>, ConfigError> {
    let args = shlex::split(line).ok_or_else(|| {
        ConfigError::invalid("commands", format!("unbalanced quoting in `{line}`"))
    })?;
    if args.is_empty() {
        return Err(ConfigError::invalid("commands", "empty command"));
    }
    Ok(args)
}

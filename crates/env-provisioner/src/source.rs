//! Dependency sources and their deterministic resolution
//!
//! A dependency source is either an inline package reference (`pytest>=7`)
//! or a pointer to an external requirements manifest (`-r requirements.txt`).
//! Resolution keeps declared order; a later package with the same
//! normalized name supersedes the earlier one.

use crate::error::ProvisionError;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A single dependency declaration of an environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencySource {
    /// Inline package reference
    Package {
        /// Normalized package name (lowercase, `-` separated)
        name: String,
        /// Requirement exactly as declared
        requirement: String,
    },
    /// External requirements manifest, relative to the project root
    Manifest { path: PathBuf },
}

fn package_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(\[[^\]]*\])?\s*(.*)$")
            .expect("package pattern is valid")
    })
}

fn separator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[-_.]+").expect("separator pattern is valid"))
}

/// Normalize a package name so `Foo_Bar`, `foo.bar` and `foo-bar` compare equal
pub fn normalize_package_name(name: &str) -> String {
    separator_pattern()
        .replace_all(&name.to_ascii_lowercase(), "-")
        .into_owned()
}

impl DependencySource {
    /// Parse one declared dependency string
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProvisionError::InvalidSource(raw.to_string()));
        }

        if let Some(path) = manifest_path(trimmed) {
            if path.is_empty() {
                return Err(ProvisionError::InvalidSource(raw.to_string()));
            }
            return Ok(DependencySource::Manifest {
                path: PathBuf::from(path),
            });
        }

        let captures = package_pattern()
            .captures(trimmed)
            .ok_or_else(|| ProvisionError::InvalidSource(raw.to_string()))?;
        let name = captures
            .get(1)
            .map(|m| m.as_str())
            .ok_or_else(|| ProvisionError::InvalidSource(raw.to_string()))?;

        // Anything after the name must look like a version constraint or marker
        let rest = captures.get(3).map(|m| m.as_str()).unwrap_or_default();
        if !rest.is_empty() && !rest.starts_with(['<', '>', '=', '!', '~', ';', '@', ',']) {
            return Err(ProvisionError::InvalidSource(raw.to_string()));
        }

        Ok(DependencySource::Package {
            name: normalize_package_name(name),
            requirement: trimmed.to_string(),
        })
    }

    /// Normalized package name, `None` for manifests
    pub fn package_name(&self) -> Option<&str> {
        match self {
            DependencySource::Package { name, .. } => Some(name),
            DependencySource::Manifest { .. } => None,
        }
    }

    /// Package name as written in the requirement, `None` for manifests
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            DependencySource::Package { requirement, .. } => package_pattern()
                .captures(requirement)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str()),
            DependencySource::Manifest { .. } => None,
        }
    }

    /// Arguments handed to the installer for this source
    pub fn install_args(&self, root: &Path) -> Vec<String> {
        match self {
            DependencySource::Package { requirement, .. } => vec![requirement.clone()],
            DependencySource::Manifest { path } => vec![
                "-r".to_string(),
                root.join(path).to_string_lossy().into_owned(),
            ],
        }
    }

    fn identity(&self) -> SourceIdentity<'_> {
        match self {
            DependencySource::Package { name, .. } => SourceIdentity::Package(name),
            DependencySource::Manifest { path } => SourceIdentity::Manifest(path),
        }
    }
}

#[derive(PartialEq, Eq)]
enum SourceIdentity<'a> {
    Package(&'a str),
    Manifest(&'a Path),
}

fn manifest_path(raw: &str) -> Option<&str> {
    if let Some(rest) = raw.strip_prefix("--requirement") {
        return Some(rest.trim_start_matches('=').trim());
    }
    raw.strip_prefix("-r").map(str::trim)
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencySource::Package { requirement, .. } => write!(f, "{}", requirement),
            DependencySource::Manifest { path } => write!(f, "-r {}", path.display()),
        }
    }
}

/// Resolve declared sources into the ordered set that gets installed
///
/// Later declarations of the same package (or the same manifest path)
/// supersede earlier ones; the surviving entry takes the later position.
pub fn resolve_sources(declared: &[DependencySource]) -> Vec<DependencySource> {
    let mut resolved: Vec<DependencySource> = Vec::with_capacity(declared.len());
    for source in declared {
        resolved.retain(|existing| existing.identity() != source.identity());
        resolved.push(source.clone());
    }
    resolved
}

/// Content digest of a resolved source list (order sensitive)
pub fn dependency_digest(sources: &[DependencySource]) -> String {
    let mut hasher = Sha256::new();
    for source in sources {
        hasher.update(source.to_string().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(raw: &str) -> DependencySource {
        DependencySource::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_plain_package() {
        assert_eq!(
            pkg("pytest"),
            DependencySource::Package {
                name: "pytest".to_string(),
                requirement: "pytest".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_versioned_package_normalizes_name() {
        let source = pkg("Flake8_Docstrings >= 1.7");
        assert_eq!(source.package_name(), Some("flake8-docstrings"));
        assert_eq!(source.to_string(), "Flake8_Docstrings >= 1.7");
    }

    #[test]
    fn test_declared_name_keeps_original_spelling() {
        let source = pkg("cmd-A>=1");
        assert_eq!(source.declared_name(), Some("cmd-A"));
        assert_eq!(source.package_name(), Some("cmd-a"));
        assert_eq!(pkg("Foo_Bar[extra]").declared_name(), Some("Foo_Bar"));
        assert_eq!(pkg("-r requirements.txt").declared_name(), None);
    }

    #[test]
    fn test_parse_extras_and_markers() {
        assert_eq!(pkg("coverage[toml]>=7").package_name(), Some("coverage"));
        assert_eq!(
            pkg("tomli; python_version < \"3.11\"").package_name(),
            Some("tomli")
        );
    }

    #[test]
    fn test_parse_manifest_forms() {
        let expected = DependencySource::Manifest {
            path: PathBuf::from("requirements.txt"),
        };
        assert_eq!(pkg("-r requirements.txt"), expected);
        assert_eq!(pkg("-rrequirements.txt"), expected);
        assert_eq!(pkg("--requirement=requirements.txt"), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DependencySource::parse("").is_err());
        assert!(DependencySource::parse("-r").is_err());
        assert!(DependencySource::parse("pytest please").is_err());
    }

    #[test]
    fn test_later_package_supersedes_earlier() {
        let resolved = resolve_sources(&[
            pkg("pytest==7.0"),
            pkg("flake8"),
            pkg("PyTest==8.1"),
        ]);
        let rendered: Vec<String> = resolved.iter().map(|s| s.to_string()).collect();
        assert_eq!(rendered, vec!["flake8", "PyTest==8.1"]);
    }

    #[test]
    fn test_manifests_deduplicated_by_path() {
        let resolved = resolve_sources(&[
            pkg("-r requirements.txt"),
            pkg("mock"),
            pkg("-r requirements.txt"),
        ]);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].to_string(), "mock");
    }

    #[test]
    fn test_manifest_install_args_are_rooted() {
        let args = pkg("-r reqs/test.txt").install_args(Path::new("/project"));
        assert_eq!(args, vec!["-r".to_string(), "/project/reqs/test.txt".to_string()]);
    }

    #[test]
    fn test_dependency_digest_order_sensitive() {
        let a = dependency_digest(&[pkg("a"), pkg("b")]);
        let b = dependency_digest(&[pkg("b"), pkg("a")]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, dependency_digest(&[pkg("a"), pkg("b")]));
    }
}

//! Fixtures shared by the unit tests.

use async_trait::async_trait;
use env_provisioner::{
    ContextLocks, InstallOutcome, InstallTarget, ProvisionRequest, ProvisionerConfig,
};
use envrun_core::{
    CommandDeclaration, DependencySource, EnvironmentSpec, Installer, ProvisionError, Provisioner,
    ScopedEnvironment,
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Installs each package as a `#!/bin/sh` script named after it.
#[derive(Default)]
pub struct ScriptInstaller {
    scripts: HashMap<String, String>,
    failing: Vec<String>,
    pub installed: Mutex<Vec<String>>,
}

impl ScriptInstaller {
    pub fn script(mut self, package: &str, body: &str) -> Self {
        self.scripts.insert(package.to_string(), body.to_string());
        self
    }

    pub fn failing(mut self, package: &str) -> Self {
        self.failing.push(package.to_string());
        self
    }
}

#[async_trait]
impl Installer for ScriptInstaller {
    async fn install(
        &self,
        source: &DependencySource,
        target: InstallTarget<'_>,
    ) -> Result<InstallOutcome, ProvisionError> {
        let name = source.declared_name().unwrap_or_default().to_string();
        self.installed
            .lock()
            .unwrap()
            .push(format!("{}:{name}", target.env_name));
        if self.failing.contains(&name) {
            return Ok(InstallOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("no matching distribution for {name}"),
            });
        }
        let body = self.scripts.get(&name).map(String::as_str).unwrap_or("exit 0");
        write_script(&target.env_dir.join("bin").join(&name), body);
        Ok(InstallOutcome {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn install_script(env: &ScopedEnvironment, name: &str, body: &str) {
    write_script(&env.bin_dir().join(name), body);
}

pub fn provisioner(root: &Path, installer: Arc<dyn Installer>) -> Provisioner {
    Provisioner::with_locks(ProvisionerConfig::new(root), installer, ContextLocks::new())
}

/// A context with no installed dependencies.
pub async fn provision_empty(root: &Path, name: &str) -> ScopedEnvironment {
    provisioner(root, Arc::new(ScriptInstaller::default()))
        .provision(&ProvisionRequest {
            name: name.to_string(),
            deps: Vec::new(),
        })
        .await
        .unwrap()
}

pub fn env_spec(name: &str, commands: &[&str]) -> EnvironmentSpec {
    EnvironmentSpec {
        name: name.to_string(),
        description: None,
        deps: Vec::new(),
        commands: commands
            .iter()
            .map(|line| CommandDeclaration::from_line(line).unwrap())
            .collect(),
        allowlist_externals: Vec::new(),
        setenv: BTreeMap::new(),
        change_dir: None,
        continue_on_error: false,
        timeout_secs: 0,
    }
}

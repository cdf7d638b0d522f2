//! Top-level run: select environments, provision, execute, tear down, report.

use crate::pipeline::EnvironmentRunner;
use crate::runner::RunContext;
use chrono::Utc;
use envrun_core::{
    emit_env_finished, emit_env_provision_failed, emit_env_provisioned, emit_run_finished,
    emit_run_started, emit_teardown_error, CancelSignal, CommandInstaller, CommandOutcome, Config,
    EnvSpan, EnvironmentResult, EnvironmentSpec, EnvironmentState, Installer, OrchestrationError,
    Provisioner, ProvisionerConfig, RunReport, ALL_ENVIRONMENTS,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Which environments a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// `settings.envlist`, or every environment when it is unset.
    #[default]
    Default,
    /// Every declared environment.
    All,
    /// Explicit identifiers; duplicates are ignored.
    Named(Vec<String>),
}

impl Selection {
    /// Build a selection from `-e` arguments, each possibly comma separated.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let names: Vec<String> = args
            .iter()
            .flat_map(|arg| arg.as_ref().split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            Selection::Default
        } else if names.iter().any(|name| name == ALL_ENVIRONMENTS) {
            Selection::All
        } else {
            Selection::Named(names)
        }
    }
}

/// Overrides applied on top of the configuration for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Maximum environments in flight; `settings.parallel` when unset.
    pub parallel: Option<usize>,
    /// Force continue-on-error for every environment.
    pub continue_on_error: Option<bool>,
    /// Keep contexts on disk after the run.
    pub keep_envs: Option<bool>,
    /// Substituted for `{posargs}`.
    pub posargs: Vec<String>,
}

/// Drives a whole run.
#[derive(Clone)]
pub struct Orchestrator {
    provisioner: Provisioner,
    runner: Arc<EnvironmentRunner>,
}

impl Orchestrator {
    pub fn new(provisioner: Provisioner, runner: EnvironmentRunner) -> Self {
        Self {
            provisioner,
            runner: Arc::new(runner),
        }
    }

    /// Orchestrator using the configured install command.
    pub fn from_config(config: &Config, options: &RunOptions) -> Result<Self, OrchestrationError> {
        let installer = CommandInstaller::new(config.settings().install_command.clone())
            .map_err(|e| OrchestrationError::InvalidOptions(e.to_string()))?;
        Ok(Self::with_installer(config, options, Arc::new(installer)))
    }

    /// Orchestrator with a custom installer.
    pub fn with_installer(
        config: &Config,
        options: &RunOptions,
        installer: Arc<dyn Installer>,
    ) -> Self {
        let settings = config.settings();
        let provisioner_config = ProvisionerConfig {
            work_dir: settings.work_dir.clone(),
            root: config.root().to_path_buf(),
            keep_envs: options.keep_envs.unwrap_or(settings.keep_envs),
            install_ok_codes: settings.install_ok_codes.clone(),
        };
        Self::new(
            Provisioner::new(provisioner_config, installer),
            EnvironmentRunner::default(),
        )
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    /// Resolve a selection to specs, in declaration order.
    ///
    /// Fails on the first unknown identifier.
    pub fn resolve<'c>(
        config: &'c Config,
        selection: &Selection,
    ) -> Result<Vec<&'c EnvironmentSpec>, OrchestrationError> {
        match selection {
            Selection::All => Ok(config.environments().iter().collect()),
            Selection::Default => {
                let wanted: HashSet<&str> = config.default_selection().into_iter().collect();
                Ok(config
                    .environments()
                    .iter()
                    .filter(|spec| wanted.contains(spec.name.as_str()))
                    .collect())
            }
            Selection::Named(names) => {
                if let Some(unknown) = names.iter().find(|name| config.get(name).is_none()) {
                    return Err(OrchestrationError::UnknownEnvironment(unknown.clone()));
                }
                let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
                Ok(config
                    .environments()
                    .iter()
                    .filter(|spec| wanted.contains(spec.name.as_str()))
                    .collect())
            }
        }
    }

    /// Run the selected environments and report on every one of them.
    ///
    /// Unknown identifiers and invalid options are rejected before anything
    /// is provisioned. Every other failure is recorded in the report.
    pub async fn run(
        &self,
        config: &Config,
        selection: &Selection,
        options: &RunOptions,
        cancel: CancelSignal,
    ) -> Result<RunReport, OrchestrationError> {
        let parallel = options.parallel.unwrap_or(config.settings().parallel);
        if parallel == 0 {
            return Err(OrchestrationError::InvalidOptions(
                "parallel must be at least 1".to_string(),
            ));
        }

        let specs: Vec<EnvironmentSpec> = Self::resolve(config, selection)?
            .into_iter()
            .map(|spec| {
                let mut spec = spec.clone();
                if let Some(continue_on_error) = options.continue_on_error {
                    spec.continue_on_error = continue_on_error;
                }
                spec
            })
            .collect();

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let names: Vec<&str> = specs.iter().map(|spec| spec.name.as_str()).collect();
        emit_run_started(&run_id.to_string(), &names, parallel);

        let ctx = RunContext::new(options.posargs.clone(), cancel);
        let results = if parallel == 1 || specs.len() <= 1 {
            self.run_serial(specs, &ctx).await
        } else {
            self.run_parallel(specs, parallel, &ctx).await
        };

        let report = RunReport::new(
            run_id,
            started_at,
            start.elapsed().as_millis() as u64,
            results,
        );
        emit_run_finished(&report);
        Ok(report)
    }

    async fn run_serial(&self, specs: Vec<EnvironmentSpec>, ctx: &RunContext) -> Vec<EnvironmentResult> {
        let mut results = Vec::with_capacity(specs.len());
        for spec in &specs {
            let span = EnvSpan::span(&spec.name);
            let result = run_environment(&self.provisioner, &self.runner, spec, ctx)
                .instrument(span)
                .await;
            results.push(result);
        }
        results
    }

    async fn run_parallel(
        &self,
        specs: Vec<EnvironmentSpec>,
        parallel: usize,
        ctx: &RunContext,
    ) -> Vec<EnvironmentResult> {
        let names: Vec<String> = specs.iter().map(|spec| spec.name.clone()).collect();
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, EnvironmentResult)>();
        let sem = Arc::new(tokio::sync::Semaphore::new(parallel));

        let mut tasks = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            let provisioner = self.provisioner.clone();
            let runner = Arc::clone(&self.runner);
            let tx = tx.clone();
            let sem = Arc::clone(&sem);
            let ctx = ctx.clone();
            let span = EnvSpan::span(&spec.name);

            let task = tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    let result = run_environment(&provisioner, &runner, &spec, &ctx).await;
                    let _ = tx.send((index, result));
                }
                .instrument(span),
            );
            tasks.push(task);
        }
        drop(tx);

        for outcome in futures::future::join_all(tasks).await {
            if let Err(e) = outcome {
                warn!(error = %e, "Environment task aborted");
            }
        }

        let mut slots: Vec<Option<EnvironmentResult>> = vec![None; names.len()];
        while let Some((index, result)) = rx.recv().await {
            slots[index] = Some(result);
        }

        names
            .into_iter()
            .zip(slots)
            .map(|(name, slot)| {
                slot.unwrap_or_else(|| EnvironmentResult {
                    name,
                    status: EnvironmentState::Failed,
                    outcomes: Vec::new(),
                    failure: Some("environment task aborted".to_string()),
                    duration_ms: 0,
                })
            })
            .collect()
    }
}

/// Lifecycle tracker for one environment.
struct Lifecycle<'a> {
    env: &'a str,
    state: EnvironmentState,
}

impl<'a> Lifecycle<'a> {
    fn new(env: &'a str) -> Self {
        Self {
            env,
            state: EnvironmentState::Pending,
        }
    }

    fn advance(&mut self, next: EnvironmentState) {
        match self.state.transition(next) {
            Ok(state) => self.state = state,
            Err(e) => {
                warn!(env = %self.env, error = %e, "Lifecycle violation");
                self.state = next;
            }
        }
    }
}

/// Provision, run and tear down a single environment.
async fn run_environment(
    provisioner: &Provisioner,
    runner: &EnvironmentRunner,
    spec: &EnvironmentSpec,
    ctx: &RunContext,
) -> EnvironmentResult {
    let start = Instant::now();
    let mut lifecycle = Lifecycle::new(&spec.name);

    if ctx.cancel.is_cancelled() {
        lifecycle.advance(EnvironmentState::Skipped);
        info!(env = %spec.name, "Run cancelled before start, skipping");
        let result = EnvironmentResult {
            failure: Some("run cancelled before start".to_string()),
            ..EnvironmentResult::skipped(&spec.name)
        };
        emit_env_finished(&result);
        return result;
    }

    if spec.is_noop() {
        lifecycle.advance(EnvironmentState::Provisioning);
        lifecycle.advance(EnvironmentState::Running);
        lifecycle.advance(EnvironmentState::Succeeded);
        debug!(env = %spec.name, "No commands, nothing to provision");
        let result = EnvironmentResult {
            name: spec.name.clone(),
            status: lifecycle.state,
            outcomes: Vec::new(),
            failure: None,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        emit_env_finished(&result);
        return result;
    }

    lifecycle.advance(EnvironmentState::Provisioning);
    let request = spec.provision_request();
    let provisioned = tokio::select! {
        provisioned = provisioner.provision(&request) => {
            provisioned.map_err(|e| e.to_string())
        }
        _ = ctx.cancel.cancelled() => Err("run cancelled during provisioning".to_string()),
    };

    let env = match provisioned {
        Ok(env) => env,
        Err(failure) => {
            emit_env_provision_failed(&spec.name, &failure);
            lifecycle.advance(EnvironmentState::ProvisionFailed);
            let result = EnvironmentResult {
                name: spec.name.clone(),
                status: lifecycle.state,
                outcomes: spec
                    .commands
                    .iter()
                    .enumerate()
                    .map(|(index, command)| CommandOutcome::skipped(index, command.display()))
                    .collect(),
                failure: Some(failure),
                duration_ms: start.elapsed().as_millis() as u64,
            };
            emit_env_finished(&result);
            return result;
        }
    };
    emit_env_provisioned(
        &spec.name,
        &env.metadata().digest,
        start.elapsed().as_millis() as u64,
    );

    lifecycle.advance(EnvironmentState::Running);
    let mut result = runner.run_all(spec, &env, ctx).await;
    lifecycle.advance(result.status);

    if let Err(e) = env.teardown().await {
        emit_teardown_error(&spec.name, &e);
    }

    result.status = lifecycle.state;
    result.duration_ms = start.elapsed().as_millis() as u64;
    emit_env_finished(&result);
    result
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::ScriptInstaller;
    use envrun_core::CommandStatus;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[default]
deps = ["cmd-A"]
commands = ["cmd-A"]

[[env]]
name = "py35"

[[env]]
name = "py36"
deps = ["cmd-B", "cmd-C"]
commands = ["cmd-B", "cmd-C"]
"#;

    fn installer() -> Arc<ScriptInstaller> {
        Arc::new(
            ScriptInstaller::default()
                .script("cmd-A", "exit 0")
                .script("cmd-B", "exit 1")
                .script("cmd-C", "exit 0"),
        )
    }

    #[test]
    fn test_selection_from_args() {
        assert_eq!(Selection::from_args::<&str>(&[]), Selection::Default);
        assert_eq!(Selection::from_args(&["ALL"]), Selection::All);
        assert_eq!(Selection::from_args(&["py35,ALL"]), Selection::All);
        assert_eq!(
            Selection::from_args(&["py35, py36", "lint"]),
            Selection::Named(vec!["py35".into(), "py36".into(), "lint".into()])
        );
    }

    #[test]
    fn test_resolve_keeps_declaration_order_and_dedupes() {
        let root = tempdir().unwrap();
        let config = Config::parse(SAMPLE, root.path()).unwrap();
        let specs = Orchestrator::resolve(
            &config,
            &Selection::Named(vec!["py36".into(), "py35".into(), "py36".into()]),
        )
        .unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["py35", "py36"]);
    }

    #[tokio::test]
    async fn test_default_selection_uses_declaration_order() {
        let root = tempdir().unwrap();
        let config = Config::parse(
            r#"
[settings]
envlist = ["b", "a", "b"]

[[env]]
name = "a"
allowlist_externals = ["true"]
commands = ["true"]

[[env]]
name = "b"
allowlist_externals = ["true"]
commands = ["true"]

[[env]]
name = "c"
allowlist_externals = ["true"]
commands = ["true"]
"#,
            root.path(),
        )
        .unwrap();

        let specs = Orchestrator::resolve(&config, &Selection::Default).unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);

        let orchestrator =
            Orchestrator::with_installer(&config, &RunOptions::default(), installer());
        let report = orchestrator
            .run(&config, &Selection::Default, &RunOptions::default(), CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.names().collect::<Vec<_>>(), ["a", "b"]);
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn test_sample_run_reports_each_environment() {
        let root = tempdir().unwrap();
        let config = Config::parse(SAMPLE, root.path()).unwrap();
        let orchestrator =
            Orchestrator::with_installer(&config, &RunOptions::default(), installer());

        let report = orchestrator
            .run(&config, &Selection::All, &RunOptions::default(), CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(report.exit_code, 1);
        let py35 = report.get("py35").unwrap();
        assert_eq!(py35.status, EnvironmentState::Succeeded);
        assert_eq!(py35.passed_count(), 1);

        let py36 = report.get("py36").unwrap();
        assert_eq!(py36.status, EnvironmentState::Failed);
        // Base commands come first, then the environment's own.
        let statuses: Vec<CommandStatus> = py36.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            [CommandStatus::Passed, CommandStatus::Failed, CommandStatus::Skipped]
        );
        assert!(!config.settings().work_dir.join("py36").exists());
    }

    #[tokio::test]
    async fn test_unknown_environment_provisions_nothing() {
        let root = tempdir().unwrap();
        let config = Config::parse(SAMPLE, root.path()).unwrap();
        let installer = installer();
        let orchestrator = Orchestrator::with_installer(
            &config,
            &RunOptions::default(),
            installer.clone(),
        );

        let err = orchestrator
            .run(
                &config,
                &Selection::Named(vec!["py35".into(), "py99".into()]),
                &RunOptions::default(),
                CancelSignal::never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::UnknownEnvironment(ref name) if name == "py99"));
        assert!(installer.installed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provision_failure_is_recorded_not_raised() {
        let root = tempdir().unwrap();
        let config = Config::parse(SAMPLE, root.path()).unwrap();
        let installer = Arc::new(ScriptInstaller::default().failing("cmd-B"));
        let orchestrator =
            Orchestrator::with_installer(&config, &RunOptions::default(), installer);

        let report = orchestrator
            .run(&config, &Selection::All, &RunOptions::default(), CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        assert!(report.get("py35").unwrap().succeeded());
        let py36 = report.get("py36").unwrap();
        assert_eq!(py36.status, EnvironmentState::ProvisionFailed);
        assert!(py36.failure.as_deref().unwrap().contains("cmd-B"));
        assert_eq!(py36.skipped_count(), 3);
        assert_eq!(report.exit_code, 1);
    }

    #[tokio::test]
    async fn test_noop_environment_is_never_provisioned() {
        let root = tempdir().unwrap();
        let config = Config::parse("[[env]]\nname = \"empty\"\ndeps = [\"x\"]\n", root.path())
            .unwrap();
        let installer = installer();
        let orchestrator = Orchestrator::with_installer(
            &config,
            &RunOptions::default(),
            installer.clone(),
        );

        let report = orchestrator
            .run(&config, &Selection::Default, &RunOptions::default(), CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(report.exit_code, 0);
        assert!(report.get("empty").unwrap().succeeded());
        assert!(installer.installed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_unstarted_environments() {
        let root = tempdir().unwrap();
        let config = Config::parse(SAMPLE, root.path()).unwrap();
        let orchestrator =
            Orchestrator::with_installer(&config, &RunOptions::default(), installer());
        let (handle, signal) = envrun_core::cancel_pair();
        handle.cancel();

        let report = orchestrator
            .run(&config, &Selection::All, &RunOptions::default(), signal)
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        assert!(report
            .environments
            .iter()
            .all(|env| env.status == EnvironmentState::Skipped));
        assert_eq!(report.exit_code, 1);
    }

    #[tokio::test]
    async fn test_zero_parallel_is_rejected() {
        let root = tempdir().unwrap();
        let config = Config::parse(SAMPLE, root.path()).unwrap();
        let orchestrator =
            Orchestrator::with_installer(&config, &RunOptions::default(), installer());
        let options = RunOptions {
            parallel: Some(0),
            ..RunOptions::default()
        };

        let err = orchestrator
            .run(&config, &Selection::All, &options, CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidOptions(_)));
    }
}

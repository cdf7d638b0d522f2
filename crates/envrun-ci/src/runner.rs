//! Command execution inside a provisioned environment.
//!
//! Program lookup goes through the [`Executable`] capability, with one
//! variant per resolution rule:
//! - [`AmbientExecutable`]: allow-listed programs from the system `PATH`
//! - [`IsolatedExecutable`]: programs installed into the environment
//!
//! A non-zero exit code is a normal [`CommandOutcome`]; only resolution and
//! launch failures are [`CommandError`]s.

use async_trait::async_trait;
use envrun_core::{
    CancelSignal, CommandDeclaration, CommandError, CommandOutcome, CommandStatus,
    EnvironmentSpec, ScopedEnvironment,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long captured streams may keep draining after a child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Per-run inputs every command sees.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Extra arguments substituted for `{posargs}`.
    pub posargs: Vec<String>,
    pub cancel: CancelSignal,
}

impl RunContext {
    pub fn new(posargs: Vec<String>, cancel: CancelSignal) -> Self {
        Self { posargs, cancel }
    }

    /// Context with no positional arguments that is never cancelled.
    pub fn detached() -> Self {
        Self::new(Vec::new(), CancelSignal::never())
    }
}

/// Everything needed to start one resolved program.
pub struct Invocation<'a> {
    pub args: &'a [String],
    pub env: &'a ScopedEnvironment,
    pub spec: &'a EnvironmentSpec,
    pub timeout: Option<Duration>,
    pub cancel: &'a CancelSignal,
}

/// How a started program ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Program lookup and execution capability.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Locate `program` for the given environment.
    fn resolve(&self, program: &str, env: &ScopedEnvironment) -> Result<PathBuf, CommandError>;

    /// Run a resolved program to completion, timeout or cancellation.
    async fn run(
        &self,
        path: &Path,
        invocation: &Invocation<'_>,
    ) -> Result<ExitOutcome, CommandError> {
        spawn_and_wait(path, invocation).await
    }
}

/// Resolves allow-listed programs from the ambient system.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbientExecutable;

#[async_trait]
impl Executable for AmbientExecutable {
    fn resolve(&self, program: &str, env: &ScopedEnvironment) -> Result<PathBuf, CommandError> {
        if is_path_like(program) {
            let candidate = env.root().join(program);
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        } else if let Some(found) = search_path(program) {
            return Ok(found);
        }

        Err(CommandError::ExecutableNotFound {
            program: program.to_string(),
            hint: format!("Did you install \"{program}\"? It was not found on PATH."),
        })
    }
}

/// Resolves programs from the environment's own installed set only.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsolatedExecutable;

#[async_trait]
impl Executable for IsolatedExecutable {
    fn resolve(&self, program: &str, env: &ScopedEnvironment) -> Result<PathBuf, CommandError> {
        let candidate = if is_path_like(program) {
            let path = env.dir().join(program);
            let inside = std::fs::canonicalize(&path)
                .ok()
                .zip(std::fs::canonicalize(env.dir()).ok())
                .is_some_and(|(p, dir)| p.starts_with(dir));
            inside.then_some(path)
        } else {
            Some(env.bin_dir().join(program))
        };

        match candidate {
            Some(path) if is_executable(&path) => Ok(path),
            _ => Err(CommandError::ExecutableNotFound {
                program: program.to_string(),
                hint: format!(
                    "Did you install \"{program}\"? It is not installed in environment '{}'; \
                     declare it in deps or add it to allowlist_externals.",
                    env.name()
                ),
            }),
        }
    }
}

/// Runs single command declarations.
#[derive(Clone)]
pub struct CommandRunner {
    ambient: Arc<dyn Executable>,
    isolated: Arc<dyn Executable>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::with_executables(Arc::new(AmbientExecutable), Arc::new(IsolatedExecutable))
    }
}

impl CommandRunner {
    pub fn with_executables(ambient: Arc<dyn Executable>, isolated: Arc<dyn Executable>) -> Self {
        Self { ambient, isolated }
    }

    /// Run the `index`-th command of `spec` inside `env`.
    pub async fn run(
        &self,
        index: usize,
        command: &CommandDeclaration,
        spec: &EnvironmentSpec,
        env: &ScopedEnvironment,
        ctx: &RunContext,
    ) -> Result<CommandOutcome, CommandError> {
        let argv = expand_placeholders(&command.argv, env, &ctx.posargs);
        let (program, args) = argv.split_first().ok_or(CommandError::EmptyCommand)?;

        let executable = if command.external {
            &self.ambient
        } else {
            &self.isolated
        };
        let path = executable.resolve(program, env)?;
        debug!(env = %spec.name, program = %program, path = ?path, "Resolved executable");

        let invocation = Invocation {
            args,
            env,
            spec,
            timeout: (spec.timeout_secs > 0).then(|| Duration::from_secs(spec.timeout_secs)),
            cancel: &ctx.cancel,
        };
        let exit = executable.run(&path, &invocation).await?;

        Ok(CommandOutcome {
            index,
            display: CommandDeclaration::new(argv.clone()).display(),
            status: exit.status,
            exit_code: exit.exit_code,
            duration_ms: exit.duration_ms,
            stdout: exit.stdout,
            stderr: exit.stderr,
            error: None,
        })
    }
}

/// Substitute `{posargs}`, `{envdir}`, `{envname}`, `{envtmpdir}` and `{root}`.
///
/// `{posargs}` must stand alone as an argument and expands to zero or more
/// arguments; `{posargs:a b}` falls back to `a b` when none were given.
pub fn expand_placeholders(
    argv: &[String],
    env: &ScopedEnvironment,
    posargs: &[String],
) -> Vec<String> {
    let env_dir = env.dir().to_string_lossy().into_owned();
    let tmp_dir = env.tmp_dir().to_string_lossy().into_owned();
    let root = env.root().to_string_lossy().into_owned();

    let mut expanded = Vec::with_capacity(argv.len() + posargs.len());
    for arg in argv {
        if arg == "{posargs}" {
            expanded.extend(posargs.iter().cloned());
            continue;
        }
        if let Some(default) = arg
            .strip_prefix("{posargs:")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            if posargs.is_empty() {
                expanded.extend(default.split_whitespace().map(str::to_string));
            } else {
                expanded.extend(posargs.iter().cloned());
            }
            continue;
        }
        expanded.push(
            arg.replace("{envdir}", &env_dir)
                .replace("{envtmpdir}", &tmp_dir)
                .replace("{envname}", env.name())
                .replace("{root}", &root),
        );
    }
    expanded
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn spawn_and_wait(
    path: &Path,
    invocation: &Invocation<'_>,
) -> Result<ExitOutcome, CommandError> {
    let env = invocation.env;
    let work_dir = match &invocation.spec.change_dir {
        Some(dir) => env.root().join(dir),
        None => env.root().to_path_buf(),
    };

    let mut command = Command::new(path);
    command
        .args(invocation.args)
        .current_dir(&work_dir)
        .env("ENVRUN_ENV_DIR", env.dir())
        .env("ENVRUN_ENV_NAME", env.name())
        .env("TMPDIR", env.tmp_dir())
        .envs(&invocation.spec.setenv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(search_path) = context_search_path(env) {
        command.env("PATH", search_path);
    }

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| CommandError::LaunchFailed {
        program: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let stdout = tokio::spawn(read_stream(child.stdout.take()));
    let stderr = tokio::spawn(read_stream(child.stderr.take()));

    let waited = tokio::select! {
        status = child.wait() => Waited::Exited(status),
        _ = sleep_or_pending(invocation.timeout) => Waited::TimedOut,
        _ = invocation.cancel.cancelled() => Waited::Cancelled,
    };

    let (status, exit_code) = match waited {
        Waited::Exited(Ok(exit)) => {
            let status = if exit.success() {
                CommandStatus::Passed
            } else {
                CommandStatus::Failed
            };
            (status, exit.code())
        }
        Waited::Exited(Err(e)) => {
            return Err(CommandError::LaunchFailed {
                program: path.display().to_string(),
                reason: e.to_string(),
            })
        }
        Waited::TimedOut => {
            warn!(env = %env.name(), program = ?path, "Command timed out, killing");
            let _ = child.kill().await;
            (CommandStatus::TimedOut, None)
        }
        Waited::Cancelled => {
            warn!(env = %env.name(), program = ?path, "Run cancelled, killing command");
            let _ = child.kill().await;
            (CommandStatus::Cancelled, None)
        }
    };

    let stdout = drain(stdout).await;
    let stderr = drain(stderr).await;

    Ok(ExitOutcome {
        status,
        exit_code,
        stdout,
        stderr,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        if let Err(e) = stream.read_to_end(&mut buf).await {
            debug!(error = %e, "Failed to read captured stream");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Collect a reader task; grandchildren holding the pipe open are not waited on forever.
async fn drain(task: tokio::task::JoinHandle<String>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

async fn sleep_or_pending(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

fn context_search_path(env: &ScopedEnvironment) -> Option<std::ffi::OsString> {
    let mut paths = vec![env.bin_dir()];
    if let Some(ambient) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&ambient));
    }
    std::env::join_paths(paths).ok()
}

fn is_path_like(program: &str) -> bool {
    program.contains('/') || program.contains(std::path::MAIN_SEPARATOR)
}

fn search_path(program: &str) -> Option<PathBuf> {
    let ambient = std::env::var_os("PATH")?;
    std::env::split_paths(&ambient)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

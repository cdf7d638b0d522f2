//! envrun - run test and lint commands across isolated environments
//!
//! ## Commands
//!
//! - `run`: provision the selected environments and run their commands
//! - `list`: show the declared environments
//! - `show-config`: dump the merged configuration as JSON

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use envrun_ci::{
    render_environment, render_summary, write_json_report, Orchestrator, RunGate, RunOptions,
    Selection,
};
use envrun_core::{cancel_pair, level_for, Config, DEFAULT_CONFIG_FILE};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "envrun")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run commands across isolated, freshly provisioned environments", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE, env = "ENVRUN_CONFIG")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision environments and run their commands
    Run {
        /// Environments to run, comma separated; ALL for every environment
        #[arg(short, long = "env", value_name = "ENVS")]
        envs: Vec<String>,

        /// Maximum environments run at once
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Keep running an environment's commands after one fails
        #[arg(long)]
        continue_on_error: bool,

        /// Leave environment contexts on disk after the run
        #[arg(long)]
        keep_envs: bool,

        /// Write the run report as JSON
        #[arg(long, value_name = "PATH")]
        report_json: Option<PathBuf>,

        /// Arguments substituted for {posargs}
        #[arg(last = true)]
        posargs: Vec<String>,
    },

    /// List declared environments
    List,

    /// Print the merged configuration as JSON
    ShowConfig {
        /// Only show this environment
        #[arg(short, long = "env")]
        env: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    envrun_core::init_tracing(cli.json, level_for(cli.verbose, cli.quiet));

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            envs,
            parallel,
            continue_on_error,
            keep_envs,
            report_json,
            posargs,
        } => {
            let options = RunOptions {
                parallel,
                continue_on_error: continue_on_error.then_some(true),
                keep_envs: keep_envs.then_some(true),
                posargs,
            };
            let selection = Selection::from_args(envs.as_slice());
            cmd_run(&config, &selection, &options, report_json.as_deref()).await
        }
        Commands::List => {
            cmd_list(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::ShowConfig { env } => {
            cmd_show_config(&config, env.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("Failed to load configuration from {path:?}"))
}

async fn cmd_run(
    config: &Config,
    selection: &Selection,
    options: &RunOptions,
    report_json: Option<&Path>,
) -> Result<ExitCode> {
    let orchestrator =
        Orchestrator::from_config(config, options).context("Failed to set up the run")?;

    let (handle, signal) = cancel_pair();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            handle.cancel();
        }
    });

    let report = orchestrator
        .run(config, selection, options, signal)
        .await
        .context("Run could not start")?;
    ctrl_c.abort();

    for env in &report.environments {
        let detail = render_environment(env);
        if !detail.is_empty() {
            print!("{detail}");
        }
    }
    print!("{}", render_summary(&report));

    let verdict = RunGate::evaluate(&report);
    for violation in &verdict.violations {
        info!(violation = %violation, "Gate violation");
    }

    if let Some(path) = report_json {
        write_json_report(path, &report)
            .with_context(|| format!("Failed to write report to {path:?}"))?;
        println!("Report written to {}", path.display());
    }

    Ok(if verdict.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(report.exit_code.clamp(1, 255) as u8)
    })
}

fn cmd_list(config: &Config) {
    let default: Vec<&str> = config.default_selection();
    for spec in config.environments() {
        let marker = if default.contains(&spec.name.as_str()) {
            '*'
        } else {
            ' '
        };
        match &spec.description {
            Some(description) => println!("{marker} {} - {description}", spec.name),
            None => println!("{marker} {}", spec.name),
        }
    }
}

fn cmd_show_config(config: &Config, env: Option<&str>) -> Result<()> {
    let json = match env {
        Some(name) => {
            let spec = config
                .get(name)
                .with_context(|| format!("Unknown environment '{name}'"))?;
            serde_json::to_string_pretty(spec)?
        }
        None => serde_json::to_string_pretty(config)?,
    };
    println!("{json}");
    Ok(())
}

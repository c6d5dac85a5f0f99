//! Bisync CLI - Command-line interface for bisync
//!
//! Provides commands for:
//! - Running a bidirectional sync between two directory trees
//! - Inspecting the history and lockout state of a path pair
//! - Viewing and validating configuration

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bisync_core::config::Config;

mod commands;
mod output;

use commands::{
    completions::CompletionsCommand, config::ConfigCommand, run::RunCommand,
    status::StatusCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "bisync",
    version,
    about = "Bidirectional synchronization of two directory trees"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Synchronize two directory trees
    Run(RunCommand),
    /// Show history and lockout state for a path pair
    Status(StatusCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// Everything a command needs from the global flags
pub struct Invocation {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
    pub config: Config,
}

fn load_config(explicit: Option<&PathBuf>) -> Result<(PathBuf, Config)> {
    match explicit {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            Ok((path.clone(), config))
        }
        None => {
            let path = Config::default_path();
            let config = Config::load_or_default(&path);
            Ok((path, config))
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (config_path, config) = load_config(cli.config.as_ref())?;

    // Setup tracing
    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => config.logging.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let invocation = Invocation {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        quiet: cli.quiet,
        config_path,
        config,
    };

    match cli.command {
        Commands::Run(cmd) => cmd.execute(invocation).await,
        Commands::Status(cmd) => cmd.execute(invocation).await,
        Commands::Config(cmd) => cmd.execute(invocation).await,
        Commands::Completions(cmd) => cmd.execute(invocation).await,
    }
}

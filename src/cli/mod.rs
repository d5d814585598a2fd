//! Command-line interface.
//!
//! Exit codes: `0` when the command succeeded (for `run`, when the target
//! pass rate was reached), `1` when a repair run ended short of the target,
//! `2` on errors.

pub mod commands;
pub mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use commands::classify::ClassifyArgs;
use commands::init::InitArgs;
use commands::parse_logs::ParseLogsArgs;
use commands::patterns::PatternsCommands;
use commands::run::RunArgs;

/// Top-level command-line arguments
#[derive(Parser)]
#[command(name = "patchloop")]
#[command(about = "Smoke-driven repair engine for generated backend services", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .patchloop/config.yaml plus overrides)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the smoke-test and repair loop against an application
    Run(RunArgs),

    /// Classify a single synthetic violation
    Classify(ClassifyArgs),

    /// Extract stack traces from a log file
    ParseLogs(ParseLogsArgs),

    /// Inspect the learned pattern store
    #[command(subcommand)]
    Patterns(PatternsCommands),

    /// Write a default configuration and create the pattern store
    Init(InitArgs),
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<ExitCode> {
    // init writes the config, so it must not depend on loading one
    let config = match cli.command {
        Commands::Init(_) => Config::default(),
        _ => load_config(cli.config.as_ref())?,
    };
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    match cli.command {
        Commands::Run(args) => {
            let reached = commands::run::execute(args, config, cli.json).await?;
            return Ok(if reached { ExitCode::SUCCESS } else { ExitCode::from(1) });
        }
        Commands::Classify(args) => commands::classify::execute(args, cli.json).await?,
        Commands::ParseLogs(args) => commands::parse_logs::execute(args, cli.json).await?,
        Commands::Patterns(command) => {
            commands::patterns::execute(command, &config, cli.json).await?;
        }
        Commands::Init(args) => commands::init::execute(args, cli.json).await?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Print an error in the selected output mode.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ExitCode {
    if json_mode {
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        println!(
            "{}",
            serde_json::json!({ "success": false, "error": err.to_string(), "causes": chain })
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    ExitCode::from(2)
}

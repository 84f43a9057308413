//! deskpilot CLI
//!
//! Usage:
//!   deskpilot run "open notepad and type hello"   # Work on a query
//!   deskpilot run --app calculator "compute 12*7"  # Perceive only one app
//!   deskpilot state --json                         # Dump the current snapshot
//!   deskpilot schedule --every daily --at "2026-03-01 09:00" "archive old mail"

use crate::cli::{Cli, Commands};
use crate::command::{handle_run, handle_schedule, handle_state};
use crate::utils::init_logging;
use anyhow::{Context, Result};
use clap::Parser;
use deskpilot::{Pilot, PilotConfig};
use std::process::ExitCode;
use tracing::error;

mod cli;
mod command;
mod utils;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when a run ended without finishing its query.
async fn run(cli: Cli) -> Result<bool> {
    let config = PilotConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    let _guard = init_logging(cli.verbose, log_dir.as_deref())?;

    let pilot = Pilot::from_config(config).context("starting the desktop session")?;

    match cli.command {
        Commands::Run(args) => handle_run(pilot, args).await,
        Commands::State(args) => handle_state(pilot, args).await.map(|()| true),
        Commands::Schedule(args) => handle_schedule(pilot, args).await.map(|()| true),
    }
}

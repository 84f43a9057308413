use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "deskpilot")]
#[command(about = "Drive the desktop from a natural-language query")]
#[command(
    long_about = "deskpilot observes the desktop through accessibility APIs, asks a reasoning backend for one action at a time and executes it until the query is done."
)]
pub struct Cli {
    /// Path to a YAML config file (defaults to <config dir>/deskpilot/config.yaml)
    #[clap(long, short = 'c', global = true, env = "DESKPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Directory for the daily rolling log file
    #[clap(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Work on a query until it is done, then print the summary
    Run(RunArgs),
    /// Print the current desktop snapshot
    State(StateArgs),
    /// Run a query at a given time and/or on a cadence
    Schedule(ScheduleArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Attach a screenshot to every snapshot
    #[clap(long)]
    pub vision: bool,

    /// Restrict perception to this application's window
    #[clap(long, short = 'a')]
    pub app: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// What to do, e.g. "open notepad and write a haiku"
    pub query: String,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Override the step budget for this run
    #[clap(long)]
    pub max_steps: Option<u32>,

    /// Write the run transcript as JSON to this path
    #[clap(long)]
    pub transcript: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Print the full snapshot as JSON instead of the summary
    #[clap(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    pub query: String,

    /// First firing time: RFC 3339 or local "YYYY-MM-DD HH:MM"
    #[clap(long)]
    pub at: Option<String>,

    /// Repeat cadence: hourly, daily, weekly or a period like 90s, 15m, 2h
    #[clap(long)]
    pub every: Option<String>,

    #[command(flatten)]
    pub target: TargetArgs,
}

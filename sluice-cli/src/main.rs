//! Sluice CLI - Command-line interface
//!
//! Runs buffer controller simulations from the command line.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use sluice_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Buffer admission simulator for adaptive streaming")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Warn)]
    log_level: CliLogLevel,

    /// Directory for the trace log of the run
    #[arg(long)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    commands::handle_command(cli.command).await
}

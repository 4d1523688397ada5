//! Contend CLI - Command-line interface
//!
//! Runs one acquisition strategy against a topology and prints what happened.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use contend_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "contend")]
#[command(about = "Deadlock, livelock and starvation on demand")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level (RUST_LOG overrides)
    #[arg(long, global = true, default_value_t = CliLogLevel::Warn)]
    log_level: CliLogLevel,

    /// Also write a trace-level log of the run into this directory
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing: {error}"))?;

    commands::handle_command(cli.command).await
}

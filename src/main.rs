//! CLI entry point for the CipherSwarm agent.

use anyhow::Result;
use clap::Parser;

use cipherswarm_agent::agent;
use cipherswarm_agent::settings::Settings;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();
    let Command::Start(args) = cli.command;

    // Determine log level based on debug flags.
    // Priority: RUST_LOG env var > extra-debugging > debug > default (info)
    let default_level = if args.extra_debugging {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::resolve(args.into_raw_settings());
    agent::run(settings).await?;
    Ok(())
}

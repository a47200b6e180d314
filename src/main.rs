//! stellar-agentd - container-host node agent daemon
//!
//! Enrolls with a control plane, reconciles local container state, runs
//! cron-style jobs against labeled containers, and serves the inbound
//! HTTPS task-dispatch API.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cmd;

#[derive(Parser)]
#[command(name = "stellar-agentd")]
#[command(about = "Container-host node agent daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<cmd::Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stellar_agent={log_level}").into()),
        )
        .init();

    info!("Starting stellar-agentd v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd::Commands::Diagnostics) => {
            cmd::diagnostics::run().await?;
        }
        None => {
            if let Err(e) = cmd::root::run(&cli.config).await {
                error!("agent error: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

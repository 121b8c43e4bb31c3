//! Fleetwire unified CLI.
//!
//! ```bash
//! # Start the collector
//! fleetwire server --address 0.0.0.0 --port 8675
//!
//! # Start a node agent (new terminal)
//! fleetwire agent --address 127.0.0.1 --port 8675
//!
//! # Run the agent without a collector, logging locally
//! fleetwire agent --serverless
//! ```

mod commands;
mod sources;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Fleetwire - fleet telemetry collection.
#[derive(Parser)]
#[command(name = "fleetwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    logfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node agent.
    Agent {
        /// Collector address (overrides the saved config).
        #[arg(short, long)]
        address: Option<String>,

        /// Collector port (overrides the saved config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Skip the collector and log the healthbeat locally.
        #[arg(long)]
        serverless: bool,

        /// Directory for agent state (also: FLEETWIRE_PATH).
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Run the collector.
    Server {
        /// Address to bind (overrides settings).
        #[arg(short, long)]
        address: Option<String>,

        /// Port to bind (overrides settings).
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory holding fleetwire.toml and the behavior config.
        #[arg(short, long)]
        config_dir: Option<PathBuf>,
    },
}

fn init_logging(logfile: Option<&PathBuf>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open logfile {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.logfile.as_ref())?;

    match cli.command {
        Commands::Agent {
            address,
            port,
            serverless,
            state_dir,
        } => commands::agent::run(address, port, serverless, state_dir),
        Commands::Server {
            address,
            port,
            config_dir,
        } => commands::server::run(address, port, config_dir),
    }
}

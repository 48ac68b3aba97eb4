//! CLI entry point for the drone relay.
//!
//! # Usage
//!
//! Run the relay with the default configuration search path:
//! ```bash
//! drone-relay run
//! ```
//!
//! Run with an explicit configuration file:
//! ```bash
//! drone-relay run --config config/relay.toml
//! ```
//!
//! Validate a configuration without starting anything:
//! ```bash
//! drone-relay check-config --config config/relay.toml
//! ```

// Global allocator: mimalloc for multi-connection workloads.
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use drone_relay::app::RelayApp;
use drone_relay::config::RelayConfig;
use drone_relay::logging;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "drone-relay")]
#[command(about = "Store-and-forward telemetry relay between sensors and a collector", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/relay.toml, falling back to
    /// built-in defaults when absent).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay daemon.
    Run,
    /// Load and validate the configuration, then exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RelayConfig::load_from(path)?,
        None => RelayConfig::load()?,
    };

    match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::CheckConfig => {
            config.validate()?;
            println!("configuration OK");
            Ok(())
        }
    }
}

async fn run_relay(config: RelayConfig) -> Result<()> {
    logging::init_from_config(&config)?;

    let app = RelayApp::new(config)?;
    let running = app.start().await?;
    let handle = running.handle();

    let mut relay_done = tokio::spawn(running.wait());
    tokio::select! {
        result = &mut relay_done => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            handle.shutdown().await?;
            relay_done.await??;
        }
    }

    Ok(())
}

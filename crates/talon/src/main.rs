//! Talon - HTTP/1.1 engine CLI
//!
//! # Usage
//! ```bash
//! talon --config talon.toml
//! talon --config talon.toml --check    # Validate config only
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use talon_config::ConfigLoader;
use talon_server::{EchoHandler, Server};

/// Talon - a hand-rolled HTTP/1.1 engine
#[derive(Parser, Debug)]
#[command(name = "talon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "talon.toml")]
    config: PathBuf,

    /// Validate configuration and exit
    #[arg(long)]
    check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    tracing::info!("Talon v{}", env!("CARGO_PKG_VERSION"));

    let loader = if args.config.exists() {
        ConfigLoader::load_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        tracing::warn!(path = ?args.config, "config file not found, using defaults");
        ConfigLoader::new()
    };

    let config = loader.get();

    if args.check {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    tracing::info!(addr = %config.server.listen, "Starting Talon server...");
    let server = Server::new(config.server.clone(), EchoHandler);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down gracefully");
            shutdown.notify_one();
        }
    });

    server.run().await?;

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

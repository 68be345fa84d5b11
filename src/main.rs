//! tcplb - a Layer 4 TCP load balancer
//!
//! Usage:
//!     tcplb [--config <path>]
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use tcplb::config::{Config, load_config, validate_config};
use tcplb::util::init_logging;
use tcplb::Server;

/// A Layer 4 TCP load balancer.
#[derive(Parser, Debug)]
#[command(name = "tcplb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file; built-in defaults are used without one
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| {
            format!("failed to load configuration from '{}'", path.display())
        })?,
        None => {
            let config = Config::default();
            validate_config(&config)
                .map_err(anyhow::Error::msg)
                .context("built-in default configuration is invalid")?;
            config
        }
    };

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, config.global.log_format);

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.load_balancer.listen_address);
        println!("  Algorithm: {:?}", config.load_balancer.algorithm);
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!("    - {}", backend.backend_address());
        }
        return Ok(());
    }

    info!(
        config_path = ?cli.config,
        listen = %config.load_balancer.listen_address,
        algorithm = ?config.load_balancer.algorithm,
        backends = config.backends.len(),
        "tcplb starting"
    );

    for backend in &config.backends {
        info!(backend = %backend.backend_address(), "configured backend");
    }

    run(config)
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async {
        info!("press Ctrl+C to stop");
        Server::run(&config, shutdown_signal())
            .await
            .context("failed to start load balancer")
    })?;

    info!("tcplb shut down complete");
    Ok(())
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}

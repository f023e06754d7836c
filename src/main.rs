//! Trade orchestrator daemon for multi-signature custodial wallets
//!
//! # WARNING
//! - This service trades with real funds through owner-controlled wallets.
//! - Standing max allowances are granted to the configured aggregator
//!   spender; only point it at contracts you trust.
//! - TP/SL monitoring is best-effort; fast markets can gap through stops.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

// Use the library crate
use safe_trader::cli::commands;
use safe_trader::config::Config;

/// Signal-driven trade orchestrator for multi-signature wallets
#[derive(Parser)]
#[command(name = "safe-trader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator
    Start {
        /// Run the full pipeline without broadcasting transactions
        #[arg(long)]
        dry_run: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check collaborator health (chain RPCs, price feed, aggregator)
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("safe_trader=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start { dry_run } => {
            if let Err(e) = startup_checks(&config, dry_run) {
                error!("Startup checks failed: {}", e);
                std::process::exit(1);
            }
            commands::start(&config, dry_run).await
        }
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Refuse to start live trading with an incomplete signer setup
fn startup_checks(config: &Config, dry_run: bool) -> Result<()> {
    info!("Performing startup checks...");

    if !dry_run {
        if config.signer.endpoint.is_empty() {
            anyhow::bail!(
                "signer.endpoint is not configured. Set TRADER_SIGNER__ENDPOINT or \
                 run with --dry-run."
            );
        }
        if config.signer.address.is_empty() {
            anyhow::bail!("signer.address is not configured");
        }
        if !safe_trader::signal::is_address(&config.signer.address) {
            anyhow::bail!(
                "signer.address {} is not a valid address",
                config.signer.address
            );
        }
    }

    info!(
        "Startup checks passed ({} chains, {} canonical tokens)",
        config.chains.len(),
        config.tokens.len()
    );
    Ok(())
}

//! Command implementations: wiring, the run loop, config display, health

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::aggregator::{DexAggregator, HttpAggregator};
use crate::adapters::bus::LogBus;
use crate::adapters::directory::HttpDirectory;
use crate::adapters::price::{HttpPriceFeed, PriceFeed};
use crate::adapters::registry::{ListingIndexClient, TokenLookup, TokenRegistryClient};
use crate::adapters::rpc::{HttpRpcProvider, RpcProvider};
use crate::adapters::signer::RpcSigner;
use crate::config::Config;
use crate::monitor::PositionMonitor;
use crate::resolver::TokenResolver;
use crate::retry::RetryPolicy;
use crate::scheduler::Orchestrator;
use crate::sizing::PositionSizer;
use crate::trading::allowance::AllowanceManager;
use crate::trading::executor::{ChainContext, DryRunExecutor, Execute, TradeExecutor};
use crate::trading::route::RouteProvider;
use crate::wallet::validator::WalletValidator;

/// Everything a running engine needs
pub struct App {
    pub orchestrator: Arc<Orchestrator>,
    pub monitor: Arc<PositionMonitor>,
    monitor_rx: Option<mpsc::Receiver<crate::monitor::MonitorEvent>>,
    shutdown: CancellationToken,
}

impl App {
    pub fn build(config: &Config, dry_run: bool) -> Result<Self> {
        let shutdown = CancellationToken::new();

        let mut rpcs: HashMap<String, Arc<dyn RpcProvider>> = HashMap::new();
        let mut chain_ids: HashMap<String, u64> = HashMap::new();
        let mut chain_contexts: HashMap<String, ChainContext> = HashMap::new();
        for (network, chain) in &config.chains {
            let rpc: Arc<dyn RpcProvider> = Arc::new(
                HttpRpcProvider::new(
                    &chain.rpc_url,
                    Duration::from_secs(chain.rpc_timeout_secs),
                )
                .with_context(|| format!("rpc for {}", network))?,
            );
            rpcs.insert(network.clone(), rpc.clone());
            chain_ids.insert(network.clone(), chain.chain_id);
            chain_contexts.insert(
                network.clone(),
                ChainContext {
                    rpc,
                    chain_id: chain.chain_id,
                    permit_contract: chain.permit_contract.clone(),
                    gas_floor_wei: gwei_to_wei(chain.gas_floor_gwei),
                    receipt_wait: Duration::from_secs(chain.receipt_wait_secs),
                },
            );
        }

        let registry_timeout = Duration::from_secs(config.registry.http_timeout_secs);
        let sources: Vec<Arc<dyn TokenLookup>> = vec![
            Arc::new(TokenRegistryClient::new(
                &config.registry.metadata_url,
                registry_timeout,
            )?),
            Arc::new(ListingIndexClient::new(
                &config.registry.listing_url,
                registry_timeout,
                config.registry.verified_liquidity_usd,
            )?),
        ];
        let resolver = Arc::new(TokenResolver::new(
            &config.tokens,
            sources,
            Duration::from_secs(config.registry.cache_ttl_secs),
            Duration::from_secs(config.registry.negative_cache_ttl_secs),
        ));

        let validator = Arc::new(WalletValidator::new(
            rpcs.clone(),
            Duration::from_secs(config.wallet.cache_ttl_secs),
        ));
        let sizer = Arc::new(PositionSizer::new(
            rpcs.clone(),
            config.native_gas_reserve(),
            config.trading.min_usd_amount,
            config.trading.max_position_percentage,
        ));

        let aggregator: Arc<dyn DexAggregator> = Arc::new(HttpAggregator::new(
            &config.aggregator.base_url,
            &config.aggregator.api_key,
            Duration::from_secs(config.aggregator.http_timeout_secs),
        )?);
        let route = Arc::new(RouteProvider::new(
            aggregator,
            RetryPolicy::new(
                config.aggregator.quote_retry_attempts,
                Duration::from_millis(config.aggregator.quote_retry_base_ms),
                Duration::from_millis(config.aggregator.quote_retry_cap_ms),
            ),
            &config.aggregator.native_sentinel,
        ));

        let directory = Arc::new(HttpDirectory::new(
            &config.directory.base_url,
            Duration::from_secs(config.directory.http_timeout_secs),
        )?);

        let executor: Arc<dyn Execute> = if dry_run {
            warn!("dry run: trades will not be broadcast");
            Arc::new(DryRunExecutor)
        } else {
            let signer = Arc::new(RpcSigner::new(
                &config.signer.endpoint,
                &config.signer.address,
                Duration::from_secs(config.signer.http_timeout_secs),
            )?);
            Arc::new(TradeExecutor::new(
                chain_contexts,
                route.clone(),
                AllowanceManager::default(),
                signer,
                config.trading.default_slippage_bps,
                config.trading.gas_bump_percent,
            ))
        };

        let price_feed = Arc::new(HttpPriceFeed::new(
            &config.price_feed.base_url,
            Duration::from_secs(config.price_feed.http_timeout_secs),
        )?);
        let (monitor_tx, monitor_rx) = mpsc::channel(config.monitor.emission_capacity);
        let monitor = Arc::new(PositionMonitor::new(
            price_feed,
            config.monitor.clone(),
            monitor_tx,
            shutdown.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            config.trading.clone(),
            config.scheduler.clone(),
            config.monitor.trailing_stop_enabled,
            chain_ids,
            resolver,
            directory,
            validator,
            sizer,
            route,
            executor,
            monitor.clone(),
            Arc::new(LogBus),
            shutdown.clone(),
        ));

        Ok(Self {
            orchestrator,
            monitor,
            monitor_rx: Some(monitor_rx),
            shutdown,
        })
    }

    /// Run until interrupted, then drain
    pub async fn run(mut self) -> Result<()> {
        let monitor_rx = self
            .monitor_rx
            .take()
            .context("run called twice on the same app")?;
        self.monitor.start();
        self.orchestrator.start(monitor_rx);
        info!("trade orchestrator running; waiting for signals");

        let status_orchestrator = self.orchestrator.clone();
        let status_monitor = self.monitor.clone();
        let status_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let watched = status_monitor.watched_count().await;
                        info!(
                            open_trades = status_orchestrator.open_trades().len(),
                            queued = status_orchestrator.queue_len(),
                            watched = watched,
                            "status"
                        );
                    }
                    _ = status_shutdown.cancelled() => break,
                }
            }
        });

        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        info!("interrupt received, shutting down");
        self.orchestrator.shutdown_now().await;
        Ok(())
    }
}

fn gwei_to_wei(gwei: f64) -> primitive_types::U256 {
    primitive_types::U256::from((gwei * 1e9) as u128)
}

/// Start the engine
pub async fn start(config: &Config, dry_run: bool) -> Result<()> {
    let app = App::build(config, dry_run)?;
    app.run().await
}

/// Print the effective configuration with secrets masked
pub fn show_config(config: &Config) -> Result<()> {
    println!("chains:");
    let mut networks: Vec<_> = config.chains.keys().collect();
    networks.sort();
    for network in networks {
        let chain = &config.chains[network];
        println!(
            "  {:<12} chain_id={} rpc={} permit={}",
            network,
            chain.chain_id,
            mask_url(&chain.rpc_url),
            chain.permit_contract.as_deref().unwrap_or("-"),
        );
    }
    println!(
        "trading: base={} position={}% (max {}%) slippage={}bps tp1_exit={}%",
        config.trading.base_symbol,
        config.trading.position_percentage,
        config.trading.max_position_percentage,
        config.trading.default_slippage_bps,
        config.trading.tp1_exit_percentage,
    );
    println!(
        "monitor: tick={}s trailing={} retracement={}%",
        config.monitor.tick_seconds,
        config.monitor.trailing_stop_enabled,
        config.monitor.trailing_retracement_pct,
    );
    println!(
        "scheduler: fan_out={} dedup={} exit_retries={}",
        config.scheduler.executor_fan_out,
        config.scheduler.dedup_capacity,
        config.scheduler.exit_retry_max,
    );
    println!("aggregator: {}", mask_url(&config.aggregator.base_url));
    println!(
        "signer: {} ({})",
        if config.signer.endpoint.is_empty() {
            "<unset>"
        } else {
            "<configured>"
        },
        if config.signer.address.is_empty() {
            "no address"
        } else {
            &config.signer.address
        },
    );
    println!("tokens: {} canonical entries", config.tokens.len());
    Ok(())
}

/// Probe each collaborator and report reachability
pub async fn health(config: &Config) -> Result<()> {
    let mut healthy = true;

    for (network, chain) in &config.chains {
        let probe = async {
            let rpc = HttpRpcProvider::new(
                &chain.rpc_url,
                Duration::from_secs(chain.rpc_timeout_secs),
            )?;
            rpc.fee_data().await
        };
        match probe.await {
            Ok(fee) => println!(
                "chain {:<12} OK (eip1559={})",
                network,
                fee.supports_eip1559()
            ),
            Err(e) => {
                healthy = false;
                println!("chain {:<12} FAIL: {}", network, e);
            }
        }
    }

    let feed = HttpPriceFeed::new(
        &config.price_feed.base_url,
        Duration::from_secs(config.price_feed.http_timeout_secs),
    )?;
    match feed.price(&config.trading.base_symbol).await {
        Ok(Some(point)) => println!(
            "price feed   OK ({} = ${:.4})",
            config.trading.base_symbol, point.price_usd
        ),
        Ok(None) => println!("price feed   OK (no quote for {})", config.trading.base_symbol),
        Err(e) => {
            healthy = false;
            println!("price feed   FAIL: {}", e);
        }
    }

    let aggregator = HttpAggregator::new(
        &config.aggregator.base_url,
        &config.aggregator.api_key,
        Duration::from_secs(config.aggregator.http_timeout_secs),
    )?;
    if let Some(chain) = config.chains.values().next() {
        match aggregator
            .min_sell_amount(&config.trading.base_symbol, chain.chain_id)
            .await
        {
            Ok(_) => println!("aggregator   OK"),
            Err(e) => {
                healthy = false;
                println!("aggregator   FAIL: {}", e);
            }
        }
    }

    if !healthy {
        anyhow::bail!("one or more collaborators are unreachable");
    }
    Ok(())
}

fn mask_url(url: &str) -> String {
    // Keep scheme and host; API keys often ride in the path or query
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split(['/', '?']).next().unwrap_or(rest);
            format!("{}://{}/…", scheme, host)
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_url_hides_path() {
        assert_eq!(
            mask_url("https://rpc.example.com/v2/supersecretkey"),
            "https://rpc.example.com/…"
        );
        assert_eq!(mask_url("not a url"), "not a url");
    }

    #[test]
    fn test_gwei_to_wei() {
        assert_eq!(gwei_to_wei(0.1), primitive_types::U256::from(100_000_000u64));
        assert_eq!(
            gwei_to_wei(30.0),
            primitive_types::U256::from(30_000_000_000u64)
        );
    }
}

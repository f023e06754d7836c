//! Configuration loading and validation

use anyhow::{Context, Result};
use primitive_types::U256;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Tradable networks keyed by network key ("arbitrum", "base", ...)
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub aggregator: AggregatorConfig,
    pub price_feed: PriceFeedConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    /// Built-in canonical token table; highest-priority resolver source
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
    /// Canonical permit contract requiring its own allowance, if in use
    #[serde(default)]
    pub permit_contract: Option<String>,
    #[serde(default = "default_gas_floor_gwei")]
    pub gas_floor_gwei: f64,
    #[serde(default = "default_receipt_wait_secs")]
    pub receipt_wait_secs: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Stablecoin used as the base side of every trade
    #[serde(default = "default_base_symbol")]
    pub base_symbol: String,
    #[serde(default = "default_position_percentage")]
    pub position_percentage: u32,
    #[serde(default = "default_min_usd_amount")]
    pub min_usd_amount: f64,
    #[serde(default = "default_max_position_percentage")]
    pub max_position_percentage: u32,
    /// Raw native units kept unspent for gas when selling the native asset
    #[serde(default = "default_native_gas_reserve")]
    pub native_gas_reserve_raw: String,
    #[serde(default = "default_slippage_bps")]
    pub default_slippage_bps: u32,
    #[serde(default = "default_gas_bump_percent")]
    pub gas_bump_percent: u32,
    /// Fraction of the position sold when TP1 fires (100 = full exit)
    #[serde(default = "default_tp1_exit_percentage")]
    pub tp1_exit_percentage: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    #[serde(default = "default_true")]
    pub trailing_stop_enabled: bool,
    #[serde(default = "default_trailing_retracement_pct")]
    pub trailing_retracement_pct: f64,
    #[serde(default = "default_emission_capacity")]
    pub emission_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_executor_fan_out")]
    pub executor_fan_out: usize,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_exit_retry_base_secs")]
    pub exit_retry_base_secs: u64,
    #[serde(default = "default_exit_retry_cap_secs")]
    pub exit_retry_cap_secs: u64,
    #[serde(default = "default_exit_retry_max")]
    pub exit_retry_max: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_wallet_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_aggregator_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Sentinel contract address the aggregator uses for native assets
    #[serde(default = "default_native_sentinel")]
    pub native_sentinel: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_quote_retry_attempts")]
    pub quote_retry_attempts: u32,
    #[serde(default = "default_quote_retry_base_ms")]
    pub quote_retry_base_ms: u64,
    #[serde(default = "default_quote_retry_cap_ms")]
    pub quote_retry_cap_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceFeedConfig {
    #[serde(default = "default_price_feed_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    #[serde(default = "default_listing_url")]
    pub listing_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Listing-index liquidity above which a binding counts as verified
    #[serde(default = "default_verified_liquidity_usd")]
    pub verified_liquidity_usd: f64,
    #[serde(default = "default_resolver_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_negative_cache_ttl_secs")]
    pub negative_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the user/wallet directory service
    #[serde(default = "default_directory_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_directory_url(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_directory_url() -> String {
    "http://localhost:8081".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignerConfig {
    /// JSON-RPC endpoint of the agent signer service
    #[serde(default)]
    pub endpoint: String,
    /// Address of the agent key, registered as a wallet owner
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// One canonical token deployment known at startup
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub symbol: String,
    pub network: String,
    pub address: String,
    pub decimals: u8,
    #[serde(default)]
    pub native: bool,
}

fn default_true() -> bool {
    true
}
fn default_native_symbol() -> String {
    "ETH".to_string()
}
fn default_native_decimals() -> u8 {
    18
}
fn default_gas_floor_gwei() -> f64 {
    0.1
}
fn default_receipt_wait_secs() -> u64 {
    120
}
fn default_rpc_timeout_secs() -> u64 {
    10
}
fn default_base_symbol() -> String {
    "USDC".to_string()
}
fn default_position_percentage() -> u32 {
    20
}
fn default_min_usd_amount() -> f64 {
    0.01
}
fn default_max_position_percentage() -> u32 {
    80
}
fn default_native_gas_reserve() -> String {
    // 0.001 in 18-decimal native units
    "1000000000000000".to_string()
}
fn default_slippage_bps() -> u32 {
    50
}
fn default_gas_bump_percent() -> u32 {
    20
}
fn default_tp1_exit_percentage() -> u32 {
    100
}
fn default_tick_seconds() -> u64 {
    30
}
fn default_trailing_retracement_pct() -> f64 {
    2.0
}
fn default_emission_capacity() -> usize {
    256
}
fn default_executor_fan_out() -> usize {
    8
}
fn default_dedup_capacity() -> usize {
    10_000
}
fn default_exit_retry_base_secs() -> u64 {
    1
}
fn default_exit_retry_cap_secs() -> u64 {
    30
}
fn default_exit_retry_max() -> u32 {
    5
}
fn default_wallet_cache_ttl_secs() -> u64 {
    120
}
fn default_aggregator_url() -> String {
    "https://api.0x.org".to_string()
}
fn default_native_sentinel() -> String {
    "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee".to_string()
}
fn default_http_timeout_secs() -> u64 {
    5
}
fn default_quote_retry_attempts() -> u32 {
    3
}
fn default_quote_retry_base_ms() -> u64 {
    500
}
fn default_quote_retry_cap_ms() -> u64 {
    4_000
}
fn default_price_feed_url() -> String {
    "https://api.dexscreener.com".to_string()
}
fn default_metadata_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_listing_url() -> String {
    "https://api.dexscreener.com".to_string()
}
fn default_verified_liquidity_usd() -> f64 {
    10_000.0
}
fn default_resolver_cache_ttl_secs() -> u64 {
    300
}
fn default_negative_cache_ttl_secs() -> u64 {
    60
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            base_symbol: default_base_symbol(),
            position_percentage: default_position_percentage(),
            min_usd_amount: default_min_usd_amount(),
            max_position_percentage: default_max_position_percentage(),
            native_gas_reserve_raw: default_native_gas_reserve(),
            default_slippage_bps: default_slippage_bps(),
            gas_bump_percent: default_gas_bump_percent(),
            tp1_exit_percentage: default_tp1_exit_percentage(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            trailing_stop_enabled: true,
            trailing_retracement_pct: default_trailing_retracement_pct(),
            emission_capacity: default_emission_capacity(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            executor_fan_out: default_executor_fan_out(),
            dedup_capacity: default_dedup_capacity(),
            exit_retry_base_secs: default_exit_retry_base_secs(),
            exit_retry_cap_secs: default_exit_retry_cap_secs(),
            exit_retry_max: default_exit_retry_max(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_wallet_cache_ttl_secs(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix TRADER_)
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("At least one chain must be configured");
        }

        if self.trading.position_percentage < 1 || self.trading.position_percentage > 80 {
            anyhow::bail!(
                "trading.position_percentage must be 1..=80, got {}",
                self.trading.position_percentage
            );
        }

        if self.trading.max_position_percentage < self.trading.position_percentage
            || self.trading.max_position_percentage > 100
        {
            anyhow::bail!(
                "trading.max_position_percentage must be {}..=100, got {}",
                self.trading.position_percentage,
                self.trading.max_position_percentage
            );
        }

        if self.trading.tp1_exit_percentage < 1 || self.trading.tp1_exit_percentage > 100 {
            anyhow::bail!(
                "trading.tp1_exit_percentage must be 1..=100, got {}",
                self.trading.tp1_exit_percentage
            );
        }

        U256::from_dec_str(&self.trading.native_gas_reserve_raw)
            .map_err(|e| anyhow::anyhow!("trading.native_gas_reserve_raw is not an integer: {}", e))?;

        if self.monitor.tick_seconds == 0 {
            anyhow::bail!("monitor.tick_seconds must be positive");
        }

        if self.scheduler.executor_fan_out == 0 {
            anyhow::bail!("scheduler.executor_fan_out must be positive");
        }

        for token in &self.tokens {
            if !self.chains.contains_key(&token.network) {
                anyhow::bail!(
                    "token {} references unconfigured network {}",
                    token.symbol,
                    token.network
                );
            }
        }

        Ok(())
    }

    /// The parsed native gas reserve; validated at load time
    pub fn native_gas_reserve(&self) -> U256 {
        U256::from_dec_str(&self.trading.native_gas_reserve_raw).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        let mut chains = HashMap::new();
        chains.insert(
            "arbitrum".to_string(),
            ChainConfig {
                rpc_url: "http://localhost:8545".into(),
                chain_id: 42161,
                native_symbol: default_native_symbol(),
                native_decimals: 18,
                permit_contract: None,
                gas_floor_gwei: default_gas_floor_gwei(),
                receipt_wait_secs: default_receipt_wait_secs(),
                rpc_timeout_secs: default_rpc_timeout_secs(),
            },
        );
        Config {
            chains,
            trading: TradingConfig::default(),
            monitor: MonitorConfig::default(),
            scheduler: SchedulerConfig::default(),
            wallet: WalletConfig::default(),
            aggregator: AggregatorConfig {
                base_url: default_aggregator_url(),
                api_key: String::new(),
                native_sentinel: default_native_sentinel(),
                http_timeout_secs: 5,
                quote_retry_attempts: 3,
                quote_retry_base_ms: 500,
                quote_retry_cap_ms: 4_000,
            },
            price_feed: PriceFeedConfig {
                base_url: default_price_feed_url(),
                http_timeout_secs: 5,
            },
            registry: RegistryConfig {
                metadata_url: default_metadata_url(),
                listing_url: default_listing_url(),
                http_timeout_secs: 5,
                verified_liquidity_usd: default_verified_liquidity_usd(),
                cache_ttl_secs: 300,
                negative_cache_ttl_secs: 60,
            },
            directory: DirectoryConfig::default(),
            signer: SignerConfig::default(),
            tokens: vec![],
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = minimal_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.position_percentage, 20);
        assert_eq!(config.trading.default_slippage_bps, 50);
        assert_eq!(config.monitor.tick_seconds, 30);
        assert_eq!(config.scheduler.executor_fan_out, 8);
        assert_eq!(
            config.native_gas_reserve(),
            U256::from(1_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_validate_rejects_bad_percentage() {
        let mut config = minimal_config();
        config.trading.position_percentage = 0;
        assert!(config.validate().is_err());
        config.trading.position_percentage = 81;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_token_network() {
        let mut config = minimal_config();
        config.tokens.push(TokenEntry {
            symbol: "USDC".into(),
            network: "ethereum".into(),
            address: "0xa0b8".into(),
            decimals: 6,
            native: false,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_chains() {
        let mut config = minimal_config();
        config.chains.clear();
        assert!(config.validate().is_err());
    }
}

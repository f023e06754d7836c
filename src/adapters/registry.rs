//! Token metadata sources
//!
//! Two collaborators answer "which contracts carry this symbol": an
//! external token-metadata registry and a DEX listing index. Both satisfy
//! [`TokenLookup`]; the resolver unions their answers under the source
//! priorities of the built-in table first, registry second, listings last.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resolver::{BindingSource, TokenBinding};

#[async_trait]
pub trait TokenLookup: Send + Sync {
    /// All known deployments of `symbol`; empty when the source has none
    async fn lookup(&self, symbol: &str) -> Result<Vec<TokenBinding>>;

    fn source(&self) -> BindingSource;
}

#[derive(Debug, Deserialize)]
struct WireRegistryToken {
    symbol: String,
    #[serde(rename = "networkKey")]
    network: String,
    #[serde(rename = "contractAddress")]
    contract_address: String,
    decimals: u8,
    #[serde(default, rename = "isNative")]
    is_native: bool,
}

#[derive(Debug, Deserialize)]
struct WireRegistryResponse {
    #[serde(default)]
    tokens: Vec<WireRegistryToken>,
}

/// Token-metadata registry client
pub struct TokenRegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl TokenRegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("registry client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TokenLookup for TokenRegistryClient {
    async fn lookup(&self, symbol: &str) -> Result<Vec<TokenBinding>> {
        let url = format!("{}/tokens", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| Error::PriceDataUnavailable(format!("registry {}: {}", symbol, e)))?;

        if !response.status().is_success() {
            return Err(Error::PriceDataUnavailable(format!(
                "registry returned {}",
                response.status()
            )));
        }

        let body: WireRegistryResponse = response
            .json()
            .await
            .map_err(|e| Error::PriceDataUnavailable(format!("registry {}: {}", symbol, e)))?;

        Ok(body
            .tokens
            .into_iter()
            .filter(|t| t.symbol.eq_ignore_ascii_case(symbol))
            .map(|t| TokenBinding {
                symbol: t.symbol.to_uppercase(),
                network: t.network,
                contract_address: t.contract_address.to_lowercase(),
                decimals: t.decimals,
                is_native: t.is_native,
                source: BindingSource::Registry,
                verified: false,
            })
            .collect())
    }

    fn source(&self) -> BindingSource {
        BindingSource::Registry
    }
}

#[derive(Debug, Deserialize)]
struct WireListingPair {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "baseToken")]
    base_token: WireListingToken,
    liquidity: Option<WireListingLiquidity>,
}

#[derive(Debug, Deserialize)]
struct WireListingToken {
    address: String,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireListingLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireListingResponse {
    pairs: Option<Vec<WireListingPair>>,
}

/// DEX listing-index client; only the base side of a pair identifies the
/// token, and listings above the liquidity threshold count as verified
pub struct ListingIndexClient {
    client: reqwest::Client,
    base_url: String,
    verified_liquidity_usd: f64,
}

impl ListingIndexClient {
    pub fn new(base_url: &str, timeout: Duration, verified_liquidity_usd: f64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("listing client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            verified_liquidity_usd,
        })
    }
}

#[async_trait]
impl TokenLookup for ListingIndexClient {
    async fn lookup(&self, symbol: &str) -> Result<Vec<TokenBinding>> {
        let url = format!("{}/latest/dex/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", symbol)])
            .send()
            .await
            .map_err(|e| Error::PriceDataUnavailable(format!("listing {}: {}", symbol, e)))?;

        if !response.status().is_success() {
            return Err(Error::PriceDataUnavailable(format!(
                "listing index returned {}",
                response.status()
            )));
        }

        let body: WireListingResponse = response
            .json()
            .await
            .map_err(|e| Error::PriceDataUnavailable(format!("listing {}: {}", symbol, e)))?;

        let mut out = Vec::new();
        for pair in body.pairs.unwrap_or_default() {
            let matches = pair
                .base_token
                .symbol
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case(symbol))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let liquidity = pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
            out.push(TokenBinding {
                symbol: symbol.to_uppercase(),
                network: pair.chain_id,
                contract_address: pair.base_token.address.to_lowercase(),
                // Listing indexes don't carry decimals; 18 is the ERC-20
                // default and canonical sources override it on merge
                decimals: 18,
                is_native: false,
                source: BindingSource::DexListing,
                verified: liquidity >= self.verified_liquidity_usd,
            });
        }
        debug!(symbol, count = out.len(), "listing index lookup");
        Ok(out)
    }

    fn source(&self) -> BindingSource {
        BindingSource::DexListing
    }
}

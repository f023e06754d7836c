//! Price feed collaborator
//!
//! The monitor drives everything off USD prices from this feed. Lookups are
//! batched per tick so fifty trades on three symbols cost three requests,
//! not fifty.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PricePoint {
    pub price_usd: f64,
    pub change_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Current USD price; `None` for an unknown token
    async fn price(&self, symbol: &str) -> Result<Option<PricePoint>>;

    /// Batched lookup; missing symbols are simply absent from the map
    async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, PricePoint>>;
}

#[derive(Debug, Deserialize)]
struct WirePair {
    #[serde(rename = "baseToken")]
    base_token: WireBaseToken,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    #[serde(rename = "priceChange")]
    price_change: Option<WirePriceChange>,
    volume: Option<WireVolume>,
    liquidity: Option<WireLiquidity>,
}

#[derive(Debug, Deserialize)]
struct WireBaseToken {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePriceChange {
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireVolume {
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireSearchResponse {
    pairs: Option<Vec<WirePair>>,
}

/// HTTP market-data client; picks the deepest pair quoting the symbol
pub struct HttpPriceFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceFeed {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("price feed client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn search(&self, symbol: &str) -> Result<Vec<WirePair>> {
        let url = format!("{}/latest/dex/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", symbol)])
            .send()
            .await
            .map_err(|e| Error::PriceDataUnavailable(format!("{}: {}", symbol, e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::ApiRateLimited("price feed".into()));
        }
        if !response.status().is_success() {
            return Err(Error::PriceDataUnavailable(format!(
                "price feed returned {}",
                response.status()
            )));
        }

        let body: WireSearchResponse = response
            .json()
            .await
            .map_err(|e| Error::PriceDataUnavailable(format!("{}: {}", symbol, e)))?;
        Ok(body.pairs.unwrap_or_default())
    }

    fn best_price(symbol: &str, pairs: Vec<WirePair>) -> Option<PricePoint> {
        let mut best: Option<(f64, PricePoint)> = None;
        for pair in pairs {
            let matches = pair
                .base_token
                .symbol
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case(symbol))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let price: f64 = match pair.price_usd.as_deref().and_then(|p| p.parse().ok()) {
                Some(p) if p > 0.0 => p,
                _ => continue,
            };
            let liquidity = pair.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0);
            let point = PricePoint {
                price_usd: price,
                change_24h: pair.price_change.as_ref().and_then(|c| c.h24),
                volume_24h: pair.volume.as_ref().and_then(|v| v.h24),
                at: Utc::now(),
            };
            match &best {
                Some((best_liquidity, _)) if *best_liquidity >= liquidity => {}
                _ => best = Some((liquidity, point)),
            }
        }
        best.map(|(_, point)| point)
    }
}

#[async_trait]
impl PriceFeed for HttpPriceFeed {
    async fn price(&self, symbol: &str) -> Result<Option<PricePoint>> {
        let pairs = self.search(symbol).await?;
        Ok(Self::best_price(symbol, pairs))
    }

    async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, PricePoint>> {
        let lookups = symbols.iter().map(|symbol| async move {
            (symbol.clone(), self.price(symbol).await)
        });
        let mut out = HashMap::with_capacity(symbols.len());
        for (symbol, result) in futures::future::join_all(lookups).await {
            match result {
                Ok(Some(point)) => {
                    out.insert(symbol, point);
                }
                Ok(None) => {
                    debug!(symbol = %symbol, "price feed has no pair for symbol");
                }
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "price lookup failed in batch");
                }
            }
        }
        Ok(out)
    }
}

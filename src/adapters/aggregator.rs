//! DEX aggregator collaborator
//!
//! The aggregator turns (sell, buy, amount, slippage) into a single
//! executable call plus the spender that must hold the sell-side allowance.
//! The call is opaque to the pipeline; only `spender` is inspected.

use async_trait::async_trait;
use primitive_types::U256;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// A single-use executable swap
#[derive(Debug, Clone)]
pub struct Quote {
    pub to: String,
    pub data: Vec<u8>,
    pub value: U256,
    pub gas_hint: Option<U256>,
    /// Contract that must be approved to move the sell token
    pub spender: String,
    /// Informational only; settlement is defined by the swap itself
    pub buy_amount_hint_raw: U256,
}

#[async_trait]
pub trait DexAggregator: Send + Sync {
    async fn quote(
        &self,
        chain_id: u64,
        wallet_address: &str,
        sell_contract: &str,
        buy_contract: &str,
        sell_amount_raw: U256,
        slippage_bps: u32,
    ) -> Result<Quote>;

    /// Advisory minimum sell amount for a token, if the aggregator has one
    async fn min_sell_amount(&self, symbol: &str, chain_id: u64) -> Result<Option<U256>>;
}

#[derive(Debug, Deserialize)]
struct WireQuote {
    to: String,
    data: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    gas: Option<String>,
    #[serde(rename = "allowanceTarget")]
    allowance_target: Option<String>,
    #[serde(rename = "buyAmount", default)]
    buy_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMinAmount {
    #[serde(rename = "minSellAmount")]
    min_sell_amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// HTTP aggregator client
pub struct HttpAggregator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpAggregator {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("aggregator client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn parse_amount(value: Option<&str>) -> U256 {
        match value {
            Some(s) if s.starts_with("0x") => {
                U256::from_str_radix(&s[2..], 16).unwrap_or_default()
            }
            Some(s) => U256::from_dec_str(s).unwrap_or_default(),
            None => U256::zero(),
        }
    }

    /// Map an aggregator error body onto the closed error set
    fn classify_error(status: reqwest::StatusCode, body: &str) -> Error {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Error::ApiRateLimited("aggregator".into());
        }
        if let Ok(wire) = serde_json::from_str::<WireError>(body) {
            let text = wire
                .reason
                .or(wire.code)
                .unwrap_or_else(|| status.to_string());
            let lowered = text.to_lowercase();
            if lowered.contains("liquidity") {
                return Error::InsufficientLiquidity(text);
            }
            if lowered.contains("slippage") {
                return Error::SlippageTooHigh(text);
            }
            return Error::SwapQuoteFailed(text);
        }
        Error::SwapQuoteFailed(format!("aggregator returned {}", status))
    }
}

#[async_trait]
impl DexAggregator for HttpAggregator {
    async fn quote(
        &self,
        chain_id: u64,
        wallet_address: &str,
        sell_contract: &str,
        buy_contract: &str,
        sell_amount_raw: U256,
        slippage_bps: u32,
    ) -> Result<Quote> {
        let url = format!("{}/swap/v1/quote", self.base_url);
        let slippage = format!("{}", slippage_bps as f64 / 10_000.0);
        let amount = sell_amount_raw.to_string();
        let chain = chain_id.to_string();

        let mut request = self.client.get(&url).query(&[
            ("chainId", chain.as_str()),
            ("taker", wallet_address),
            ("sellToken", sell_contract),
            ("buyToken", buy_contract),
            ("sellAmount", amount.as_str()),
            ("slippagePercentage", slippage.as_str()),
        ]);
        if !self.api_key.is_empty() {
            request = request.header("0x-api-key", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::SwapQuoteFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status, &body));
        }

        let wire: WireQuote = response
            .json()
            .await
            .map_err(|e| Error::SwapQuoteFailed(format!("bad quote body: {}", e)))?;

        let data = hex::decode(wire.data.trim_start_matches("0x"))
            .map_err(|e| Error::SwapQuoteFailed(format!("bad quote calldata: {}", e)))?;

        // Aggregators that route without a separate allowance manager leave
        // the target as the spender
        let spender = wire
            .allowance_target
            .unwrap_or_else(|| wire.to.clone())
            .to_lowercase();

        Ok(Quote {
            to: wire.to.to_lowercase(),
            data,
            value: Self::parse_amount(wire.value.as_deref()),
            gas_hint: wire
                .gas
                .as_deref()
                .map(|g| Self::parse_amount(Some(g)))
                .filter(|g| !g.is_zero()),
            spender,
            buy_amount_hint_raw: Self::parse_amount(wire.buy_amount.as_deref()),
        })
    }

    async fn min_sell_amount(&self, symbol: &str, chain_id: u64) -> Result<Option<U256>> {
        let url = format!("{}/swap/v1/limits", self.base_url);
        let chain = chain_id.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("chainId", chain.as_str())])
            .send()
            .await;

        // The advisory is optional; an unreachable endpoint means no minimum
        let response = match response {
            Ok(r) if r.status().is_success() => r,
            _ => return Ok(None),
        };

        let wire: WireMinAmount = match response.json().await {
            Ok(w) => w,
            Err(_) => return Ok(None),
        };

        Ok(wire
            .min_sell_amount
            .as_deref()
            .map(|s| Self::parse_amount(Some(s)))
            .filter(|v| !v.is_zero()))
    }
}

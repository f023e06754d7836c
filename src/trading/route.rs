//! Route acquisition
//!
//! Thin contract over the DEX aggregator: resolve the executable call for a
//! swap, with native bindings mapped to the aggregator's sentinel address
//! and transient failures retried on a capped backoff.

use primitive_types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::adapters::aggregator::{DexAggregator, Quote};
use crate::cache::TtlCache;
use crate::error::{Error, Result};
use crate::resolver::TokenBinding;
use crate::retry::RetryPolicy;

/// How long aggregator minimum-amount advisories are kept
const MIN_AMOUNT_TTL: Duration = Duration::from_secs(600);

pub struct RouteProvider {
    aggregator: Arc<dyn DexAggregator>,
    retry: RetryPolicy,
    native_sentinel: String,
    min_amounts: TtlCache<(String, u64), Option<U256>>,
}

impl RouteProvider {
    pub fn new(aggregator: Arc<dyn DexAggregator>, retry: RetryPolicy, native_sentinel: &str) -> Self {
        Self {
            aggregator,
            retry,
            native_sentinel: native_sentinel.to_lowercase(),
            min_amounts: TtlCache::new(),
        }
    }

    fn contract_for(&self, binding: &TokenBinding) -> String {
        if binding.is_native {
            self.native_sentinel.clone()
        } else {
            binding.contract_address.clone()
        }
    }

    /// Fetch an executable quote for selling `sell_amount_raw` of `sell`
    /// into `buy`
    pub async fn quote(
        &self,
        chain_id: u64,
        wallet_address: &str,
        sell: &TokenBinding,
        buy: &TokenBinding,
        sell_amount_raw: U256,
        slippage_bps: u32,
    ) -> Result<Quote> {
        let sell_contract = self.contract_for(sell);
        let buy_contract = self.contract_for(buy);

        let quote = self
            .retry
            .run("aggregator_quote", || {
                self.aggregator.quote(
                    chain_id,
                    wallet_address,
                    &sell_contract,
                    &buy_contract,
                    sell_amount_raw,
                    slippage_bps,
                )
            })
            .await?;

        if quote.to.is_empty() || quote.data.is_empty() {
            return Err(Error::SwapQuoteFailed(
                "aggregator returned an empty call".into(),
            ));
        }

        debug!(
            chain_id,
            sell = %sell.symbol,
            buy = %buy.symbol,
            spender = %quote.spender,
            "route acquired"
        );
        Ok(quote)
    }

    /// Cached minimum-amount advisory for a symbol on a chain
    pub async fn min_sell_amount(&self, symbol: &str, chain_id: u64) -> Result<Option<U256>> {
        let key = (symbol.to_uppercase(), chain_id);
        self.min_amounts
            .get_or_load(key, |_| MIN_AMOUNT_TTL, || {
                self.aggregator.min_sell_amount(symbol, chain_id)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubAggregator {
        fail_times: u32,
        calls: AtomicU32,
        min_calls: AtomicU32,
    }

    #[async_trait]
    impl DexAggregator for StubAggregator {
        async fn quote(
            &self,
            _chain_id: u64,
            _wallet_address: &str,
            sell_contract: &str,
            _buy_contract: &str,
            _sell_amount_raw: U256,
            _slippage_bps: u32,
        ) -> Result<Quote> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                return Err(Error::SwapQuoteFailed("flaky".into()));
            }
            Ok(Quote {
                to: "0xrouter".into(),
                data: vec![0x01],
                value: U256::zero(),
                gas_hint: None,
                spender: sell_contract.to_string(),
                buy_amount_hint_raw: U256::from(100u64),
            })
        }

        async fn min_sell_amount(&self, _symbol: &str, _chain_id: u64) -> Result<Option<U256>> {
            self.min_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(U256::from(10u64)))
        }
    }

    fn binding(symbol: &str, native: bool) -> TokenBinding {
        TokenBinding {
            symbol: symbol.into(),
            network: "arbitrum".into(),
            contract_address: format!("0x{}", "11".repeat(20)),
            decimals: 18,
            is_native: native,
            source: crate::resolver::BindingSource::Known,
            verified: true,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_transient_quote_failures_are_retried() {
        let aggregator = Arc::new(StubAggregator {
            fail_times: 2,
            calls: AtomicU32::new(0),
            min_calls: AtomicU32::new(0),
        });
        let route = RouteProvider::new(aggregator.clone(), fast_retry(), "0xeeee");

        let quote = route
            .quote(
                42161,
                "0xwallet",
                &binding("USDC", false),
                &binding("FOO", false),
                U256::from(100u64),
                50,
            )
            .await
            .unwrap();
        assert_eq!(quote.to, "0xrouter");
        assert_eq!(aggregator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_native_binding_uses_sentinel() {
        let aggregator = Arc::new(StubAggregator {
            fail_times: 0,
            calls: AtomicU32::new(0),
            min_calls: AtomicU32::new(0),
        });
        let route = RouteProvider::new(aggregator, fast_retry(), "0xEEEE");

        let quote = route
            .quote(
                42161,
                "0xwallet",
                &binding("ETH", true),
                &binding("FOO", false),
                U256::from(100u64),
                50,
            )
            .await
            .unwrap();
        // stub echoes the sell contract as spender
        assert_eq!(quote.spender, "0xeeee");
    }

    #[tokio::test]
    async fn test_min_amount_advisory_is_cached() {
        let aggregator = Arc::new(StubAggregator {
            fail_times: 0,
            calls: AtomicU32::new(0),
            min_calls: AtomicU32::new(0),
        });
        let route = RouteProvider::new(aggregator.clone(), fast_retry(), "0xeeee");

        for _ in 0..3 {
            let minimum = route.min_sell_amount("FOO", 42161).await.unwrap();
            assert_eq!(minimum, Some(U256::from(10u64)));
        }
        assert_eq!(aggregator.min_calls.load(Ordering::SeqCst), 1);
    }
}

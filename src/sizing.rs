//! Balance-aware position sizing
//!
//! Sizes the sell side of a trade as a percentage of the wallet's base
//! balance, in the token's own raw units. The sizer talks to the chain
//! only; the aggregator's minimum-amount advisory is handed in by the
//! orchestrator. USD semantics apply only when the base is a stablecoin.

use lazy_static::lazy_static;
use primitive_types::U256;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::abi;
use crate::adapters::rpc::RpcProvider;
use crate::amount::{apply_bps, format_raw, pct_to_bps};
use crate::error::{Error, Result};
use crate::resolver::TokenBinding;

lazy_static! {
    /// Symbols assumed 1:1 to USD for the minimum-value policy
    static ref STABLE_SYMBOLS: HashSet<&'static str> =
        ["USDC", "USDC.E", "USDT", "DAI", "FRAX", "LUSD"].into_iter().collect();
}

/// The hard request bounds; `max_percentage` from configuration caps the
/// effective value within these
const MIN_PERCENT: u32 = 1;
const MAX_PERCENT: u32 = 80;

/// A funded, policy-checked plan for one entry
#[derive(Debug, Clone)]
pub struct PositionPlan {
    pub wallet_address: String,
    pub network: String,
    pub sell_binding: TokenBinding,
    pub buy_binding: TokenBinding,
    pub sell_amount_raw: U256,
    pub percentage_requested: u32,
    pub percentage_effective: u32,
    pub min_amount_raw: U256,
    pub gas_reserve_raw: U256,
    pub rationale: String,
}

pub struct PositionSizer {
    rpcs: HashMap<String, Arc<dyn RpcProvider>>,
    gas_reserve: U256,
    min_usd: f64,
    max_percentage: u32,
}

impl PositionSizer {
    pub fn new(
        rpcs: HashMap<String, Arc<dyn RpcProvider>>,
        gas_reserve: U256,
        min_usd: f64,
        max_percentage: u32,
    ) -> Self {
        Self {
            rpcs,
            gas_reserve,
            min_usd,
            max_percentage: max_percentage.min(MAX_PERCENT),
        }
    }

    /// Produce a plan for selling `percentage` of the wallet's
    /// `sell_binding` balance into `buy_binding`. `min_token_raw` is the
    /// aggregator's advisory minimum, already fetched by the caller.
    pub async fn plan(
        &self,
        wallet_address: &str,
        network: &str,
        sell_binding: TokenBinding,
        buy_binding: TokenBinding,
        percentage: u32,
        min_token_raw: Option<U256>,
    ) -> Result<PositionPlan> {
        if !(MIN_PERCENT..=MAX_PERCENT).contains(&percentage) {
            return Err(Error::InvalidPositionPercentage {
                got: percentage,
                min: MIN_PERCENT,
                max: MAX_PERCENT,
            });
        }
        let effective = percentage.min(self.max_percentage);

        let rpc = self
            .rpcs
            .get(network)
            .ok_or_else(|| Error::UnsupportedNetwork(network.to_string()))?;

        let balance = if sell_binding.is_native {
            rpc.balance(wallet_address).await?
        } else {
            let data = rpc
                .call(
                    &sell_binding.contract_address,
                    &abi::encode_balance_of(wallet_address)?,
                )
                .await?;
            abi::decode_uint(&data)?
        };

        if balance.is_zero() {
            return Err(Error::InsufficientStablecoinBalance(format!(
                "{} holds no {} on {}",
                wallet_address, sell_binding.symbol, network
            )));
        }

        // Native trades must leave gas behind; ERC-20 balances are spent in
        // full because gas comes from the separate native balance
        let gas_reserve = if sell_binding.is_native {
            self.gas_reserve
        } else {
            U256::zero()
        };
        let available = balance.saturating_sub(gas_reserve);
        if available.is_zero() {
            return Err(Error::InsufficientStablecoinBalance(format!(
                "balance {} {} does not cover the gas reserve",
                format_raw(balance, sell_binding.decimals),
                sell_binding.symbol
            )));
        }

        let sell_amount = apply_bps(available, pct_to_bps(effective));

        let minimum = self.minimum_for(&sell_binding, min_token_raw);
        if sell_amount < minimum {
            return Err(Error::PositionSizeTooSmall {
                amount: format!(
                    "{} {}",
                    format_raw(sell_amount, sell_binding.decimals),
                    sell_binding.symbol
                ),
                minimum: format!(
                    "{} {}",
                    format_raw(minimum, sell_binding.decimals),
                    sell_binding.symbol
                ),
            });
        }

        let rationale = format!(
            "{}% of {} {} available ({} reserved for gas)",
            effective,
            format_raw(available, sell_binding.decimals),
            sell_binding.symbol,
            format_raw(gas_reserve, sell_binding.decimals),
        );
        debug!(
            wallet = wallet_address,
            network,
            sell = %format_raw(sell_amount, sell_binding.decimals),
            "position sized"
        );

        Ok(PositionPlan {
            wallet_address: wallet_address.to_string(),
            network: network.to_string(),
            sell_binding,
            buy_binding,
            sell_amount_raw: sell_amount,
            percentage_requested: percentage,
            percentage_effective: effective,
            min_amount_raw: minimum,
            gas_reserve_raw: gas_reserve,
            rationale,
        })
    }

    /// The larger of the USD floor (stablecoins only) and the per-token
    /// advisory minimum
    fn minimum_for(&self, sell_binding: &TokenBinding, min_token_raw: Option<U256>) -> U256 {
        let usd_min = if STABLE_SYMBOLS.contains(sell_binding.symbol.to_uppercase().as_str()) {
            let scaled = self.min_usd * 10f64.powi(sell_binding.decimals as i32);
            U256::from(scaled.ceil() as u128)
        } else {
            U256::zero()
        };
        usd_min.max(min_token_raw.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rpc::{FeeData, Receipt};
    use crate::resolver::BindingSource;
    use async_trait::async_trait;
    use std::time::Duration;

    const WALLET: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    struct StubRpc {
        native_balance: U256,
        token_balance: U256,
    }

    #[async_trait]
    impl RpcProvider for StubRpc {
        async fn code(&self, _address: &str) -> Result<Vec<u8>> {
            Ok(vec![0x60])
        }

        async fn balance(&self, _address: &str) -> Result<U256> {
            Ok(self.native_balance)
        }

        async fn call(&self, _to: &str, _data: &[u8]) -> Result<Vec<u8>> {
            Ok(abi::uint_word(self.token_balance).to_vec())
        }

        async fn fee_data(&self) -> Result<FeeData> {
            Ok(FeeData::default())
        }

        async fn send_raw(&self, _raw_tx: &[u8]) -> Result<String> {
            Ok("0xhash".into())
        }

        async fn wait_receipt(&self, _tx_hash: &str, _timeout: Duration) -> Result<Receipt> {
            unimplemented!("not used by the sizer")
        }
    }

    fn sizer(token_balance: u64, native_balance: u128) -> PositionSizer {
        let mut rpcs: HashMap<String, Arc<dyn RpcProvider>> = HashMap::new();
        rpcs.insert(
            "arbitrum".to_string(),
            Arc::new(StubRpc {
                native_balance: U256::from(native_balance),
                token_balance: U256::from(token_balance),
            }),
        );
        PositionSizer::new(rpcs, U256::from(1_000_000_000_000_000u64), 0.01, 80)
    }

    fn usdc() -> TokenBinding {
        TokenBinding {
            symbol: "USDC".into(),
            network: "arbitrum".into(),
            contract_address: format!("0x{}", "11".repeat(20)),
            decimals: 6,
            is_native: false,
            source: BindingSource::Known,
            verified: true,
        }
    }

    fn foo() -> TokenBinding {
        TokenBinding {
            symbol: "FOO".into(),
            network: "arbitrum".into(),
            contract_address: format!("0x{}", "22".repeat(20)),
            decimals: 18,
            is_native: false,
            source: BindingSource::Registry,
            verified: false,
        }
    }

    fn eth() -> TokenBinding {
        TokenBinding {
            symbol: "ETH".into(),
            network: "arbitrum".into(),
            contract_address: "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee".into(),
            decimals: 18,
            is_native: true,
            source: BindingSource::Known,
            verified: true,
        }
    }

    #[tokio::test]
    async fn test_twenty_percent_of_thousand_usdc() {
        // 1000.00 USDC at 6 decimals
        let sizer = sizer(1_000_000_000, 0);
        let plan = sizer
            .plan(WALLET, "arbitrum", usdc(), foo(), 20, None)
            .await
            .unwrap();
        assert_eq!(plan.sell_amount_raw, U256::from(200_000_000u64));
        assert_eq!(plan.percentage_effective, 20);
        assert_eq!(plan.gas_reserve_raw, U256::zero());
    }

    #[tokio::test]
    async fn test_percentage_bounds() {
        let sizer = sizer(1_000_000_000, 0);
        for bad in [0u32, 81, 100] {
            let err = sizer
                .plan(WALLET, "arbitrum", usdc(), foo(), bad, None)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_POSITION_PERCENTAGE");
        }
    }

    #[tokio::test]
    async fn test_max_percentage_caps_effective() {
        let mut rpcs: HashMap<String, Arc<dyn RpcProvider>> = HashMap::new();
        rpcs.insert(
            "arbitrum".to_string(),
            Arc::new(StubRpc {
                native_balance: U256::zero(),
                token_balance: U256::from(1_000_000_000u64),
            }),
        );
        let sizer = PositionSizer::new(rpcs, U256::zero(), 0.01, 50);
        let plan = sizer
            .plan(WALLET, "arbitrum", usdc(), foo(), 80, None)
            .await
            .unwrap();
        assert_eq!(plan.percentage_requested, 80);
        assert_eq!(plan.percentage_effective, 50);
        assert_eq!(plan.sell_amount_raw, U256::from(500_000_000u64));
    }

    #[tokio::test]
    async fn test_dust_balance_is_too_small() {
        // 0.005 USDC: 20% is 0.001, below the $0.01 floor
        let sizer = sizer(5_000, 0);
        let err = sizer
            .plan(WALLET, "arbitrum", usdc(), foo(), 20, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "POSITION_SIZE_TOO_SMALL");
        assert!(err.to_string().contains("0.01"));
    }

    #[tokio::test]
    async fn test_aggregator_minimum_wins_when_larger() {
        let sizer = sizer(1_000_000_000, 0);
        let err = sizer
            .plan(
                WALLET,
                "arbitrum",
                usdc(),
                foo(),
                20,
                Some(U256::from(300_000_000u64)), // 300 USDC minimum
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "POSITION_SIZE_TOO_SMALL");
        assert!(err.to_string().contains("300"));
    }

    #[tokio::test]
    async fn test_native_base_reserves_gas() {
        // 1 ETH balance, 0.001 reserved
        let one_eth = 1_000_000_000_000_000_000u128;
        let sizer = sizer(0, one_eth);
        let plan = sizer
            .plan(WALLET, "arbitrum", eth(), foo(), 20, None)
            .await
            .unwrap();
        let available = U256::from(one_eth) - U256::from(1_000_000_000_000_000u64);
        assert_eq!(plan.sell_amount_raw, apply_bps(available, 2_000));
        assert_eq!(plan.gas_reserve_raw, U256::from(1_000_000_000_000_000u64));
        // jointly fundable: amount + reserve within balance
        assert!(plan.sell_amount_raw + plan.gas_reserve_raw <= U256::from(one_eth));
    }

    #[tokio::test]
    async fn test_zero_balance_fails() {
        let sizer = sizer(0, 0);
        let err = sizer
            .plan(WALLET, "arbitrum", usdc(), foo(), 20, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_STABLECOIN_BALANCE");
    }

    #[tokio::test]
    async fn test_non_stable_base_has_no_usd_floor() {
        // Tiny FOO balance would fail a USD floor if one applied
        let sizer = sizer(100, 0);
        let plan = sizer
            .plan(WALLET, "arbitrum", foo(), usdc(), 50, None)
            .await
            .unwrap();
        assert_eq!(plan.sell_amount_raw, U256::from(50u64));
    }

    #[tokio::test]
    async fn test_unknown_network_rejected() {
        let sizer = sizer(1_000_000_000, 0);
        let err = sizer
            .plan(WALLET, "base", usdc(), foo(), 20, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_NETWORK");
    }
}

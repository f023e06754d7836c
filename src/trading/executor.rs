//! Trade execution through the multi-sig wallet
//!
//! One entry or exit at a time per trade: quote, allowances, wallet
//! transaction, broadcast, receipt. The executor is stateless apart from a
//! shared per-(wallet, chain) adapter cache; serialization per trade is the
//! scheduler's job.

use dashmap::DashMap;
use primitive_types::U256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::abi;
use crate::adapters::rpc::{FeeData, Receipt, RpcProvider};
use crate::adapters::safe::{GasSettings, MetaTx, MultisigWallet, SafeWalletClient};
use crate::adapters::signer::AgentSigner;
use crate::error::{Error, Result};
use crate::resolver::TokenBinding;
use crate::trade::{Action, ExecutionRequest, Trade};
use crate::trading::allowance::AllowanceManager;
use crate::trading::route::RouteProvider;

/// Gas the wallet's execute entrypoint consumes on top of the inner call
const EXEC_GAS_OVERHEAD: u64 = 120_000;

/// Execution seam: the scheduler dispatches through this so a dry run can
/// swap the whole swap path out
#[async_trait::async_trait]
pub trait Execute: Send + Sync {
    async fn execute(
        &self,
        trade: &Trade,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome>;
}

/// Per-chain execution context
#[derive(Clone)]
pub struct ChainContext {
    pub rpc: Arc<dyn RpcProvider>,
    pub chain_id: u64,
    pub permit_contract: Option<String>,
    pub gas_floor_wei: U256,
    pub receipt_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub tx_hash: String,
    /// Buy-side quantity observed in transfer events; `None` when the
    /// receipt carried no attributable transfers (e.g. native buys)
    pub filled_raw: Option<U256>,
}

pub struct TradeExecutor {
    chains: HashMap<String, ChainContext>,
    route: Arc<RouteProvider>,
    allowance: AllowanceManager,
    signer: Arc<dyn AgentSigner>,
    wallets: DashMap<(String, String), Arc<dyn MultisigWallet>>,
    slippage_bps: u32,
    gas_bump_percent: u32,
}

impl TradeExecutor {
    pub fn new(
        chains: HashMap<String, ChainContext>,
        route: Arc<RouteProvider>,
        allowance: AllowanceManager,
        signer: Arc<dyn AgentSigner>,
        slippage_bps: u32,
        gas_bump_percent: u32,
    ) -> Self {
        Self {
            chains,
            route,
            allowance,
            signer,
            wallets: DashMap::new(),
            slippage_bps,
            gas_bump_percent,
        }
    }

    /// Execute one request for one trade. The caller holds the trade's
    /// lease; per trade this runs strictly sequentially.
    async fn execute_inner(
        &self,
        trade: &Trade,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        let ctx = self
            .chains
            .get(&trade.network)
            .ok_or_else(|| Error::UnsupportedNetwork(trade.network.clone()))?;

        // Exits mirror entries with the bindings swapped
        let (sell, buy) = match request.action {
            Action::Enter => (&trade.sell_binding, &trade.buy_binding),
            Action::Exit => (&trade.buy_binding, &trade.sell_binding),
        };

        if request.amount_raw.is_zero() {
            return Err(Error::SwapExecutionFailed(format!(
                "{:?} request for {} has zero amount",
                request.action, trade.trade_id
            )));
        }

        let wallet = self.wallet_for(&trade.wallet_address, &trade.network, ctx);

        let quote = self
            .route
            .quote(
                ctx.chain_id,
                &trade.wallet_address,
                sell,
                buy,
                request.amount_raw,
                self.slippage_bps,
            )
            .await?;

        let fee = ctx.rpc.fee_data().await?;
        let gas = Self::pick_gas(&fee, self.gas_bump_percent, ctx.gas_floor_wei, quote.gas_hint);

        let mut spenders: Vec<String> = Vec::with_capacity(2);
        if let Some(permit) = &ctx.permit_contract {
            spenders.push(permit.to_lowercase());
        }
        let quote_spender = quote.spender.to_lowercase();
        if !spenders.contains(&quote_spender) {
            spenders.push(quote_spender);
        }
        self.allowance
            .ensure(
                ctx.rpc.as_ref(),
                wallet.as_ref(),
                sell,
                &spenders,
                request.amount_raw,
                &gas,
                ctx.receipt_wait,
            )
            .await?;

        let call = MetaTx {
            to: quote.to.clone(),
            value: quote.value,
            data: quote.data.clone(),
        };
        let unsigned = wallet.new_tx(vec![call]).await?;
        let signed = wallet.sign(unsigned).await?;
        let tx_hash = wallet.execute(signed, gas).await?;
        info!(
            trade_id = %trade.trade_id,
            action = ?request.action,
            tx_hash = %tx_hash,
            "swap broadcast"
        );

        let receipt = ctx.rpc.wait_receipt(&tx_hash, ctx.receipt_wait).await?;
        if !receipt.is_success() {
            return Err(Error::SwapExecutionFailed(format!(
                "swap transaction {} reverted",
                tx_hash
            )));
        }

        // Native buys leave no token transfer into the wallet; fall back to
        // the aggregator's settlement hint
        let filled_raw = Self::estimate_filled(&receipt, buy, &trade.wallet_address)
            .or_else(|| (!quote.buy_amount_hint_raw.is_zero()).then_some(quote.buy_amount_hint_raw));
        debug!(
            trade_id = %trade.trade_id,
            filled = ?filled_raw,
            "swap confirmed"
        );

        Ok(ExecutionOutcome { tx_hash, filled_raw })
    }

    /// Shared adapter per (wallet, chain); concurrent reads are fine, the
    /// write path is serialised by the per-trade lease upstream
    fn wallet_for(
        &self,
        wallet_address: &str,
        network: &str,
        ctx: &ChainContext,
    ) -> Arc<dyn MultisigWallet> {
        let key = (wallet_address.to_lowercase(), network.to_string());
        self.wallets
            .entry(key)
            .or_insert_with(|| {
                Arc::new(SafeWalletClient::new(
                    ctx.rpc.clone(),
                    self.signer.clone(),
                    wallet_address,
                    ctx.chain_id,
                )) as Arc<dyn MultisigWallet>
            })
            .clone()
    }

    /// Gas policy: prefer EIP-1559 fees when the chain reports them,
    /// otherwise bump the legacy price by the configured percentage.
    /// Everything is clamped to the chain's floor.
    pub fn pick_gas(
        fee: &FeeData,
        bump_percent: u32,
        floor_wei: U256,
        gas_hint: Option<U256>,
    ) -> GasSettings {
        let gas_limit = gas_hint.map(|hint| hint.saturating_add(U256::from(EXEC_GAS_OVERHEAD)));

        if fee.supports_eip1559() {
            let max_fee = fee.max_fee_per_gas.unwrap_or_default().max(floor_wei);
            return GasSettings {
                gas_limit,
                gas_price: None,
                max_fee_per_gas: Some(max_fee),
                max_priority_fee_per_gas: fee.max_priority_fee_per_gas,
            };
        }

        let legacy = fee.gas_price.unwrap_or_default();
        let bumped = legacy
            .saturating_mul(U256::from(100 + bump_percent as u64))
            / U256::from(100u64);
        GasSettings {
            gas_limit,
            gas_price: Some(bumped.max(floor_wei)),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }

    /// Sum Transfer events of the buy token into the wallet
    fn estimate_filled(
        receipt: &Receipt,
        buy: &TokenBinding,
        wallet_address: &str,
    ) -> Option<U256> {
        let mut total = U256::zero();
        let mut seen = false;
        for log in &receipt.logs {
            if !log.address.eq_ignore_ascii_case(&buy.contract_address) {
                continue;
            }
            let is_transfer = log
                .topics
                .first()
                .map(|t| t.eq_ignore_ascii_case(abi::TRANSFER_TOPIC))
                .unwrap_or(false);
            if !is_transfer || log.topics.len() < 3 {
                continue;
            }
            if !abi::topic_is_address(&log.topics[2], wallet_address.trim_start_matches("0x")) {
                continue;
            }
            let data = log.data.trim_start_matches("0x");
            if let Ok(bytes) = hex::decode(data) {
                if bytes.len() >= 32 {
                    total = total.saturating_add(U256::from_big_endian(&bytes[..32]));
                    seen = true;
                }
            }
        }
        seen.then_some(total)
    }
}

#[async_trait::async_trait]
impl Execute for TradeExecutor {
    async fn execute(
        &self,
        trade: &Trade,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        self.execute_inner(trade, request).await
    }
}

/// No-broadcast executor for dry runs: every request "confirms" instantly
/// with a synthetic hash, so the pipeline and monitor can be exercised
/// without touching a chain
pub struct DryRunExecutor;

#[async_trait::async_trait]
impl Execute for DryRunExecutor {
    async fn execute(
        &self,
        trade: &Trade,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        info!(
            trade_id = %trade.trade_id,
            action = ?request.action,
            amount = %request.amount_raw,
            "dry run: skipping broadcast"
        );
        Ok(ExecutionOutcome {
            tx_hash: format!("0xdryrun{}", &trade.trade_id[..8.min(trade.trade_id.len())]),
            filled_raw: Some(request.amount_raw),
        })
    }
}

//! Deterministic in-memory collaborators for tests
//!
//! A scripted chain, directory, aggregator, signer and price feed that let
//! the whole pipeline run end-to-end without a network. The scripted RPC
//! understands the wallet's execute calldata well enough to apply approval
//! effects and to mint swap receipts with transfer logs, so the executor's
//! real code paths are exercised.

use async_trait::async_trait;
use dashmap::DashMap;
use primitive_types::U256;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::abi;
use crate::adapters::aggregator::{DexAggregator, Quote};
use crate::adapters::directory::{
    DeploymentStatus, WalletDeployment, WalletDirectory, WalletRecord,
};
use crate::adapters::price::{PriceFeed, PricePoint};
use crate::adapters::rpc::{FeeData, LogEntry, Receipt, RpcProvider};
use crate::adapters::signer::{AgentSigner, TxRequest};
use crate::error::{Error, Result};

pub const ROUTER: &str = "0xdddddddddddddddddddddddddddddddddddddddd";
pub const SPENDER: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const AGENT: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

/// Scripted chain state shared by the RPC stub and the tests
pub struct ScriptedChain {
    /// Addresses that have contract code
    pub contracts: DashMap<String, ()>,
    pub native_balances: DashMap<String, U256>,
    /// (token, owner) -> balance
    pub token_balances: DashMap<(String, String), U256>,
    /// (token, owner, spender) -> allowance
    pub allowances: DashMap<(String, String, String), U256>,
    /// Wallet owners returned by getOwners()
    pub owners: Mutex<Vec<String>>,
    pub threshold: Mutex<u64>,
    /// Buy token and fill minted on the next router swap
    pub next_fill: Mutex<Option<(String, U256)>>,
    pub receipts: DashMap<String, Receipt>,
    tx_counter: AtomicU64,
    pub approvals_executed: AtomicU64,
    pub swaps_executed: AtomicU64,
    /// When set, the next router swap mines with a reverted status
    pub fail_next_swap: std::sync::atomic::AtomicBool,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self {
            contracts: DashMap::new(),
            native_balances: DashMap::new(),
            token_balances: DashMap::new(),
            allowances: DashMap::new(),
            owners: Mutex::new(vec![AGENT.to_string()]),
            threshold: Mutex::new(1),
            next_fill: Mutex::new(None),
            receipts: DashMap::new(),
            tx_counter: AtomicU64::new(1),
            approvals_executed: AtomicU64::new(0),
            swaps_executed: AtomicU64::new(0),
            fail_next_swap: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn deploy(&self, address: &str) {
        self.contracts.insert(address.to_lowercase(), ());
    }

    pub fn set_native(&self, address: &str, amount: U256) {
        self.native_balances.insert(address.to_lowercase(), amount);
    }

    pub fn set_token_balance(&self, token: &str, owner: &str, amount: U256) {
        self.token_balances
            .insert((token.to_lowercase(), owner.to_lowercase()), amount);
    }

    pub fn allowance(&self, token: &str, owner: &str, spender: &str) -> U256 {
        self.allowances
            .get(&(
                token.to_lowercase(),
                owner.to_lowercase(),
                spender.to_lowercase(),
            ))
            .map(|v| *v)
            .unwrap_or_default()
    }

    pub fn set_fill(&self, token: &str, amount: U256) {
        *self.next_fill.lock().unwrap() = Some((token.to_lowercase(), amount));
    }

    fn mint_hash(&self) -> String {
        format!("0xtx{:04}", self.tx_counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Apply an inner wallet call: approvals mutate allowances, router
    /// calls mint a swap receipt with a transfer log
    fn apply_inner_call(&self, wallet: &str, inner_to: &str, inner_data: &[u8]) -> Receipt {
        let hash = self.mint_hash();
        let mut logs = Vec::new();
        let mut status = json!("0x1");

        if inner_data.len() >= 4 && inner_data[..4] == abi::SEL_APPROVE {
            let spender = format!("0x{}", hex::encode(&inner_data[16..36]));
            let amount = U256::from_big_endian(&inner_data[36..68]);
            self.allowances.insert(
                (
                    inner_to.to_lowercase(),
                    wallet.to_lowercase(),
                    spender.to_lowercase(),
                ),
                amount,
            );
            self.approvals_executed.fetch_add(1, Ordering::SeqCst);
        } else if inner_to.eq_ignore_ascii_case(ROUTER) {
            if self
                .fail_next_swap
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                status = json!("0x0");
            } else {
                self.swaps_executed.fetch_add(1, Ordering::SeqCst);
                if let Some((token, amount)) = self.next_fill.lock().unwrap().clone() {
                    logs.push(LogEntry {
                        address: token,
                        topics: vec![
                            abi::TRANSFER_TOPIC.to_string(),
                            format!("0x{}{}", "00".repeat(12), &ROUTER[2..]),
                            format!("0x{}{}", "00".repeat(12), &wallet[2..]),
                        ],
                        data: format!("0x{}", hex::encode(abi::uint_word(amount))),
                    });
                }
            }
        }

        let receipt = Receipt {
            tx_hash: hash.clone(),
            status,
            logs,
        };
        self.receipts.insert(hash, receipt.clone());
        receipt
    }
}

impl Default for ScriptedChain {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ScriptedRpc {
    pub chain: std::sync::Arc<ScriptedChain>,
}

#[async_trait]
impl RpcProvider for ScriptedRpc {
    async fn code(&self, address: &str) -> Result<Vec<u8>> {
        Ok(if self.chain.contracts.contains_key(&address.to_lowercase()) {
            vec![0x60, 0x80]
        } else {
            vec![]
        })
    }

    async fn balance(&self, address: &str) -> Result<U256> {
        Ok(self
            .chain
            .native_balances
            .get(&address.to_lowercase())
            .map(|v| *v)
            .unwrap_or_default())
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let to = to.to_lowercase();
        if data.len() < 4 {
            return Ok(vec![]);
        }
        let selector: [u8; 4] = data[..4].try_into().unwrap();
        match selector {
            abi::SEL_BALANCE_OF => {
                let owner = format!("0x{}", hex::encode(&data[16..36]));
                Ok(abi::uint_word(
                    self.chain
                        .token_balances
                        .get(&(to, owner))
                        .map(|v| *v)
                        .unwrap_or_default(),
                )
                .to_vec())
            }
            abi::SEL_ALLOWANCE => {
                let owner = format!("0x{}", hex::encode(&data[16..36]));
                let spender = format!("0x{}", hex::encode(&data[48..68]));
                Ok(abi::uint_word(self.chain.allowance(&to, &owner, &spender)).to_vec())
            }
            abi::SEL_GET_OWNERS => {
                let owners = self.chain.owners.lock().unwrap().clone();
                let mut out = Vec::new();
                out.extend_from_slice(&abi::uint_word(U256::from(32u64)));
                out.extend_from_slice(&abi::uint_word(U256::from(owners.len())));
                for owner in owners {
                    out.extend_from_slice(&abi::address_word(&owner)?);
                }
                Ok(out)
            }
            abi::SEL_GET_THRESHOLD => Ok(abi::uint_word(U256::from(
                *self.chain.threshold.lock().unwrap(),
            ))
            .to_vec()),
            abi::SEL_NONCE => Ok(abi::uint_word(U256::from(7u64)).to_vec()),
            _ => Ok(vec![]),
        }
    }

    async fn fee_data(&self) -> Result<FeeData> {
        Ok(FeeData {
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_price: Some(U256::from(1_000_000_000u64)),
        })
    }

    /// The scripted signer passes the outer transaction through as JSON;
    /// decode it, unwrap the wallet's execute calldata, apply effects
    async fn send_raw(&self, raw_tx: &[u8]) -> Result<String> {
        let envelope: serde_json::Value = serde_json::from_slice(raw_tx)
            .map_err(|e| Error::RpcConnectionFailed(format!("scripted tx: {}", e)))?;
        let wallet = envelope["to"].as_str().unwrap_or_default().to_string();
        let data = hex::decode(
            envelope["data"]
                .as_str()
                .unwrap_or_default()
                .trim_start_matches("0x"),
        )
        .map_err(|e| Error::RpcConnectionFailed(format!("scripted tx data: {}", e)))?;

        if data.len() < 4 || data[..4] != abi::SEL_EXEC_TRANSACTION {
            return Err(Error::SwapExecutionFailed(
                "scripted chain only accepts wallet execute calls".into(),
            ));
        }
        // Head layout: to, value, data offset, ... ; calldata sits at the
        // advertised offset
        let inner_to = format!("0x{}", hex::encode(&data[4 + 12..4 + 32]));
        let data_offset = U256::from_big_endian(&data[4 + 64..4 + 96]).as_usize();
        let len_start = 4 + data_offset;
        let inner_len = U256::from_big_endian(&data[len_start..len_start + 32]).as_usize();
        let inner_data = data[len_start + 32..len_start + 32 + inner_len].to_vec();

        let receipt = self.chain.apply_inner_call(&wallet, &inner_to, &inner_data);
        Ok(receipt.tx_hash)
    }

    async fn wait_receipt(&self, tx_hash: &str, _timeout: Duration) -> Result<Receipt> {
        self.chain
            .receipts
            .get(tx_hash)
            .map(|r| r.clone())
            .ok_or_else(|| Error::TransactionTimeout(0))
    }
}

/// Signer stub: "signing" serialises the request so the scripted RPC can
/// decode and apply it
pub struct ScriptedSigner;

#[async_trait]
impl AgentSigner for ScriptedSigner {
    fn address(&self) -> String {
        AGENT.to_string()
    }

    async fn sign_payload(
        &self,
        _wallet_address: &str,
        _chain_id: u64,
        digest: [u8; 32],
    ) -> Result<Vec<u8>> {
        let mut signature = digest.to_vec();
        signature.push(0x1b);
        Ok(signature)
    }

    async fn sign_transaction(&self, tx: &TxRequest) -> Result<Vec<u8>> {
        let envelope = json!({
            "from": tx.from,
            "to": tx.to,
            "value": tx.value.to_string(),
            "data": format!("0x{}", hex::encode(&tx.data)),
        });
        Ok(serde_json::to_vec(&envelope)?)
    }
}

/// Directory stub with a fixed record set
pub struct StubDirectory {
    pub records: HashMap<String, WalletRecord>,
}

impl StubDirectory {
    pub fn single(caller_id: &str, wallet: &str, networks: &[&str]) -> Self {
        let record = WalletRecord {
            caller_id: caller_id.to_string(),
            active_deployments: networks
                .iter()
                .map(|network| WalletDeployment {
                    caller_id: caller_id.to_string(),
                    wallet_address: wallet.to_string(),
                    network: network.to_string(),
                    active: true,
                    status: DeploymentStatus::Deployed,
                })
                .collect(),
        };
        let mut records = HashMap::new();
        records.insert(caller_id.to_string(), record);
        Self { records }
    }
}

#[async_trait]
impl WalletDirectory for StubDirectory {
    async fn get_wallet(
        &self,
        caller_id: &str,
        _wallet_address: Option<&str>,
    ) -> Result<Option<WalletRecord>> {
        Ok(self.records.get(caller_id).cloned())
    }
}

/// Aggregator stub quoting against the scripted router
pub struct StubAggregator {
    pub spender: String,
    pub buy_amount_hint: Mutex<U256>,
    pub quote_calls: AtomicU64,
}

impl StubAggregator {
    pub fn new() -> Self {
        Self {
            spender: SPENDER.to_string(),
            buy_amount_hint: Mutex::new(U256::zero()),
            quote_calls: AtomicU64::new(0),
        }
    }
}

impl Default for StubAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DexAggregator for StubAggregator {
    async fn quote(
        &self,
        _chain_id: u64,
        _wallet_address: &str,
        _sell_contract: &str,
        _buy_contract: &str,
        _sell_amount_raw: U256,
        _slippage_bps: u32,
    ) -> Result<Quote> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Quote {
            to: ROUTER.to_string(),
            data: vec![0x5a, 0x77],
            value: U256::zero(),
            gas_hint: Some(U256::from(210_000u64)),
            spender: self.spender.clone(),
            buy_amount_hint_raw: *self.buy_amount_hint.lock().unwrap(),
        })
    }

    async fn min_sell_amount(&self, _symbol: &str, _chain_id: u64) -> Result<Option<U256>> {
        Ok(None)
    }
}

/// Price feed stub with settable quotes
pub struct StubPriceFeed {
    pub prices: Mutex<HashMap<String, f64>>,
}

impl StubPriceFeed {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, symbol: &str, price: f64) {
        self.prices
            .lock()
            .unwrap()
            .insert(symbol.to_uppercase(), price);
    }
}

impl Default for StubPriceFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceFeed for StubPriceFeed {
    async fn price(&self, symbol: &str) -> Result<Option<PricePoint>> {
        Ok(self
            .prices
            .lock()
            .unwrap()
            .get(&symbol.to_uppercase())
            .map(|price| PricePoint {
                price_usd: *price,
                change_24h: None,
                volume_24h: None,
                at: chrono::Utc::now(),
            }))
    }

    async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, PricePoint>> {
        let mut out = HashMap::new();
        for symbol in symbols {
            if let Some(point) = self.price(symbol).await? {
                out.insert(symbol.clone(), point);
            }
        }
        Ok(out)
    }
}

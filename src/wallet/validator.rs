//! Pre-trade wallet validation
//!
//! Before any trade touches a wallet on a chain, three things must hold:
//! the directory lists an active deployment there, the address actually has
//! contract code, and the wallet's owner set and threshold are sane. A zero
//! native balance is advisory unless the upcoming trade is
//! native-denominated. On-chain facts are cached briefly and invalidated
//! whenever the executor changes wallet state.

use primitive_types::U256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::abi;
use crate::adapters::directory::WalletRecord;
use crate::adapters::rpc::RpcProvider;
use crate::cache::TtlCache;
use crate::error::{Error, Result};

/// On-chain facts about a wallet deployment
#[derive(Debug, Clone)]
pub struct WalletCheck {
    pub owners: Vec<String>,
    pub threshold: u32,
    pub native_balance: U256,
}

impl WalletCheck {
    pub fn has_gas(&self) -> bool {
        !self.native_balance.is_zero()
    }
}

pub struct WalletValidator {
    rpcs: HashMap<String, Arc<dyn RpcProvider>>,
    cache: TtlCache<(String, String), WalletCheck>,
    ttl: Duration,
}

impl WalletValidator {
    pub fn new(rpcs: HashMap<String, Arc<dyn RpcProvider>>, ttl: Duration) -> Self {
        Self {
            rpcs,
            cache: TtlCache::new(),
            ttl,
        }
    }

    /// Validate `wallet_address` for trading on `network`.
    /// `native_trade` marks a trade denominated in the native asset, which
    /// turns the gas advisory into a hard failure.
    pub async fn validate(
        &self,
        wallet_address: &str,
        network: &str,
        record: &WalletRecord,
        native_trade: bool,
    ) -> Result<WalletCheck> {
        // Directory first: the deployment list is authoritative
        if record.deployment_on(wallet_address, network).is_none() {
            return Err(Error::SafeNotDeployed {
                network: network.to_string(),
                detail: format!(
                    "caller {} has no active deployment at {}",
                    record.caller_id, wallet_address
                ),
            });
        }

        let rpc = self
            .rpcs
            .get(network)
            .ok_or_else(|| Error::UnsupportedNetwork(network.to_string()))?
            .clone();

        let key = (wallet_address.to_lowercase(), network.to_string());
        let ttl = self.ttl;
        let network_owned = network.to_string();
        let wallet_owned = wallet_address.to_string();

        let check = self
            .cache
            .get_or_load(key, |_| ttl, || async move {
                Self::inspect(rpc.as_ref(), &wallet_owned, &network_owned).await
            })
            .await?;

        if !check.has_gas() {
            if native_trade {
                return Err(Error::SafeInsufficientBalance {
                    network: network.to_string(),
                    detail: format!("{} holds no native balance for a native trade", wallet_address),
                });
            }
            // Advisory only: gas for ERC-20 trades is paid by the agent's
            // outer transaction, but an unfunded wallet is usually a sign
            // of misconfiguration
            warn!(
                wallet = wallet_address,
                network, "wallet has zero native balance"
            );
        }

        Ok(check)
    }

    /// Drop cached facts after the executor observes a state change
    pub fn invalidate(&self, wallet_address: &str, network: &str) {
        self.cache
            .invalidate(&(wallet_address.to_lowercase(), network.to_string()));
    }

    async fn inspect(
        rpc: &dyn RpcProvider,
        wallet_address: &str,
        network: &str,
    ) -> Result<WalletCheck> {
        let code = rpc.code(wallet_address).await?;
        if code.is_empty() {
            // Directory said deployed, chain disagrees; the chain wins
            return Err(Error::SafeNotDeployed {
                network: network.to_string(),
                detail: format!("no contract code at {}", wallet_address),
            });
        }

        let owners_raw = rpc.call(wallet_address, &abi::encode_get_owners()).await?;
        let owners = abi::decode_address_array(&owners_raw)?;
        let threshold_raw = rpc.call(wallet_address, &abi::encode_get_threshold()).await?;
        let threshold = abi::decode_uint(&threshold_raw)?.low_u32();

        if owners.is_empty() || threshold < 1 {
            return Err(Error::SafeInvalidConfiguration(format!(
                "{} has {} owners, threshold {}",
                wallet_address,
                owners.len(),
                threshold
            )));
        }

        let native_balance = rpc.balance(wallet_address).await?;

        Ok(WalletCheck {
            owners,
            threshold,
            native_balance,
        })
    }
}

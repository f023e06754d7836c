//! Allowance management
//!
//! Before a swap broadcasts, the wallet must hold enough allowance to the
//! aggregator's spender and, where a canonical permit contract is in use,
//! to that contract as well. Insufficient allowances are raised to the
//! maximum through a multi-sig approval, confirmed on chain, and re-read
//! after a short settle delay to tolerate RPC state propagation.

use primitive_types::U256;
use std::time::Duration;
use tracing::{debug, info};

use crate::abi;
use crate::adapters::rpc::RpcProvider;
use crate::adapters::safe::{GasSettings, MetaTx, MultisigWallet};
use crate::error::{Error, Result};
use crate::resolver::TokenBinding;

pub struct AllowanceManager {
    settle_delay: Duration,
}

impl Default for AllowanceManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl AllowanceManager {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    /// Ensure every spender in `spenders` can move at least `amount` of the
    /// sell token out of the wallet. Native assets need no allowance.
    pub async fn ensure(
        &self,
        rpc: &dyn RpcProvider,
        wallet: &dyn MultisigWallet,
        sell: &TokenBinding,
        spenders: &[String],
        amount: U256,
        gas: &GasSettings,
        receipt_wait: Duration,
    ) -> Result<()> {
        if sell.is_native {
            return Ok(());
        }

        for spender in spenders {
            let current = self
                .read_allowance(rpc, &sell.contract_address, &wallet.address(), spender)
                .await?;
            if current >= amount {
                debug!(
                    token = %sell.symbol,
                    spender = %spender,
                    "allowance already sufficient"
                );
                continue;
            }

            info!(
                token = %sell.symbol,
                spender = %spender,
                current = %current,
                required = %amount,
                "raising allowance to max"
            );
            self.approve_max(rpc, wallet, sell, spender, gas, receipt_wait)
                .await?;

            // Give lagging RPC nodes a moment before trusting the re-read
            tokio::time::sleep(self.settle_delay).await;

            let after = self
                .read_allowance(rpc, &sell.contract_address, &wallet.address(), spender)
                .await?;
            if after < amount {
                return Err(Error::SwapExecutionFailed(format!(
                    "allowance to {} still {} after approval (need {})",
                    spender, after, amount
                )));
            }
        }

        Ok(())
    }

    async fn read_allowance(
        &self,
        rpc: &dyn RpcProvider,
        token: &str,
        owner: &str,
        spender: &str,
    ) -> Result<U256> {
        let data = rpc
            .call(token, &abi::encode_allowance(owner, spender)?)
            .await?;
        abi::decode_uint(&data)
    }

    /// Max approval amortises the multi-sig round trip across every future
    /// trade with the same spender; acceptable because the wallet is
    /// owner-controlled and the spender is a known aggregator contract
    async fn approve_max(
        &self,
        rpc: &dyn RpcProvider,
        wallet: &dyn MultisigWallet,
        sell: &TokenBinding,
        spender: &str,
        gas: &GasSettings,
        receipt_wait: Duration,
    ) -> Result<()> {
        let call = MetaTx {
            to: sell.contract_address.clone(),
            value: U256::zero(),
            data: abi::encode_approve(spender, U256::MAX)?,
        };

        let unsigned = wallet.new_tx(vec![call]).await?;
        let signed = wallet.sign(unsigned).await?;
        let tx_hash = wallet.execute(signed, gas.clone()).await?;

        let receipt = rpc.wait_receipt(&tx_hash, receipt_wait).await?;
        if !receipt.is_success() {
            return Err(Error::SwapExecutionFailed(format!(
                "approval transaction {} reverted",
                tx_hash
            )));
        }

        Ok(())
    }
}

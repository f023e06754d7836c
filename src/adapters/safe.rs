//! Multi-sig wallet adapter
//!
//! Wraps one wallet on one chain: configuration reads (owners, threshold,
//! nonce) via eth_call, and the build → sign → broadcast path for carrying
//! a swap or approval call through the wallet. The agent signer supplies
//! the single owner signature; the outer transaction is signed by the same
//! agent key and broadcast through the chain's RPC provider.

use async_trait::async_trait;
use primitive_types::U256;
use std::sync::Arc;
use tracing::debug;

use crate::abi;
use crate::adapters::rpc::RpcProvider;
use crate::adapters::signer::{AgentSigner, TxRequest};
use crate::error::{Error, Result};

/// One inner call to be executed by the wallet
#[derive(Debug, Clone)]
pub struct MetaTx {
    pub to: String,
    pub value: U256,
    pub data: Vec<u8>,
}

/// A wallet transaction awaiting the owner signature
#[derive(Debug, Clone)]
pub struct UnsignedSafeTx {
    pub call: MetaTx,
    pub nonce: u64,
    pub digest: [u8; 32],
}

#[derive(Debug, Clone)]
pub struct SignedSafeTx {
    pub tx: UnsignedSafeTx,
    pub signature: Vec<u8>,
}

/// Gas choices made by the executor, applied to the outer transaction
#[derive(Debug, Clone, Default)]
pub struct GasSettings {
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

#[async_trait]
pub trait MultisigWallet: Send + Sync {
    fn address(&self) -> String;

    async fn owners(&self) -> Result<Vec<String>>;

    async fn threshold(&self) -> Result<u32>;

    /// Build a wallet transaction carrying a single inner call
    async fn new_tx(&self, calls: Vec<MetaTx>) -> Result<UnsignedSafeTx>;

    async fn sign(&self, unsigned: UnsignedSafeTx) -> Result<SignedSafeTx>;

    /// Broadcast the signed wallet transaction, returning the outer tx hash
    async fn execute(&self, signed: SignedSafeTx, gas: GasSettings) -> Result<String>;
}

/// Production adapter over an RPC provider and the agent signer
pub struct SafeWalletClient {
    rpc: Arc<dyn RpcProvider>,
    signer: Arc<dyn AgentSigner>,
    wallet_address: String,
    chain_id: u64,
}

impl SafeWalletClient {
    pub fn new(
        rpc: Arc<dyn RpcProvider>,
        signer: Arc<dyn AgentSigner>,
        wallet_address: &str,
        chain_id: u64,
    ) -> Self {
        Self {
            rpc,
            signer,
            wallet_address: wallet_address.to_lowercase(),
            chain_id,
        }
    }

    async fn read_nonce(&self) -> Result<u64> {
        let data = self
            .rpc
            .call(&self.wallet_address, &abi::SEL_NONCE)
            .await?;
        Ok(abi::decode_uint(&data)?.low_u64())
    }

    /// ABI-encode the wallet's execute entrypoint: the inner call, the
    /// default execution parameters, and the owner signature blob
    fn encode_execute(call: &MetaTx, signature: &[u8]) -> Result<Vec<u8>> {
        let mut head: Vec<[u8; 32]> = Vec::with_capacity(10);
        head.push(abi::address_word(&call.to)?);
        head.push(abi::uint_word(call.value));
        // offsets are filled after the head is laid out
        head.push([0u8; 32]); // data offset
        head.push([0u8; 32]); // operation = CALL
        head.push([0u8; 32]); // safeTxGas
        head.push([0u8; 32]); // baseGas
        head.push([0u8; 32]); // gasPrice
        head.push([0u8; 32]); // gasToken
        head.push([0u8; 32]); // refundReceiver
        head.push([0u8; 32]); // signatures offset

        let head_size = head.len() * 32;
        let data_tail = encode_bytes(&call.data);
        let signatures_offset = head_size + data_tail.len();

        head[2] = abi::uint_word(U256::from(head_size));
        head[9] = abi::uint_word(U256::from(signatures_offset));

        let mut out = Vec::with_capacity(4 + head_size + data_tail.len() + 64);
        out.extend_from_slice(&abi::SEL_EXEC_TRANSACTION);
        for word in head {
            out.extend_from_slice(&word);
        }
        out.extend_from_slice(&data_tail);
        out.extend_from_slice(&encode_bytes(signature));
        Ok(out)
    }
}

/// Length word plus the payload padded to a word boundary
fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + bytes.len() + 31);
    out.extend_from_slice(&abi::uint_word(U256::from(bytes.len())));
    out.extend_from_slice(bytes);
    let padding = (32 - bytes.len() % 32) % 32;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

#[async_trait]
impl MultisigWallet for SafeWalletClient {
    fn address(&self) -> String {
        self.wallet_address.clone()
    }

    async fn owners(&self) -> Result<Vec<String>> {
        let data = self
            .rpc
            .call(&self.wallet_address, &abi::encode_get_owners())
            .await?;
        abi::decode_address_array(&data)
    }

    async fn threshold(&self) -> Result<u32> {
        let data = self
            .rpc
            .call(&self.wallet_address, &abi::encode_get_threshold())
            .await?;
        Ok(abi::decode_uint(&data)?.low_u32())
    }

    async fn new_tx(&self, mut calls: Vec<MetaTx>) -> Result<UnsignedSafeTx> {
        if calls.len() != 1 {
            return Err(Error::SwapExecutionFailed(format!(
                "wallet adapter executes exactly one call per transaction, got {}",
                calls.len()
            )));
        }
        let call = calls.remove(0);
        let nonce = self.read_nonce().await?;
        let digest = abi::payload_digest(&call.to, call.value, &call.data, nonce);
        Ok(UnsignedSafeTx { call, nonce, digest })
    }

    async fn sign(&self, unsigned: UnsignedSafeTx) -> Result<SignedSafeTx> {
        let signature = self
            .signer
            .sign_payload(&self.wallet_address, self.chain_id, unsigned.digest)
            .await?;
        Ok(SignedSafeTx {
            tx: unsigned,
            signature,
        })
    }

    async fn execute(&self, signed: SignedSafeTx, gas: GasSettings) -> Result<String> {
        let data = Self::encode_execute(&signed.tx.call, &signed.signature)?;
        debug!(
            wallet = %self.wallet_address,
            nonce = signed.tx.nonce,
            inner_to = %signed.tx.call.to,
            "executing wallet transaction"
        );

        let request = TxRequest {
            from: self.signer.address(),
            to: self.wallet_address.clone(),
            // Native value rides inside the wallet; the outer call carries none
            value: U256::zero(),
            data,
            chain_id: self.chain_id,
            gas_limit: gas.gas_limit,
            gas_price: gas.gas_price,
            max_fee_per_gas: gas.max_fee_per_gas,
            max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
        };

        let raw = self.signer.sign_transaction(&request).await?;
        self.rpc.send_raw(&raw).await
    }
}

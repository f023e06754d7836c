//! Agent signer collaborator
//!
//! One process-held key, registered as an owner of every managed wallet,
//! satisfies each wallet's threshold-of-one policy. Key custody stays with
//! a signer service; this client delegates both payload signatures (for the
//! multi-sig approval) and transaction signing over JSON-RPC.

use async_trait::async_trait;
use primitive_types::U256;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{Error, Result};

/// An outer transaction from the agent's EOA, to be signed into raw bytes
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub from: String,
    pub to: String,
    pub value: U256,
    pub data: Vec<u8>,
    pub chain_id: u64,
    pub gas_limit: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

#[async_trait]
pub trait AgentSigner: Send + Sync {
    /// The agent's EOA address
    fn address(&self) -> String;

    /// Owner signature over a multi-sig payload digest
    async fn sign_payload(
        &self,
        wallet_address: &str,
        chain_id: u64,
        digest: [u8; 32],
    ) -> Result<Vec<u8>>;

    /// Sign an outer transaction into broadcastable raw bytes
    async fn sign_transaction(&self, tx: &TxRequest) -> Result<Vec<u8>>;
}

/// JSON-RPC signer-service client
pub struct RpcSigner {
    client: reqwest::Client,
    endpoint: String,
    address: String,
}

impl RpcSigner {
    pub fn new(endpoint: &str, address: &str, timeout: Duration) -> Result<Self> {
        if endpoint.is_empty() || address.is_empty() {
            return Err(Error::ConfigurationError(
                "signer endpoint and address are required".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("signer client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            address: address.to_lowercase(),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RpcConnectionFailed(format!("signer {}: {}", method, e)))?;

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| Error::RpcConnectionFailed(format!("signer {}: {}", method, e)))?;

        if let Some(error) = envelope.get("error") {
            return Err(Error::SwapExecutionFailed(format!(
                "signer refused {}: {}",
                method, error
            )));
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    fn decode_hex_result(value: &Value, what: &str) -> Result<Vec<u8>> {
        // eth_signTransaction may return either a raw string or {"raw": "0x.."}
        let raw = match value {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map
                .get("raw")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::SwapExecutionFailed(format!("signer {}: no raw", what)))?,
            _ => {
                return Err(Error::SwapExecutionFailed(format!(
                    "signer {}: unexpected result",
                    what
                )))
            }
        };
        hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| Error::SwapExecutionFailed(format!("signer {}: {}", what, e)))
    }
}

#[async_trait]
impl AgentSigner for RpcSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign_payload(
        &self,
        wallet_address: &str,
        chain_id: u64,
        digest: [u8; 32],
    ) -> Result<Vec<u8>> {
        let result = self
            .request(
                "account_signSafePayload",
                json!([{
                    "signer": self.address,
                    "safe": wallet_address,
                    "chainId": chain_id,
                    "digest": format!("0x{}", hex::encode(digest)),
                }]),
            )
            .await?;
        Self::decode_hex_result(&result, "payload signature")
    }

    async fn sign_transaction(&self, tx: &TxRequest) -> Result<Vec<u8>> {
        let mut params = serde_json::Map::new();
        params.insert("from".into(), json!(tx.from));
        params.insert("to".into(), json!(tx.to));
        params.insert("value".into(), json!(format!("0x{:x}", tx.value)));
        params.insert("data".into(), json!(format!("0x{}", hex::encode(&tx.data))));
        params.insert("chainId".into(), json!(format!("0x{:x}", tx.chain_id)));
        if let Some(gas) = tx.gas_limit {
            params.insert("gas".into(), json!(format!("0x{:x}", gas)));
        }
        if let (Some(max_fee), Some(tip)) = (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
            params.insert("maxFeePerGas".into(), json!(format!("0x{:x}", max_fee)));
            params.insert("maxPriorityFeePerGas".into(), json!(format!("0x{:x}", tip)));
        } else if let Some(gas_price) = tx.gas_price {
            params.insert("gasPrice".into(), json!(format!("0x{:x}", gas_price)));
        }

        let result = self.request("eth_signTransaction", json!([params])).await?;
        Self::decode_hex_result(&result, "transaction")
    }
}

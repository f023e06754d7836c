//! Ethereum-family JSON-RPC provider
//!
//! One instance per configured chain. Reads (code, balance, call, fee data)
//! and writes (raw broadcast, receipt wait) all go through here; the
//! receipt-status decoding is deliberately tolerant of the several shapes
//! providers return.

use async_trait::async_trait;
use primitive_types::U256;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Live fee information for gas-price selection
#[derive(Debug, Clone, Default)]
pub struct FeeData {
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub gas_price: Option<U256>,
}

impl FeeData {
    pub fn supports_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
}

/// A mined transaction receipt. `status` keeps the provider's raw value;
/// success is decided by [`Receipt::is_success`].
#[derive(Debug, Clone, Deserialize)]
pub struct Receipt {
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: String,
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    /// Providers disagree on the status field: hex "0x1", number 1, string
    /// "success", boolean true, or no status at all (pre-Byzantium style)
    /// with only a final hash. All of those count as success.
    pub fn is_success(&self) -> bool {
        match &self.status {
            Value::Null => !self.tx_hash.is_empty(),
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_u64() == Some(1),
            Value::String(s) => {
                let s = s.trim();
                s == "1" || s == "0x1" || s.eq_ignore_ascii_case("success") || s.eq_ignore_ascii_case("true")
            }
            _ => false,
        }
    }
}

/// Read/write chain access used by the validator, sizer, allowance manager
/// and executor
#[async_trait]
pub trait RpcProvider: Send + Sync {
    /// Contract code at an address; empty means no deployment
    async fn code(&self, address: &str) -> Result<Vec<u8>>;

    /// Native-asset balance
    async fn balance(&self, address: &str) -> Result<U256>;

    /// eth_call against a contract
    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>>;

    async fn fee_data(&self) -> Result<FeeData>;

    /// Broadcast a signed raw transaction, returning its hash
    async fn send_raw(&self, raw_tx: &[u8]) -> Result<String>;

    /// Poll for the receipt until mined or `timeout` elapses
    async fn wait_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<Receipt>;
}

/// reqwest-backed JSON-RPC client
pub struct HttpRpcProvider {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl HttpRpcProvider {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("rpc client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RpcConnectionFailed(format!("{}: {}", method, e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::ApiRateLimited(format!("{} at {}", method, self.url)));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| Error::RpcConnectionFailed(format!("{}: {}", method, e)))?;

        if let Some(error) = envelope.get("error") {
            return Err(Error::RpcConnectionFailed(format!(
                "{} returned error: {}",
                method, error
            )));
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    fn parse_quantity(value: &Value, what: &str) -> Result<U256> {
        match value {
            Value::String(s) => {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                if digits.is_empty() {
                    return Ok(U256::zero());
                }
                U256::from_str_radix(digits, 16)
                    .map_err(|e| Error::RpcConnectionFailed(format!("bad {}: {}", what, e)))
            }
            Value::Number(n) => Ok(U256::from(n.as_u64().unwrap_or(0))),
            Value::Null => Ok(U256::zero()),
            other => Err(Error::RpcConnectionFailed(format!(
                "unexpected {} value: {}",
                what, other
            ))),
        }
    }

    fn parse_bytes(value: &Value, what: &str) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                hex::decode(digits)
                    .map_err(|e| Error::RpcConnectionFailed(format!("bad {}: {}", what, e)))
            }
            Value::Null => Ok(Vec::new()),
            other => Err(Error::RpcConnectionFailed(format!(
                "unexpected {} value: {}",
                what, other
            ))),
        }
    }
}

#[async_trait]
impl RpcProvider for HttpRpcProvider {
    async fn code(&self, address: &str) -> Result<Vec<u8>> {
        let result = self
            .request("eth_getCode", json!([address, "latest"]))
            .await?;
        Self::parse_bytes(&result, "code")
    }

    async fn balance(&self, address: &str) -> Result<U256> {
        let result = self
            .request("eth_getBalance", json!([address, "latest"]))
            .await?;
        Self::parse_quantity(&result, "balance")
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let call = json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"]);
        let result = self.request("eth_call", call).await?;
        Self::parse_bytes(&result, "call result")
    }

    async fn fee_data(&self) -> Result<FeeData> {
        let gas_price = self
            .request("eth_gasPrice", json!([]))
            .await
            .and_then(|v| Self::parse_quantity(&v, "gasPrice"))
            .ok();

        // Not all providers expose a priority-fee endpoint; its absence just
        // means legacy pricing
        let priority = match self.request("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(v) => Self::parse_quantity(&v, "maxPriorityFeePerGas").ok(),
            Err(e) => {
                debug!(error = %e, "no EIP-1559 fee endpoint, falling back to legacy gas");
                None
            }
        };

        let max_fee = match (gas_price, priority) {
            (Some(gas), Some(tip)) => Some(gas.saturating_add(tip)),
            _ => None,
        };

        Ok(FeeData {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
            gas_price,
        })
    }

    async fn send_raw(&self, raw_tx: &[u8]) -> Result<String> {
        let result = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw_tx))]),
            )
            .await?;
        match result {
            Value::String(hash) => Ok(hash),
            other => Err(Error::RpcConnectionFailed(format!(
                "unexpected broadcast result: {}",
                other
            ))),
        }
    }

    async fn wait_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<Receipt> {
        let deadline = tokio::time::Instant::now() + timeout;
        let poll = Duration::from_secs(2);

        loop {
            let result = self
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !result.is_null() {
                let receipt: Receipt = serde_json::from_value(result)
                    .map_err(|e| Error::RpcConnectionFailed(format!("bad receipt: {}", e)))?;
                return Ok(receipt);
            }
            if tokio::time::Instant::now() + poll > deadline {
                return Err(Error::TransactionTimeout(timeout.as_secs()));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(status: Value, hash: &str) -> Receipt {
        Receipt {
            tx_hash: hash.to_string(),
            status,
            logs: vec![],
        }
    }

    #[test]
    fn test_receipt_status_tolerance() {
        assert!(receipt(json!("0x1"), "0xabc").is_success());
        assert!(receipt(json!(1), "0xabc").is_success());
        assert!(receipt(json!("success"), "0xabc").is_success());
        assert!(receipt(json!(true), "0xabc").is_success());
        assert!(receipt(json!("1"), "0xabc").is_success());
        // providers that omit status entirely: final hash counts
        assert!(receipt(Value::Null, "0xabc").is_success());
    }

    #[test]
    fn test_receipt_failure_shapes() {
        assert!(!receipt(json!("0x0"), "0xabc").is_success());
        assert!(!receipt(json!(0), "0xabc").is_success());
        assert!(!receipt(json!(false), "0xabc").is_success());
        assert!(!receipt(json!("reverted"), "0xabc").is_success());
        assert!(!receipt(Value::Null, "").is_success());
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(
            HttpRpcProvider::parse_quantity(&json!("0x10"), "x").unwrap(),
            U256::from(16u64)
        );
        assert_eq!(
            HttpRpcProvider::parse_quantity(&json!("0x"), "x").unwrap(),
            U256::zero()
        );
        assert_eq!(
            HttpRpcProvider::parse_quantity(&Value::Null, "x").unwrap(),
            U256::zero()
        );
        assert!(HttpRpcProvider::parse_quantity(&json!(["x"]), "x").is_err());
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(
            HttpRpcProvider::parse_bytes(&json!("0x0102"), "x").unwrap(),
            vec![1, 2]
        );
        assert!(HttpRpcProvider::parse_bytes(&Value::Null, "x")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_fee_data_eip1559_detection() {
        let legacy = FeeData {
            gas_price: Some(U256::from(5u64)),
            ..Default::default()
        };
        assert!(!legacy.supports_eip1559());

        let modern = FeeData {
            gas_price: Some(U256::from(5u64)),
            max_fee_per_gas: Some(U256::from(7u64)),
            max_priority_fee_per_gas: Some(U256::from(2u64)),
        };
        assert!(modern.supports_eip1559());
    }
}

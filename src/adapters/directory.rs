//! User/wallet directory collaborator
//!
//! The directory owns the mapping of callers to their multi-sig wallet
//! deployments. The core only ever reads it; the active-deployments list is
//! authoritative for wallet validation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Deployed,
    Pending,
    #[serde(other)]
    Unknown,
}

/// One wallet deployment on one network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletDeployment {
    #[serde(rename = "callerId")]
    pub caller_id: String,
    #[serde(rename = "walletAddress")]
    pub wallet_address: String,
    #[serde(rename = "networkKey")]
    pub network: String,
    pub active: bool,
    pub status: DeploymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    #[serde(rename = "callerId")]
    pub caller_id: String,
    #[serde(rename = "activeDeployments")]
    pub active_deployments: Vec<WalletDeployment>,
}

impl WalletRecord {
    /// Active deployment of `wallet_address` on `network`, if any
    pub fn deployment_on(&self, wallet_address: &str, network: &str) -> Option<&WalletDeployment> {
        self.active_deployments.iter().find(|d| {
            d.active
                && d.network == network
                && d.wallet_address.eq_ignore_ascii_case(wallet_address)
        })
    }

    /// Networks on which the caller has any active deployment
    pub fn active_networks(&self) -> Vec<String> {
        self.active_deployments
            .iter()
            .filter(|d| d.active)
            .map(|d| d.network.clone())
            .collect()
    }
}

#[async_trait]
pub trait WalletDirectory: Send + Sync {
    /// Fetch the caller's record; `None` when the caller is unknown
    async fn get_wallet(
        &self,
        caller_id: &str,
        wallet_address: Option<&str>,
    ) -> Result<Option<WalletRecord>>;
}

/// HTTP directory client
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigurationError(format!("directory client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WalletDirectory for HttpDirectory {
    async fn get_wallet(
        &self,
        caller_id: &str,
        wallet_address: Option<&str>,
    ) -> Result<Option<WalletRecord>> {
        let mut url = format!("{}/wallets/{}", self.base_url, caller_id);
        if let Some(address) = wallet_address {
            url = format!("{}?address={}", url, address);
        }

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::RpcConnectionFailed(format!(
                "directory returned {}",
                response.status()
            )));
        }

        let record: WalletRecord = response.json().await?;
        Ok(Some(record))
    }
}

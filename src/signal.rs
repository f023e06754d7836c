//! Trading signal value type and admission validation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Direction of the requested trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// An immutable trading signal as delivered by ingress.
///
/// The signal id is minted by the ingress adapter and is stable across
/// retransmissions; admission is idempotent on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "signalId")]
    pub signal_id: String,
    #[serde(rename = "callerId")]
    pub caller_id: String,
    #[serde(rename = "walletAddress")]
    pub wallet_address: String,
    pub side: Side,
    pub symbol: String,
    #[serde(rename = "entryPrice")]
    pub entry_price: f64,
    pub tp1: f64,
    pub tp2: f64,
    #[serde(rename = "stopLoss")]
    pub stop_loss: f64,
    pub deadline: DateTime<Utc>,
}

impl Signal {
    /// Validate shape and price-level ordering against `now`
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.signal_id.trim().is_empty() {
            return Err(Error::InvalidSignalFormat("missing signal id".into()));
        }
        if self.caller_id.trim().is_empty() {
            return Err(Error::InvalidSignalFormat("missing caller id".into()));
        }
        if self.symbol.trim().is_empty() {
            return Err(Error::InvalidSignalFormat("missing token symbol".into()));
        }
        if !is_address(&self.wallet_address) {
            return Err(Error::InvalidSignalFormat(format!(
                "'{}' is not a wallet address",
                self.wallet_address
            )));
        }

        for (name, price) in [
            ("entryPrice", self.entry_price),
            ("tp1", self.tp1),
            ("tp2", self.tp2),
            ("stopLoss", self.stop_loss),
        ] {
            if !price.is_finite() || price <= 0.0 {
                return Err(Error::InvalidSignalFormat(format!(
                    "{} must be a positive number, got {}",
                    name, price
                )));
            }
        }

        match self.side {
            Side::Buy => {
                if !(self.stop_loss < self.entry_price
                    && self.entry_price < self.tp1
                    && self.tp1 <= self.tp2)
                {
                    return Err(Error::InvalidPriceLevels(format!(
                        "buy requires stopLoss < entry < tp1 <= tp2, got sl={} entry={} tp1={} tp2={}",
                        self.stop_loss, self.entry_price, self.tp1, self.tp2
                    )));
                }
            }
            Side::Sell => {
                if !(self.tp2 <= self.tp1
                    && self.tp1 < self.entry_price
                    && self.entry_price < self.stop_loss)
                {
                    return Err(Error::InvalidPriceLevels(format!(
                        "sell requires tp2 <= tp1 < entry < stopLoss, got sl={} entry={} tp1={} tp2={}",
                        self.stop_loss, self.entry_price, self.tp1, self.tp2
                    )));
                }
            }
        }

        if self.deadline <= now {
            return Err(Error::SignalExpired(self.deadline.to_rfc3339()));
        }

        Ok(())
    }

    /// Compact context for user-visible rejections: symbol, side, short
    /// wallet suffix, signal id
    pub fn summary(&self) -> String {
        let suffix = if self.wallet_address.len() >= 6 {
            &self.wallet_address[self.wallet_address.len() - 6..]
        } else {
            self.wallet_address.as_str()
        };
        format!(
            "{} {} wallet=..{} signal={}",
            self.side, self.symbol, suffix, self.signal_id
        )
    }
}

/// Checksummed or lowercase 0x-prefixed 20-byte address
pub fn is_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

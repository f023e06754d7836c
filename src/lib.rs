//! Signal-driven trade orchestrator for multi-signature custodial wallets
//!
//! Clients submit trading signals; the orchestrator resolves the chain to
//! trade on, validates the caller's multi-sig wallet there, sizes a
//! position from the wallet's stablecoin balance, acquires a swap route
//! from a DEX aggregator, sets the required allowances through the wallet,
//! executes the swap, and monitors the position until a take-profit, stop,
//! trailing stop or deadline closes it.

pub mod abi;
pub mod adapters;
pub mod amount;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod flow;
pub mod monitor;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod signal;
pub mod sizing;
pub mod trade;
pub mod trading;
pub mod wallet;

#[cfg(test)]
pub mod testsupport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use scheduler::{Admission, Orchestrator};
pub use signal::{Side, Signal};
pub use trade::{Trade, TradeState};

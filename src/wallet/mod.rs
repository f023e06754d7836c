//! Wallet validation

pub mod validator;

pub use validator::{WalletCheck, WalletValidator};

//! Collaborator adapters
//!
//! Every external dependency of the pipeline sits behind a trait defined
//! here: chain RPC, the user/wallet directory, the price feed, the token
//! registries, the DEX aggregator, the multi-sig wallet, the agent signer,
//! and the outbound event bus. Production implementations are thin HTTP
//! clients; tests swap in deterministic stubs.

pub mod aggregator;
pub mod bus;
pub mod directory;
pub mod price;
pub mod registry;
pub mod rpc;
pub mod safe;
pub mod signer;

pub use aggregator::{DexAggregator, Quote};
pub use bus::{EventBus, Topic};
pub use directory::{WalletDeployment, WalletDirectory, WalletRecord};
pub use price::{PriceFeed, PricePoint};
pub use registry::TokenLookup;
pub use rpc::{FeeData, Receipt, RpcProvider};
pub use safe::{MetaTx, MultisigWallet, SafeWalletClient};
pub use signer::AgentSigner;

//! Swap execution: quoting, allowances, and the multi-sig trade path

pub mod allowance;
pub mod executor;
pub mod route;

pub use allowance::AllowanceManager;
pub use executor::{ChainContext, DryRunExecutor, Execute, ExecutionOutcome, TradeExecutor};
pub use route::RouteProvider;

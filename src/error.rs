//! Error types for the trade orchestrator

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an error, used for routing and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientFunds,
    Network,
    System,
    Auth,
}

/// How loudly an error should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Main error type; the code set is closed, one variant per code
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Signal admission errors
    #[error("Invalid signal format: {0}")]
    InvalidSignalFormat(String),

    #[error("Invalid price levels: {0}")]
    InvalidPriceLevels(String),

    #[error("Signal expired at {0}")]
    SignalExpired(String),

    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    // Wallet errors
    #[error("Wallet not deployed on {network}: {detail}")]
    SafeNotDeployed { network: String, detail: String },

    #[error("Invalid wallet configuration: {0}")]
    SafeInvalidConfiguration(String),

    #[error("Insufficient native balance on {network}: {detail}")]
    SafeInsufficientBalance { network: String, detail: String },

    // Sizing errors
    #[error("Insufficient stablecoin balance: {0}")]
    InsufficientStablecoinBalance(String),

    #[error("Invalid position percentage: {got} (allowed {min}..={max})")]
    InvalidPositionPercentage { got: u32, min: u32, max: u32 },

    #[error("Position size too small: {amount} is below minimum {minimum}")]
    PositionSizeTooSmall { amount: String, minimum: String },

    #[error("Position size too large: {0}")]
    PositionSizeTooLarge(String),

    // Swap errors
    #[error("Swap quote failed: {0}")]
    SwapQuoteFailed(String),

    #[error("Swap execution failed: {0}")]
    SwapExecutionFailed(String),

    #[error("Insufficient liquidity: {0}")]
    InsufficientLiquidity(String),

    #[error("Slippage too high: {0}")]
    SlippageTooHigh(String),

    // Chain / network errors
    #[error("RPC connection failed: {0}")]
    RpcConnectionFailed(String),

    #[error("Network congestion: {0}")]
    NetworkCongestion(String),

    #[error("Transaction timed out after {0}s")]
    TransactionTimeout(u64),

    #[error("Price data unavailable: {0}")]
    PriceDataUnavailable(String),

    #[error("API rate limited: {0}")]
    ApiRateLimited(String),

    // System errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("System shutting down")]
    SystemShutdown,

    #[error("Unknown error: {0}")]
    UnknownError(String),
}

impl Error {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidSignalFormat(_) => "INVALID_SIGNAL_FORMAT",
            Error::InvalidPriceLevels(_) => "INVALID_PRICE_LEVELS",
            Error::SignalExpired(_) => "SIGNAL_EXPIRED",
            Error::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            Error::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
            Error::SafeNotDeployed { .. } => "SAFE_NOT_DEPLOYED",
            Error::SafeInvalidConfiguration(_) => "SAFE_INVALID_CONFIGURATION",
            Error::SafeInsufficientBalance { .. } => "SAFE_INSUFFICIENT_BALANCE",
            Error::InsufficientStablecoinBalance(_) => "INSUFFICIENT_STABLECOIN_BALANCE",
            Error::InvalidPositionPercentage { .. } => "INVALID_POSITION_PERCENTAGE",
            Error::PositionSizeTooSmall { .. } => "POSITION_SIZE_TOO_SMALL",
            Error::PositionSizeTooLarge(_) => "POSITION_SIZE_TOO_LARGE",
            Error::SwapQuoteFailed(_) => "SWAP_QUOTE_FAILED",
            Error::SwapExecutionFailed(_) => "SWAP_EXECUTION_FAILED",
            Error::InsufficientLiquidity(_) => "INSUFFICIENT_LIQUIDITY",
            Error::SlippageTooHigh(_) => "SLIPPAGE_TOO_HIGH",
            Error::RpcConnectionFailed(_) => "RPC_CONNECTION_FAILED",
            Error::NetworkCongestion(_) => "NETWORK_CONGESTION",
            Error::TransactionTimeout(_) => "TRANSACTION_TIMEOUT",
            Error::PriceDataUnavailable(_) => "PRICE_DATA_UNAVAILABLE",
            Error::ApiRateLimited(_) => "API_RATE_LIMITED",
            Error::ConfigurationError(_) => "CONFIGURATION_ERROR",
            Error::SystemShutdown => "SYSTEM_SHUTDOWN",
            Error::UnknownError(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidSignalFormat(_)
            | Error::InvalidPriceLevels(_)
            | Error::SignalExpired(_)
            | Error::UnsupportedNetwork(_)
            | Error::SafeInvalidConfiguration(_)
            | Error::InvalidPositionPercentage { .. }
            | Error::PositionSizeTooSmall { .. }
            | Error::PositionSizeTooLarge(_)
            | Error::SlippageTooHigh(_) => ErrorKind::Validation,

            Error::TokenNotFound(_) | Error::SafeNotDeployed { .. } => ErrorKind::NotFound,

            Error::SafeInsufficientBalance { .. } | Error::InsufficientStablecoinBalance(_) => {
                ErrorKind::InsufficientFunds
            }

            Error::SwapQuoteFailed(_)
            | Error::InsufficientLiquidity(_)
            | Error::RpcConnectionFailed(_)
            | Error::NetworkCongestion(_)
            | Error::TransactionTimeout(_)
            | Error::PriceDataUnavailable(_) => ErrorKind::Network,

            Error::SwapExecutionFailed(_)
            | Error::ApiRateLimited(_)
            | Error::ConfigurationError(_)
            | Error::SystemShutdown
            | Error::UnknownError(_) => ErrorKind::System,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Error::InvalidSignalFormat(_)
            | Error::InvalidPriceLevels(_)
            | Error::SignalExpired(_)
            | Error::TokenNotFound(_)
            | Error::UnsupportedNetwork(_)
            | Error::InvalidPositionPercentage { .. }
            | Error::PositionSizeTooSmall { .. }
            | Error::PositionSizeTooLarge(_)
            | Error::SlippageTooHigh(_)
            | Error::NetworkCongestion(_) => Severity::Low,

            Error::SafeNotDeployed { .. }
            | Error::SafeInvalidConfiguration(_)
            | Error::SafeInsufficientBalance { .. }
            | Error::InsufficientStablecoinBalance(_)
            | Error::SwapQuoteFailed(_)
            | Error::InsufficientLiquidity(_)
            | Error::RpcConnectionFailed(_)
            | Error::TransactionTimeout(_)
            | Error::PriceDataUnavailable(_)
            | Error::ApiRateLimited(_) => Severity::Medium,

            Error::SwapExecutionFailed(_)
            | Error::ConfigurationError(_)
            | Error::UnknownError(_) => Severity::High,

            Error::SystemShutdown => Severity::Critical,
        }
    }

    /// Check if this error is retriable (transient)
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::SwapQuoteFailed(_)
                | Error::RpcConnectionFailed(_)
                | Error::NetworkCongestion(_)
                | Error::TransactionTimeout(_)
                | Error::PriceDataUnavailable(_)
                | Error::ApiRateLimited(_)
        )
    }

    /// Check if the caller can do something about this error
    pub fn is_actionable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::InsufficientFunds
        )
    }

    /// Short human recommendation attached to user-visible rejections
    pub fn recommendation(&self) -> &'static str {
        match self {
            Error::InvalidSignalFormat(_) => "Check the signal fields and resubmit",
            Error::InvalidPriceLevels(_) => {
                "Order the levels correctly for the side (stop < entry < tp1 <= tp2 for buys)"
            }
            Error::SignalExpired(_) => "Submit a signal with a deadline in the future",
            Error::TokenNotFound(_) => "Verify the token symbol or provide a contract address",
            Error::UnsupportedNetwork(_) => "Use a network configured for trading",
            Error::SafeNotDeployed { .. } => "Deploy the multi-sig wallet on that network first",
            Error::SafeInvalidConfiguration(_) => {
                "Review the wallet owners and threshold; the agent must be an owner"
            }
            Error::SafeInsufficientBalance { .. } => "Fund the wallet with native gas tokens",
            Error::InsufficientStablecoinBalance(_) => "Top up the wallet's stablecoin balance",
            Error::InvalidPositionPercentage { .. } => "Request a percentage between 1 and 80",
            Error::PositionSizeTooSmall { .. } => {
                "Increase the position percentage or deposit more funds"
            }
            Error::PositionSizeTooLarge(_) => "Reduce the requested position percentage",
            Error::SwapQuoteFailed(_) => "Retry shortly; the aggregator could not quote the pair",
            Error::SwapExecutionFailed(_) => "Inspect the transaction on chain before retrying",
            Error::InsufficientLiquidity(_) => "Reduce the trade size or pick a deeper market",
            Error::SlippageTooHigh(_) => "Raise the slippage tolerance or reduce size",
            Error::RpcConnectionFailed(_) => "Retry; the chain endpoint was unreachable",
            Error::NetworkCongestion(_) => "The chain is congested; execution may be delayed",
            Error::TransactionTimeout(_) => "The transaction may still confirm; check on chain",
            Error::PriceDataUnavailable(_) => "Retry shortly; market data sources were down",
            Error::ApiRateLimited(_) => "Back off and retry later",
            Error::ConfigurationError(_) => "Fix the orchestrator configuration and restart",
            Error::SystemShutdown => "The orchestrator is shutting down; resubmit after restart",
            Error::UnknownError(_) => "Inspect the logs for the underlying cause",
        }
    }
}

// Conversion from reqwest errors: timeouts and connect failures are network
// problems, HTTP 429 is rate limiting
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            Error::ApiRateLimited(e.to_string())
        } else {
            Error::RpcConnectionFailed(e.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::UnknownError(format!("serialization: {}", e))
    }
}

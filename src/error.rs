use std::path::PathBuf;

use thiserror::Error;

/// Fatal at startup. Nothing past config loading is allowed to end the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
    #[error("no usable wallet key ({attempted} attempted)")]
    NoUsableKeys { attempted: usize },
}

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("key #{index} is neither base58 nor a JSON byte array of {expected} bytes")]
    KeyFormat { index: usize, expected: usize },
    #[error("no wallet loaded")]
    NoWalletLoaded,
    #[error("failed to read key source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transaction decode failed: {0}")]
    Decode(String),
    #[error("signing failed: {0}")]
    Sign(String),
}

/// Ledger write/read failures. Logged, never allowed to abort a tick.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("ledger task join error: {0}")]
    Join(String),
}

/// Benign reasons a candidate does not become a trade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("run is halted after {failures} consecutive failures")]
    Halted { failures: u32 },
    #[error("cooldown active for {mint}: {remaining_ms}ms remaining")]
    Cooldown { mint: String, remaining_ms: u64 },
    #[error("wallet balance {balance} below floor {floor}")]
    BalanceInsufficient { balance: u64, floor: u64 },
    #[error("daily cap: {today} + {size} > {cap}")]
    DailyCapExceeded { today: u64, size: u64, cap: u64 },
    #[error("open positions {open} >= {max}")]
    OpenPositionCap { open: usize, max: usize },
    #[error("no route available for {mint}")]
    NoRouteAvailable { mint: String },
    #[error("safety check rejected {mint}: {reasons}")]
    SafetyRejected { mint: String, reasons: String },
}

impl SkipReason {
    /// Short stable label for logs and status.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Halted { .. } => "halted",
            SkipReason::Cooldown { .. } => "cooldown",
            SkipReason::BalanceInsufficient { .. } => "balance_insufficient",
            SkipReason::DailyCapExceeded { .. } => "daily_cap",
            SkipReason::OpenPositionCap { .. } => "open_position_cap",
            SkipReason::NoRouteAvailable { .. } => "no_route",
            SkipReason::SafetyRejected { .. } => "safety_rejected",
        }
    }
}

//! Error taxonomy of the reconciliation engine.

use kline_ingestor::{
    models::interval::IntervalError,
    providers::{ProviderError, ProviderInitError},
};
use shared_utils::env::MissingEnvVarError;
use thiserror::Error;

use crate::store::StoreError;

/// Invalid user or file supplied settings. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The interval spec did not parse.
    #[error("bad interval: {0}")]
    Interval(#[from] IntervalError),

    /// The symbol cannot name a table.
    #[error("invalid symbol {0:?}: must be non-empty ASCII alphanumeric")]
    InvalidSymbol(String),

    /// A setting is out of range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// No database location in the file or the environment.
    #[error("no database configured: {0}")]
    MissingDatabaseUrl(#[from] MissingEnvVarError),
}

/// Errors that end a reconciliation call.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad request parameters.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// After rounding and clamping, the range holds no candle.
    #[error("range [{start}, {end}] holds no {step} ms candle after aligning and clamping")]
    RangeTooShort { start: i64, end: i64, step: i64 },

    /// The store could not be opened or read.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The upstream rejected a validation lookup.
    #[error("upstream error: {0}")]
    Upstream(#[source] ProviderError),

    /// Not a single window could be fetched.
    #[error("upstream unavailable: none of {windows} fetch windows succeeded")]
    UpstreamUnavailable { windows: usize },

    /// The upstream session could not be created.
    #[error("provider init failed: {0}")]
    ProviderInit(#[from] ProviderInitError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidTableName(symbol) => {
                SyncError::Config(ConfigError::InvalidSymbol(symbol))
            }
            other => SyncError::StoreUnavailable(other),
        }
    }
}

use std::time::Duration;

use shared_utils::env::MissingEnvVarError;
use thiserror::Error;

/// Errors that can occur within a `KlineProvider` implementation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The upstream rejected the request for exceeding its rate limit (HTTP 429 or 418).
    #[error("rate limited by upstream (HTTP {status})")]
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// A transport-level failure (connection refused, TLS, redirect loop...).
    #[error("API request failed: {0}")]
    Request(reqwest::Error),

    /// The response body could not be decoded into klines.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The provider's API returned an error payload (e.g., invalid symbol).
    #[error("API error (HTTP {status}, code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// The request parameters were invalid for this specific provider.
    #[error("Invalid parameters for provider: {0}")]
    Validation(String),
}

impl ProviderError {
    /// Whether resubmitting the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Request(err)
        }
    }
}

/// Errors that can occur during the creation of a provider instance.
#[derive(Debug, Error)]
pub enum ProviderInitError {
    /// missed environment variable.
    #[error(transparent)]
    MissingEnvVar(#[from] MissingEnvVarError),

    /// failed to init reqwest client
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),

    /// API key contains invalid characters.
    #[error("Invalid API key format: {0}")]
    InvalidApiKey(#[from] reqwest::header::InvalidHeaderValue),

    /// Provider settings were rejected before any request was made.
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
}

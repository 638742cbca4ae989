use std::{num::NonZeroU32, time::Duration};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, StatusCode, Url, header};
use secrecy::{ExposeSecret, SecretString};
use shared_utils::env::get_env_var;
use tracing::{debug, warn};

use crate::{
    models::{interval::Interval, kline::KlineBatch, request_params::KlineRequest},
    providers::{
        KlineProvider, ProviderError, ProviderInitError,
        binance_rest::{
            params::{construct_params, earliest_params, validate_request},
            response::{BinanceErrorBody, parse_klines, used_weight},
        },
    },
};

/// Public spot API host.
pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const KLINES_PATH: &str = "/api/v3/klines";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Connection settings for [`BinanceProvider`].
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// Scheme and host, without the endpoint path.
    pub base_url: String,
    /// Sent as `X-MBX-APIKEY` when present. Public market data does not need it.
    pub api_key: Option<SecretString>,
    /// Per-request deadline enforced by the HTTP client.
    pub request_timeout: Duration,
    /// Client-side pacing applied before every request.
    pub requests_per_second: NonZeroU32,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(60),
            requests_per_second: nonzero!(20u32),
        }
    }
}

impl BinanceConfig {
    /// Load the API key from the named environment variable.
    pub fn with_api_key_env(mut self, var: &str) -> Result<Self, ProviderInitError> {
        self.api_key = Some(SecretString::new(get_env_var(var)?.into()));
        Ok(self)
    }
}

/// Klines provider backed by the Binance spot REST API.
pub struct BinanceProvider {
    client: Client,
    klines_url: Url,
    limiter: DefaultDirectRateLimiter,
}

impl BinanceProvider {
    /// Creates a new Binance provider from explicit settings.
    pub fn new(config: BinanceConfig) -> Result<Self, ProviderInitError> {
        let klines_url = Url::parse(&config.base_url)
            .and_then(|base| base.join(KLINES_PATH))
            .map_err(|e| {
                ProviderInitError::InvalidConfig(format!("base_url {:?}: {e}", config.base_url))
            })?;

        let mut headers = header::HeaderMap::new();
        // The key lives only in the client's default headers, marked sensitive.
        if let Some(key) = &config.api_key {
            let mut value = header::HeaderValue::from_str(key.expose_secret())?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            klines_url,
            limiter: RateLimiter::direct(Quota::per_second(config.requests_per_second)),
        })
    }

    /// Creates a provider with default settings and no API key.
    pub fn public() -> Result<Self, ProviderInitError> {
        Self::new(BinanceConfig::default())
    }

    async fn get(&self, query: &[(&'static str, String)]) -> Result<KlineBatch, ProviderError> {
        self.limiter.until_ready().await;

        let response = self
            .client
            .get(self.klines_url.clone())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let weight = used_weight(response.headers());

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            warn!(status = status.as_u16(), ?retry_after, "upstream rate limit hit");
            return Err(ProviderError::RateLimited {
                status: status.as_u16(),
                retry_after,
            });
        }

        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return Err(match serde_json::from_str::<BinanceErrorBody>(&text) {
                Ok(body) => ProviderError::Api {
                    status: status.as_u16(),
                    code: Some(body.code),
                    message: body.msg,
                },
                Err(_) => ProviderError::Api {
                    status: status.as_u16(),
                    code: None,
                    message: text,
                },
            });
        }

        let body = response.bytes().await?;
        let rows = parse_klines(&body)?;
        debug!(rows = rows.len(), used_weight = ?weight, "klines response");

        Ok(KlineBatch {
            rows,
            used_weight: weight,
        })
    }
}

#[async_trait]
impl KlineProvider for BinanceProvider {
    async fn fetch_klines(&self, req: &KlineRequest) -> Result<KlineBatch, ProviderError> {
        validate_request(req)?;
        self.get(&construct_params(req)).await
    }

    async fn earliest_open_time(
        &self,
        symbol: &str,
        interval: &Interval,
    ) -> Result<Option<i64>, ProviderError> {
        let batch = self
            .get(&earliest_params(symbol, &interval.to_string()))
            .await?;
        Ok(batch.rows.first().map(|k| k.open_time))
    }
}

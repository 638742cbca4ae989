//! Provider registry that maps configuration to concrete upstream sessions.
use std::{num::NonZeroU32, sync::Arc};

use kline_ingestor::providers::{
    KlineProvider, ProviderInitError,
    binance_rest::{BinanceConfig, BinanceProvider},
};

use crate::config::{ProviderId, UpstreamConfig};

/// Hands out one upstream session per reconciliation call.
pub trait ProviderSource: Send + Sync {
    /// Open a session. Dropping the returned handle releases it.
    fn open_session(&self) -> Result<Arc<dyn KlineProvider>, ProviderInitError>;
}

/// A ready-made provider shared across calls.
impl ProviderSource for Arc<dyn KlineProvider> {
    fn open_session(&self) -> Result<Arc<dyn KlineProvider>, ProviderInitError> {
        Ok(Arc::clone(self))
    }
}

/// Build and return a provider corresponding to the supplied configuration.
pub fn build_provider(cfg: &UpstreamConfig) -> Result<Arc<dyn KlineProvider>, ProviderInitError> {
    match cfg.provider {
        ProviderId::Binance => {
            let requests_per_second = NonZeroU32::new(cfg.requests_per_second).ok_or_else(|| {
                ProviderInitError::InvalidConfig("requests_per_second must be > 0".into())
            })?;
            let mut binance = BinanceConfig {
                base_url: cfg.base_url.clone(),
                api_key: None,
                request_timeout: cfg.request_timeout(),
                requests_per_second,
            };
            if let Some(var) = &cfg.api_key_env {
                binance = binance.with_api_key_env(var)?;
            }
            Ok(Arc::new(BinanceProvider::new(binance)?))
        }
    }
}

/// Builds a fresh provider from configuration for every session.
#[derive(Debug, Clone)]
pub struct ConfiguredSource {
    upstream: UpstreamConfig,
}

impl ConfiguredSource {
    pub fn new(upstream: UpstreamConfig) -> Self {
        Self { upstream }
    }
}

impl ProviderSource for ConfiguredSource {
    fn open_session(&self) -> Result<Arc<dyn KlineProvider>, ProviderInitError> {
        build_provider(&self.upstream)
    }
}

//! Engine configuration: parsing, defaults, validation and loading.
//!
//! A TOML file with three sections, every field optional:
//!
//! ```toml
//! [upstream]
//! provider = "binance"
//! base_url = "https://api.binance.com"
//! request_timeout_secs = 60
//! requests_per_second = 20
//! api_key_env = "BINANCE_API_KEY"
//!
//! [store]
//! database_url = "candles.db"
//!
//! [sync]
//! limit = 500
//! concurrency = 10
//! batch_size = 50
//! max_rounds = 10
//!
//! [sync.throttle]
//! high_water = 600
//! max_weight = 1200
//! backoff_coefficient_secs = 10.0
//! ```
//!
//! Entrypoints:
//! - Parse + validate from a TOML string: [`load_config_str`]
//! - Parse + validate from a file path: [`load_config_path`]

use std::{path::Path, time::Duration};

use anyhow::Context;
use kline_ingestor::models::request_params::MAX_LIMIT;
use serde::{Deserialize, Serialize};
use shared_utils::env::get_env_var;

use crate::errors::ConfigError;

/// Environment variable consulted when `[store].database_url` is absent.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Binance spot REST.
    #[default]
    Binance,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub upstream: UpstreamConfig,
    pub store: StoreConfig,
    pub sync: SyncSettings,
}

/// Upstream connection parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub provider: ProviderId,
    pub base_url: String,
    /// Deadline for a single request.
    pub request_timeout_secs: u64,
    /// Client-side request pacing.
    pub requests_per_second: u32,
    /// Name of the environment variable holding an API key, if one should be sent.
    pub api_key_env: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider: ProviderId::Binance,
            base_url: kline_ingestor::providers::binance_rest::provider::DEFAULT_BASE_URL.into(),
            request_timeout_secs: 60,
            requests_per_second: 20,
            api_key_env: None,
        }
    }
}

impl UpstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Store location.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite path or URL. Falls back to `DATABASE_URL`.
    pub database_url: Option<String>,
}

impl StoreConfig {
    /// The configured database, else the `DATABASE_URL` environment variable.
    pub fn resolve_database_url(&self) -> Result<String, ConfigError> {
        match &self.database_url {
            Some(url) if !url.trim().is_empty() => Ok(url.clone()),
            _ => Ok(get_env_var(DATABASE_URL_ENV)?),
        }
    }
}

/// Fetch scheduling knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Candles per upstream request.
    pub limit: u32,
    /// Requests in flight at once.
    pub concurrency: usize,
    /// Windows dispatched between two throttle checks.
    pub batch_size: usize,
    /// Retry round cap.
    pub max_rounds: u32,
    pub throttle: ThrottleConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            limit: 500,
            concurrency: 10,
            batch_size: 50,
            max_rounds: 10,
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Load-based backoff settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThrottleConfig {
    /// Load reading above which the scheduler backs off.
    pub high_water: u32,
    /// Top of the upstream's load scale.
    pub max_weight: u32,
    /// Sleep at full load; scales with the cube of `load / max_weight`.
    pub backoff_coefficient_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            high_water: 600,
            max_weight: 1200,
            backoff_coefficient_secs: 10.0,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl SyncConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sync;
        if s.limit == 0 || s.limit > MAX_LIMIT {
            return Err(invalid("sync.limit", format!("must be in 1..={MAX_LIMIT}")));
        }
        if s.concurrency == 0 {
            return Err(invalid("sync.concurrency", "must be > 0"));
        }
        if s.batch_size == 0 {
            return Err(invalid("sync.batch_size", "must be > 0"));
        }
        if s.max_rounds == 0 {
            return Err(invalid("sync.max_rounds", "must be > 0"));
        }
        let t = &s.throttle;
        if t.max_weight == 0 {
            return Err(invalid("sync.throttle.max_weight", "must be > 0"));
        }
        if t.high_water > t.max_weight {
            return Err(invalid(
                "sync.throttle.high_water",
                "must not exceed max_weight",
            ));
        }
        if !t.backoff_coefficient_secs.is_finite() || t.backoff_coefficient_secs < 0.0 {
            return Err(invalid(
                "sync.throttle.backoff_coefficient_secs",
                "must be a finite, non-negative number",
            ));
        }
        let u = &self.upstream;
        if u.request_timeout_secs == 0 {
            return Err(invalid("upstream.request_timeout_secs", "must be > 0"));
        }
        if u.requests_per_second == 0 {
            return Err(invalid("upstream.requests_per_second", "must be > 0"));
        }
        Ok(())
    }
}

/// Parse and validate a TOML document.
pub fn load_config_str(s: &str) -> anyhow::Result<SyncConfig> {
    let cfg: SyncConfig = toml::from_str(s).context("parsing sync config TOML")?;
    cfg.validate().context("validating sync config")?;
    Ok(cfg)
}

/// Read, parse and validate a TOML file.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<SyncConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    load_config_str(&s).with_context(|| format!("loading config file {}", path.display()))
}

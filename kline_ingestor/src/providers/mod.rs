//! Provider abstraction for kline sources.
//!
//! This module defines the [`KlineProvider`] trait, a unified interface for
//! fetching candle rows from an exchange API. Each concrete vendor (currently
//! Binance spot REST) implements it to handle request encoding, rate-limit
//! feedback and error classification.
//!
//! The trait is async and object safe, so callers hold an
//! `Arc<dyn KlineProvider>` and pick the implementation at runtime.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use kline_ingestor::models::{
//!     interval::Interval,
//!     kline::KlineBatch,
//!     request_params::KlineRequest,
//! };
//! use kline_ingestor::providers::{KlineProvider, ProviderError};
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl KlineProvider for MyProvider {
//!     async fn fetch_klines(&self, _req: &KlineRequest) -> Result<KlineBatch, ProviderError> {
//!         Ok(KlineBatch::default())
//!     }
//!
//!     async fn earliest_open_time(
//!         &self,
//!         _symbol: &str,
//!         _interval: &Interval,
//!     ) -> Result<Option<i64>, ProviderError> {
//!         Ok(None)
//!     }
//! }
//! ```

pub mod binance_rest;
pub mod errors;

use async_trait::async_trait;

pub use errors::{ProviderError, ProviderInitError};

use crate::models::{interval::Interval, kline::KlineBatch, request_params::KlineRequest};

/// Trait for fetching klines from a market data provider.
#[async_trait]
pub trait KlineProvider: Send + Sync {
    /// Fetch the klines of one request window.
    ///
    /// An empty but successful batch means the upstream has no data for the
    /// window; callers must not treat it as a failure.
    async fn fetch_klines(&self, req: &KlineRequest) -> Result<KlineBatch, ProviderError>;

    /// Open time of the first kline the upstream has for `symbol`, if any.
    async fn earliest_open_time(
        &self,
        symbol: &str,
        interval: &Interval,
    ) -> Result<Option<i64>, ProviderError>;
}

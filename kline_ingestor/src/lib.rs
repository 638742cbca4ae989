//! Upstream boundary for candle ingestion: the interval model, raw kline rows,
//! the [`providers::KlineProvider`] capability and its Binance REST implementation.

pub mod models;
pub mod providers;

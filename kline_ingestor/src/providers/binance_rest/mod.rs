//! Binance spot REST klines provider.

pub mod params;
pub mod provider;
pub mod response;

pub use provider::{BinanceConfig, BinanceProvider};

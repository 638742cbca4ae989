//! Canonical in-memory representation of one upstream kline row.
//!
//! This is the vendor-agnostic output of every
//! [`KlineProvider`](crate::providers::KlineProvider): the twelve fields of an
//! exchange kline, already parsed from their wire encoding.

use serde::{Deserialize, Serialize};

/// A single OHLCV kline as reported by the upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawKline {
    /// Open time, epoch milliseconds.
    pub open_time: i64,

    /// Opening price.
    pub open: f64,

    /// Highest price during the interval.
    pub high: f64,

    /// Lowest price during the interval.
    pub low: f64,

    /// Closing price.
    pub close: f64,

    /// Base asset volume.
    pub volume: f64,

    /// Close time, epoch milliseconds (open time + width - 1 for a well-formed row).
    pub close_time: i64,

    /// Quote asset volume.
    pub quote_volume: f64,

    /// Number of trades.
    pub trade_count: i64,

    /// Taker buy base asset volume.
    pub taker_buy_base_volume: f64,

    /// Taker buy quote asset volume.
    pub taker_buy_quote_volume: f64,

    /// Upstream-reserved field, stored as received.
    pub ignored: f64,
}

/// One upstream response: the rows plus the load reading that came with them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KlineBatch {
    /// Rows in the order the upstream returned them.
    pub rows: Vec<RawKline>,

    /// Request weight used in the current minute, on the upstream's 0..=1200 scale.
    /// `None` when the response carried no reading.
    pub used_weight: Option<u32>,
}

impl KlineBatch {
    /// Batch with rows and no load reading.
    pub fn new(rows: Vec<RawKline>) -> Self {
        Self {
            rows,
            used_weight: None,
        }
    }

    /// Attach a load reading.
    pub fn with_used_weight(mut self, weight: u32) -> Self {
        self.used_weight = Some(weight);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

use serde::{Deserialize, Serialize};

use crate::models::interval::Interval;

/// Largest `limit` the klines endpoint accepts.
pub const MAX_LIMIT: u32 = 1000;

/// Parameters for one upstream klines request.
///
/// Both bounds are inclusive open times in epoch milliseconds. Providers should
/// return at most `limit` rows whose open time falls in `[start_ms, end_ms]`,
/// ascending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineRequest {
    /// Trading symbol, e.g. `"BTCUSDT"`.
    pub symbol: String,

    /// Candle width.
    pub interval: Interval,

    /// First open time wanted (inclusive).
    pub start_ms: i64,

    /// Last open time wanted (inclusive).
    pub end_ms: i64,

    /// Row cap for the request.
    pub limit: u32,
}

impl KlineRequest {
    /// Number of candles the request spans on a gap-free grid.
    pub fn expected_rows(&self) -> i64 {
        let step = self.interval.as_millis();
        if self.end_ms < self.start_ms {
            0
        } else {
            (self.end_ms - self.start_ms) / step + 1
        }
    }
}

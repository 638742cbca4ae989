//! Persisted candle entity.
//!
//! A [`Candle`] is either a real bar (`bar` is `Some`) or a placeholder synthesized for a
//! grid slot the upstream confirmed it has no data for (`bar` is `None`). Placeholders
//! carry only their open/close times; consumers must skip or special-case them.

use kline_ingestor::models::kline::RawKline;

use crate::grid::Grid;

/// Reconciliation progress of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReconcileState {
    /// Never checked.
    #[default]
    Unchecked,
    /// Open time verified to sit on the grid (corrected if needed).
    Rounded,
    /// Part of a range verified gap-free.
    GapChecked,
}

impl ReconcileState {
    /// Stored integer code.
    pub const fn code(self) -> i32 {
        match self {
            ReconcileState::Unchecked => 0,
            ReconcileState::Rounded => 1,
            ReconcileState::GapChecked => 2,
        }
    }

    /// Decode a stored integer; unknown codes read as `Unchecked`.
    pub const fn from_code(code: i32) -> Self {
        match code {
            1 => ReconcileState::Rounded,
            2 => ReconcileState::GapChecked,
            _ => ReconcileState::Unchecked,
        }
    }
}

/// Trade data of a real candle.
#[derive(Debug, Clone, PartialEq)]
pub struct BarData {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: i64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub ignored: f64,
}

/// One bar of a symbol/interval series.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    /// Epoch ms, unique, on the grid.
    pub open_time: i64,
    /// Epoch ms, unique, `open_time + width - 1` for aligned rows.
    pub close_time: i64,
    /// `None` marks a placeholder.
    pub bar: Option<BarData>,
    /// Ingestion wall clock, epoch ms.
    pub loaded_at: i64,
    /// Open time was corrected onto the grid.
    pub rounded: bool,
    pub reconciled: ReconcileState,
}

impl Candle {
    /// Real candle from an upstream row, timestamps taken as-is.
    pub fn from_raw(raw: RawKline, loaded_at: i64) -> Self {
        Self {
            open_time: raw.open_time,
            close_time: raw.close_time,
            bar: Some(BarData {
                open: raw.open,
                high: raw.high,
                low: raw.low,
                close: raw.close,
                volume: raw.volume,
                quote_volume: raw.quote_volume,
                trade_count: raw.trade_count,
                taker_buy_base_volume: raw.taker_buy_base_volume,
                taker_buy_quote_volume: raw.taker_buy_quote_volume,
                ignored: raw.ignored,
            }),
            loaded_at,
            rounded: false,
            reconciled: ReconcileState::Unchecked,
        }
    }

    /// Placeholder for the slot opening at `open_time`.
    pub fn placeholder(open_time: i64, grid: &Grid, loaded_at: i64) -> Self {
        Self {
            open_time,
            close_time: grid.close_time(open_time),
            bar: None,
            loaded_at,
            rounded: false,
            reconciled: ReconcileState::Unchecked,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.bar.is_none()
    }
}

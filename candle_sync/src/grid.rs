//! UTC candle grid in epoch milliseconds.
//!
//! - Minute/hour/day grids are anchored at the Unix epoch.
//! - Week grids are anchored at Monday 1970-01-05T00:00:00Z, the upstream's week boundary.
//! - Every candle opens on `origin + k * step` and closes at `open + step - 1`.

use kline_ingestor::models::interval::{Interval, IntervalUnit, SECS_PER_DAY};

/// Monday 1970-01-05 00:00Z, four days after the Unix epoch.
pub const WEEK_MONDAY_ANCHOR_MS: i64 = 4 * SECS_PER_DAY * 1000;

/// A contiguous, grid-aligned run of missing candles. Both bounds are open times, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gap {
    /// First missing open time.
    pub start: i64,
    /// Last missing open time.
    pub end: i64,
}

impl Gap {
    /// Gap covering `[start, end]`.
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Number of candles the gap spans on a grid of width `step`.
    pub fn slots(&self, step: i64) -> i64 {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) / step + 1
        }
    }
}

/// Fixed-width candle grid.
///
/// A time is aligned when `(t - origin) % step == 0`. Only week grids have a non-zero
/// origin, so weekly open times are not multiples of the week width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    step: i64,
    origin: i64,
}

impl Grid {
    /// Grid with an explicit width and anchor. `step` must be positive.
    pub const fn new(step: i64, origin: i64) -> Self {
        Self { step, origin }
    }

    /// Grid matching the upstream's candle boundaries for `interval`.
    pub fn for_interval(interval: &Interval) -> Self {
        let origin = match interval.unit() {
            IntervalUnit::Week => WEEK_MONDAY_ANCHOR_MS,
            _ => 0,
        };
        Self::new(interval.as_millis(), origin)
    }

    /// Candle width in milliseconds.
    pub const fn step(&self) -> i64 {
        self.step
    }

    /// Grid anchor.
    pub const fn origin(&self) -> i64 {
        self.origin
    }

    /// Nearest grid point; exact midpoints go up.
    pub fn round(&self, t: i64) -> i64 {
        let offset = t - self.origin;
        self.origin + (offset + self.step / 2).div_euclid(self.step) * self.step
    }

    /// Largest grid point `<= t`.
    pub fn floor(&self, t: i64) -> i64 {
        self.origin + (t - self.origin).div_euclid(self.step) * self.step
    }

    /// Smallest grid point `>= t`.
    pub fn ceil(&self, t: i64) -> i64 {
        let f = self.floor(t);
        if f == t { f } else { f + self.step }
    }

    pub fn is_aligned(&self, t: i64) -> bool {
        (t - self.origin).rem_euclid(self.step) == 0
    }

    /// Number of grid points in `[start, end]` for aligned bounds.
    pub fn slots(&self, start: i64, end: i64) -> i64 {
        Gap::new(start, end).slots(self.step)
    }

    /// Close time of the candle opening at `open_time`.
    pub const fn close_time(&self, open_time: i64) -> i64 {
        open_time + self.step - 1
    }

    /// Open time of the most recent candle that has fully closed at `now`.
    pub fn last_closed_open(&self, now: i64) -> i64 {
        self.floor(now + 1) - self.step
    }
}

//! Gap detection over an ordered series of open times.
//!
//! [`GapCursor`] is the single-pass cursor shared by the store-backed
//! [`StreamingGapDetector`] and the normalizer's in-batch check: feed it ascending
//! open times, and it reports each missing run exactly once, in ascending order,
//! together with the position at which filler rows belong.

use tracing::debug;

use crate::{
    grid::{Gap, Grid},
    store::{CandleStore, StoreError, TableName},
};

/// A gap plus the index in the fed sequence before which its filler goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedGap {
    pub gap: Gap,
    pub index: usize,
}

/// Streaming cursor over ascending, grid-aligned open times in `[start, end]`.
#[derive(Debug)]
pub struct GapCursor {
    cursor: i64,
    end: i64,
    step: i64,
    position: usize,
    closed: bool,
    gaps: Vec<IndexedGap>,
}

impl GapCursor {
    /// Cursor over `[start, end]` on a grid of width `step`.
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self {
            cursor: start - step,
            end,
            step,
            position: 0,
            closed: false,
            gaps: Vec::new(),
        }
    }

    /// Feed the next open time.
    ///
    /// Times at or behind the cursor (before `start`, or repeats) are passed over.
    /// The first time past `end` closes the range, so a trailing gap lands before it.
    pub fn push(&mut self, open_time: i64) {
        if self.closed {
            self.position += 1;
            return;
        }
        if open_time > self.end {
            self.close();
            self.position += 1;
            return;
        }
        if open_time > self.cursor {
            let expected = self.cursor + self.step;
            if open_time > expected {
                self.emit(expected, open_time - self.step);
            }
            self.cursor = open_time;
        }
        self.position += 1;
    }

    /// Gaps found so far plus the trailing gap, if the feed stopped short of `end`.
    pub fn finish(mut self) -> Vec<IndexedGap> {
        self.close();
        self.gaps
    }

    fn close(&mut self) {
        if !self.closed {
            if self.cursor < self.end {
                self.emit(self.cursor + self.step, self.end);
            }
            self.closed = true;
        }
    }

    fn emit(&mut self, start: i64, end: i64) {
        if start <= end {
            self.gaps.push(IndexedGap {
                gap: Gap::new(start, end),
                index: self.position,
            });
        }
    }
}

/// Finds missing sub-ranges of a stored series.
pub trait GapDetector: Send + Sync {
    /// Missing grid slots in `[start, end]`, ascending and non-overlapping.
    /// Bounds are rounded onto `grid` first.
    fn find_gaps(
        &self,
        store: &mut dyn CandleStore,
        table: &TableName,
        grid: &Grid,
        start: i64,
        end: i64,
    ) -> Result<Vec<Gap>, StoreError>;
}

/// Count check, then a streaming ascending scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingGapDetector;

impl GapDetector for StreamingGapDetector {
    fn find_gaps(
        &self,
        store: &mut dyn CandleStore,
        table: &TableName,
        grid: &Grid,
        start: i64,
        end: i64,
    ) -> Result<Vec<Gap>, StoreError> {
        let start = grid.round(start);
        let end = grid.round(end);
        if end < start {
            return Ok(Vec::new());
        }

        let expected = grid.slots(start, end);
        let present = store.count_in_range(table, start, end)?;
        if present == expected {
            debug!(%table, start, end, rows = present, "range already complete");
            return Ok(Vec::new());
        }
        if present == 0 {
            return Ok(vec![Gap::new(start, end)]);
        }

        let mut cursor = GapCursor::new(start, end, grid.step());
        store.scan_open_times(table, start, end, &mut |t| cursor.push(t))?;
        let gaps: Vec<Gap> = cursor.finish().into_iter().map(|g| g.gap).collect();
        debug!(%table, start, end, rows = present, gaps = gaps.len(), "gap scan done");
        Ok(gaps)
    }
}

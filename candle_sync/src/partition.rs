//! Splits gaps into request-sized fetch windows.

use crate::grid::Gap;

/// Unit of work sent upstream: at most `limit` candles, both bounds inclusive open times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchWindow {
    pub start: i64,
    pub end: i64,
}

impl FetchWindow {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Candles the window spans on a grid of width `step`.
    pub fn slots(&self, step: i64) -> i64 {
        Gap::new(self.start, self.end).slots(step)
    }
}

/// Turns one gap into ordered fetch windows.
pub trait Partitioner: Send + Sync {
    /// Windows covering `gap` exactly, oldest first.
    fn partition(&self, gap: &Gap, step: i64, limit: u32) -> Vec<FetchWindow>;

    /// Windows for every gap, in gap order.
    fn partition_all(&self, gaps: &[Gap], step: i64, limit: u32) -> Vec<FetchWindow> {
        gaps.iter()
            .flat_map(|g| self.partition(g, step, limit))
            .collect()
    }
}

/// Greedy walk: each window spans `step * (limit - 1)`, the last is clipped to the gap end.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitPartitioner;

impl Partitioner for LimitPartitioner {
    fn partition(&self, gap: &Gap, step: i64, limit: u32) -> Vec<FetchWindow> {
        if gap.end < gap.start || step <= 0 {
            return Vec::new();
        }
        let span = step * (i64::from(limit.max(1)) - 1);
        let mut windows = Vec::with_capacity(gap.slots(step) as usize / limit.max(1) as usize + 1);
        let mut start = gap.start;
        while start <= gap.end {
            let end = (start + span).min(gap.end);
            windows.push(FetchWindow::new(start, end));
            start = end + step;
        }
        windows
    }
}

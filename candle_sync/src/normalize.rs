//! Per-window cleanup of upstream rows before they are written.
//!
//! - Off-grid open times are moved to the nearest grid point, keeping the row's
//!   original `close_time - open_time`.
//! - Slots of the window the upstream returned nothing for are filled with
//!   placeholder candles, spliced in so the batch stays ascending.
//! - Every row leaves with the same `loaded_at` stamp.

use kline_ingestor::models::kline::RawKline;

use crate::{
    candle::{Candle, ReconcileState},
    gaps::{GapCursor, IndexedGap},
    grid::Grid,
    partition::FetchWindow,
};

/// Result of normalizing one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Ascending, one row per slot.
    pub candles: Vec<Candle>,
    /// Real rows received.
    pub fetched: usize,
    /// Real rows whose open time was corrected.
    pub rounded: usize,
    /// Placeholders added.
    pub synthesized: usize,
}

/// Turns a raw upstream batch into rows ready for the store.
pub trait Normalizer: Send + Sync {
    fn normalize(
        &self,
        rows: Vec<RawKline>,
        window: &FetchWindow,
        grid: &Grid,
        loaded_at: i64,
    ) -> NormalizedBatch;
}

/// Rounding plus placeholder synthesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridNormalizer;

impl Normalizer for GridNormalizer {
    fn normalize(
        &self,
        rows: Vec<RawKline>,
        window: &FetchWindow,
        grid: &Grid,
        loaded_at: i64,
    ) -> NormalizedBatch {
        let (mut candles, rounded) = round_rows(rows, grid, loaded_at);
        let fetched = candles.len();

        let gaps = find_intra_batch_gaps(&candles, window.start, window.end, grid.step());
        let mut shift = 0;
        for g in gaps {
            let filler = generate_placeholders(g.gap.start, g.gap.end, grid, loaded_at);
            let n = filler.len();
            let at = g.index + shift;
            candles.splice(at..at, filler);
            shift += n;
        }

        for c in &mut candles {
            c.reconciled = ReconcileState::Rounded;
        }

        NormalizedBatch {
            synthesized: candles.len() - fetched,
            candles,
            fetched,
            rounded,
        }
    }
}

/// Move off-grid rows onto the grid, sort ascending and keep the first row per slot.
/// Returns the rows and how many were corrected.
pub fn round_rows(rows: Vec<RawKline>, grid: &Grid, loaded_at: i64) -> (Vec<Candle>, usize) {
    let mut rounded = 0;
    let mut out: Vec<Candle> = rows
        .into_iter()
        .map(|raw| {
            let mut c = Candle::from_raw(raw, loaded_at);
            if !grid.is_aligned(c.open_time) {
                let snapped = grid.round(c.open_time);
                c.close_time = snapped + (c.close_time - c.open_time);
                c.open_time = snapped;
                c.rounded = true;
                rounded += 1;
            }
            c
        })
        .collect();
    out.sort_by_key(|c| c.open_time);
    out.dedup_by_key(|c| c.open_time);
    (out, rounded)
}

/// Missing slots of `[start, end]` in an ascending batch, with splice positions.
pub fn find_intra_batch_gaps(rows: &[Candle], start: i64, end: i64, step: i64) -> Vec<IndexedGap> {
    let mut cursor = GapCursor::new(start, end, step);
    for c in rows {
        cursor.push(c.open_time);
    }
    cursor.finish()
}

/// One placeholder per slot of `[gap_start, gap_end]`.
pub fn generate_placeholders(gap_start: i64, gap_end: i64, grid: &Grid, loaded_at: i64) -> Vec<Candle> {
    let step = grid.step();
    let n = grid.slots(gap_start, gap_end).max(0) as usize;
    (0..n)
        .map(|i| Candle::placeholder(gap_start + i as i64 * step, grid, loaded_at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: i64 = 60_000;

    fn raw(open_time: i64) -> RawKline {
        RawKline {
            open_time,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 100.0,
            close_time: open_time + W - 1,
            quote_volume: 1050.0,
            trade_count: 7,
            taker_buy_base_volume: 50.0,
            taker_buy_quote_volume: 525.0,
            ignored: 0.0,
        }
    }

    fn grid() -> Grid {
        Grid::new(W, 0)
    }

    #[test]
    fn off_grid_row_is_snapped_and_width_kept() {
        let mut r = raw(5 * W + 1_234);
        r.close_time = 5 * W + 1_234 + W - 1;
        let (rows, rounded) = round_rows(vec![r, raw(6 * W)], &grid(), 99);
        assert_eq!(rounded, 1);
        assert_eq!(rows[0].open_time, 5 * W);
        assert_eq!(rows[0].close_time - rows[0].open_time, W - 1);
        assert!(rows[0].rounded);
        assert!(!rows[1].rounded);
    }

    #[test]
    fn snapping_onto_an_existing_slot_keeps_one_row() {
        let (rows, rounded) = round_rows(vec![raw(W), raw(W + 10)], &grid(), 0);
        assert_eq!(rounded, 1);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn inner_gap_of_k_slots_yields_k_placeholders_in_place() {
        let window = FetchWindow::new(0, 5 * W);
        let rows = vec![raw(0), raw(W), raw(5 * W)];
        let out = GridNormalizer.normalize(rows, &window, &grid(), 7);

        assert_eq!(out.fetched, 3);
        assert_eq!(out.synthesized, 3);
        let times: Vec<i64> = out.candles.iter().map(|c| c.open_time).collect();
        assert_eq!(times, vec![0, W, 2 * W, 3 * W, 4 * W, 5 * W]);
        let holes: Vec<bool> = out.candles.iter().map(Candle::is_placeholder).collect();
        assert_eq!(holes, vec![false, false, true, true, true, false]);
        assert!(out.candles.iter().all(|c| c.loaded_at == 7));
        assert!(out.candles.iter().all(|c| c.reconciled == ReconcileState::Rounded));
    }

    #[test]
    fn several_gaps_shift_insert_positions() {
        let window = FetchWindow::new(0, 6 * W);
        let rows = vec![raw(W), raw(3 * W), raw(4 * W)];
        let out = GridNormalizer.normalize(rows, &window, &grid(), 0);
        let times: Vec<i64> = out.candles.iter().map(|c| c.open_time).collect();
        assert_eq!(times, (0..7).map(|i| i * W).collect::<Vec<_>>());
        assert_eq!(out.synthesized, 4);
        assert!(out.candles[0].is_placeholder());
        assert!(out.candles[2].is_placeholder());
        assert!(out.candles[5].is_placeholder() && out.candles[6].is_placeholder());
    }

    #[test]
    fn empty_response_fills_whole_window() {
        let window = FetchWindow::new(2 * W, 4 * W);
        let out = GridNormalizer.normalize(Vec::new(), &window, &grid(), 0);
        assert_eq!(out.fetched, 0);
        assert_eq!(out.synthesized, 3);
        assert!(out.candles.iter().all(Candle::is_placeholder));
        assert_eq!(out.candles[2].close_time, 5 * W - 1);
    }
}

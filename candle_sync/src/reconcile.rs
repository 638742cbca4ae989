//! Reconciliation orchestrator.
//!
//! One [`Reconciler::reconcile`] call makes the stored series of a
//! (symbol, interval) pair gap-free over a range:
//!
//! `VALIDATE -> DETECT_GAPS -> (no gaps -> DONE) -> FETCH_AND_PERSIST -> DONE | FAILED`
//!
//! The upstream session and the store session are both opened inside the call
//! and dropped before it returns, on success and on error.

use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use kline_ingestor::{
    models::interval::Interval,
    providers::{KlineProvider, ProviderError},
};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    candle::{Candle, ReconcileState},
    config::SyncConfig,
    errors::{ConfigError, SyncError},
    gaps::{GapDetector, StreamingGapDetector},
    grid::{Gap, Grid},
    normalize::{GridNormalizer, Normalizer},
    partition::{LimitPartitioner, Partitioner},
    providers::ProviderSource,
    schedule::{FetchContext, FetchScheduler, FetchSummary, ScheduleSettings, Scheduler},
    store::{CandleStore, SortOrder, StoreConnector, TableName, WrittenReport},
    tz::ms_to_rfc3339,
};

/// States of a reconciliation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    DetectGaps,
    FetchAndPersist,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Validate => "VALIDATE",
            Phase::DetectGaps => "DETECT_GAPS",
            Phase::FetchAndPersist => "FETCH_AND_PERSIST",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        })
    }
}

/// What to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub symbol: String,
    /// Interval spec such as `"15m"`; parsed during validation.
    pub interval: String,
    /// Inclusive, epoch ms.
    pub start_ms: i64,
    /// Inclusive, epoch ms.
    pub end_ms: i64,
    /// Read the reconciled range back in this order.
    pub read_back: Option<SortOrder>,
}

impl ReconcileRequest {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>, start_ms: i64, end_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            start_ms,
            end_ms,
            read_back: None,
        }
    }

    pub fn read_back(mut self, order: SortOrder) -> Self {
        self.read_back = Some(order);
        self
    }
}

/// A request after validation: parsed interval, table and clamped grid bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRange {
    pub symbol: String,
    pub interval: Interval,
    pub grid: Grid,
    pub table: TableName,
    pub start: i64,
    pub end: i64,
}

/// Outcome of a reconciliation call.
#[derive(Debug, Clone)]
pub struct SeriesHandle {
    pub range: ValidatedRange,
    /// Gaps found before fetching.
    pub gaps: Vec<Gap>,
    pub summary: FetchSummary,
    /// Rows this call added to the table.
    pub written: WrittenReport,
    /// Gaps still present after fetching.
    pub unresolved: Vec<Gap>,
    /// The range read back, when requested.
    pub candles: Option<Vec<Candle>>,
}

impl SeriesHandle {
    /// Whether the range is now gap-free.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Top-level driver composing detector, partitioner, scheduler and store.
pub struct Reconciler<C, P> {
    connector: C,
    source: P,
    detector: Box<dyn GapDetector>,
    partitioner: Box<dyn Partitioner>,
    normalizer: Box<dyn Normalizer>,
    scheduler: Box<dyn Scheduler>,
    limit: u32,
    lookup_timeout: Duration,
}

impl<C: StoreConnector, P: ProviderSource> Reconciler<C, P> {
    /// Reconciler with the standard components.
    pub fn new(connector: C, source: P, settings: ScheduleSettings) -> Self {
        Self {
            connector,
            source,
            detector: Box::new(StreamingGapDetector),
            partitioner: Box::new(LimitPartitioner),
            normalizer: Box::new(GridNormalizer),
            limit: settings.limit,
            lookup_timeout: settings.request_timeout,
            scheduler: Box::new(FetchScheduler::new(settings)),
        }
    }

    pub fn from_config(connector: C, source: P, cfg: &SyncConfig) -> Self {
        Self::new(connector, source, ScheduleSettings::from_config(cfg))
    }

    pub fn with_detector(mut self, detector: impl GapDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    pub fn with_partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Box::new(partitioner);
        self
    }

    pub fn with_normalizer(mut self, normalizer: impl Normalizer + 'static) -> Self {
        self.normalizer = Box::new(normalizer);
        self
    }

    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    /// VALIDATE: parse, clamp to the upstream's first candle and the last closed one,
    /// align to the grid.
    async fn validate(
        &self,
        req: &ReconcileRequest,
        provider: &dyn KlineProvider,
    ) -> Result<ValidatedRange, SyncError> {
        let interval: Interval = req.interval.parse().map_err(ConfigError::from)?;
        let table = TableName::new(&req.symbol, &interval)?;
        let symbol = req.symbol.to_ascii_uppercase();
        let grid = Grid::for_interval(&interval);

        let earliest = match timeout(
            self.lookup_timeout,
            provider.earliest_open_time(&symbol, &interval),
        )
        .await
        {
            Ok(r) => r.map_err(SyncError::Upstream)?,
            Err(_) => return Err(SyncError::Upstream(ProviderError::Timeout)),
        };

        let now = Utc::now().timestamp_millis();
        let mut start = grid.round(req.start_ms);
        let end = grid.round(req.end_ms).min(grid.last_closed_open(now));
        if let Some(first) = earliest {
            start = start.max(grid.ceil(first));
        }

        // Inclusive bounds: `start == end` is one candle.
        if end < start {
            return Err(SyncError::RangeTooShort {
                start,
                end,
                step: grid.step(),
            });
        }

        Ok(ValidatedRange {
            symbol,
            interval,
            grid,
            table,
            start,
            end,
        })
    }

    /// Make `[start, end]` gap-free and report what was done.
    pub async fn reconcile(&self, req: &ReconcileRequest) -> Result<SeriesHandle, SyncError> {
        let out = self.run(req).await;
        if let Err(e) = &out {
            warn!(symbol = %req.symbol, interval = %req.interval, phase = %Phase::Failed, error = %e, "reconcile failed");
        }
        out
    }

    async fn run(&self, req: &ReconcileRequest) -> Result<SeriesHandle, SyncError> {
        info!(symbol = %req.symbol, interval = %req.interval, phase = %Phase::Validate, "reconcile started");
        let provider = self.source.open_session()?;
        let range = self.validate(req, provider.as_ref()).await?;
        let table = &range.table;

        let mut store = self.connector.connect()?;
        store.ensure_table(table)?;
        let before_id = store.latest_id(table)?;

        info!(
            %table,
            phase = %Phase::DetectGaps,
            start = %ms_to_rfc3339(range.start),
            end = %ms_to_rfc3339(range.end),
            "detecting gaps"
        );
        let gaps = self
            .detector
            .find_gaps(&mut store, table, &range.grid, range.start, range.end)?;

        let mut summary = FetchSummary::default();
        let mut unresolved = Vec::new();
        if !gaps.is_empty() {
            let windows = self
                .partitioner
                .partition_all(&gaps, range.grid.step(), self.limit);
            info!(
                %table,
                phase = %Phase::FetchAndPersist,
                gaps = gaps.len(),
                windows = windows.len(),
                "fetching missing ranges"
            );
            let ctx = FetchContext {
                provider: Arc::clone(&provider),
                store: &mut store,
                table,
                symbol: &range.symbol,
                interval: range.interval,
                grid: range.grid,
                normalizer: self.normalizer.as_ref(),
            };
            summary = self.scheduler.fetch_and_persist(ctx, windows).await?;

            unresolved = self
                .detector
                .find_gaps(&mut store, table, &range.grid, range.start, range.end)?;
        }

        let written = store.written_since(table, before_id)?;
        if let (Some(first), Some(last)) = (written.first_open_time, written.last_open_time) {
            info!(
                %table,
                "wrote {} candles from {} to {}",
                written.count,
                ms_to_rfc3339(first),
                ms_to_rfc3339(last)
            );
        }

        if unresolved.is_empty() {
            store.mark_reconciled(table, range.start, range.end, ReconcileState::GapChecked)?;
        } else {
            warn!(%table, unresolved = unresolved.len(), "range still has gaps");
        }

        let candles = match req.read_back {
            Some(order) => Some(store.read_range(table, range.start, range.end, order)?),
            None => None,
        };

        info!(
            %table,
            phase = %Phase::Done,
            fetched = summary.fetched,
            rounded = summary.rounded,
            synthesized = summary.synthesized,
            written = written.count,
            timeouts = summary.timeouts,
            dropped = summary.dropped,
            "reconcile finished"
        );

        Ok(SeriesHandle {
            range,
            gaps,
            summary,
            written,
            unresolved,
            candles,
        })
    }

    /// VALIDATE and DETECT_GAPS only; nothing is fetched or written.
    pub async fn find_gaps(
        &self,
        req: &ReconcileRequest,
    ) -> Result<(ValidatedRange, Vec<Gap>), SyncError> {
        let provider = self.source.open_session()?;
        let range = self.validate(req, provider.as_ref()).await?;
        let mut store = self.connector.connect()?;
        store.ensure_table(&range.table)?;
        let gaps = self.detector.find_gaps(
            &mut store,
            &range.table,
            &range.grid,
            range.start,
            range.end,
        )?;
        Ok((range, gaps))
    }

    /// Drop the (symbol, interval) table. Administrative only; `reconcile` never calls it.
    pub fn reset(&self, symbol: &str, interval: &str) -> Result<bool, SyncError> {
        let interval: Interval = interval.parse().map_err(ConfigError::from)?;
        let table = TableName::new(symbol, &interval)?;
        let mut store = self.connector.connect()?;
        let existed = store.drop_table(&table)?;
        warn!(%table, existed, "table reset");
        Ok(existed)
    }
}

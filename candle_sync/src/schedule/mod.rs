//! Bounded-concurrency, load-aware, retrying fetch of windows.
//!
//! One round dispatches every pending window in batches of `batch_size`; a
//! semaphore keeps at most `concurrency` requests in flight. Tasks only fetch:
//! each returns its window and outcome, and the driving task normalizes and
//! writes them one window at a time as they complete, so counters are only
//! ever touched by the driver. After each batch the highest load reading seen
//! is fed to the [`Throttle`].
//!
//! Store writes are synchronous and run on the driving task, so no further
//! completions are collected while a window is being written.
//!
//! Timeouts and rate-limit rejections are retried in the next round; other
//! failures drop the window. Retrying stops when a round has no retryable
//! failures, when every window of a round failed retryably (no progress), or
//! at `max_rounds`.

pub mod throttle;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use kline_ingestor::{
    models::{
        interval::Interval,
        kline::{KlineBatch, RawKline},
        request_params::KlineRequest,
    },
    providers::{KlineProvider, ProviderError},
};
use tokio::{sync::Semaphore, task::JoinSet, time::timeout};
use tracing::{debug, error, info, warn};

pub use throttle::Throttle;

use crate::{
    config::SyncConfig,
    errors::SyncError,
    grid::Grid,
    normalize::Normalizer,
    partition::FetchWindow,
    store::{CandleStore, TableName},
};

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub limit: u32,
    pub concurrency: usize,
    pub batch_size: usize,
    pub max_rounds: u32,
    pub request_timeout: Duration,
    pub throttle: Throttle,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl ScheduleSettings {
    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self {
            limit: cfg.sync.limit,
            concurrency: cfg.sync.concurrency.max(1),
            batch_size: cfg.sync.batch_size.max(1),
            max_rounds: cfg.sync.max_rounds.max(1),
            request_timeout: cfg.upstream.request_timeout(),
            throttle: Throttle::from(&cfg.sync.throttle),
        }
    }
}

/// Counters of one fetch phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Windows handed to the scheduler.
    pub windows: usize,
    /// Rounds run.
    pub rounds: u32,
    /// Windows that got a well-formed response.
    pub succeeded: usize,
    /// Real rows received.
    pub fetched: usize,
    /// Real rows whose open time was corrected.
    pub rounded: usize,
    /// Placeholder rows produced.
    pub synthesized: usize,
    /// Rows the store accepted.
    pub written: usize,
    /// Timed-out attempts, summed over rounds.
    pub timeouts: usize,
    /// Rate-limited attempts, summed over rounds.
    pub rate_limited: usize,
    /// Windows given up on after a non-retryable error.
    pub dropped: usize,
    /// Windows whose write failed.
    pub write_failures: usize,
    /// Windows still failing retryably when retries stopped.
    pub unresolved: Vec<FetchWindow>,
}

/// Everything a fetch phase needs from its caller.
pub struct FetchContext<'a> {
    pub provider: Arc<dyn KlineProvider>,
    pub store: &'a mut dyn CandleStore,
    pub table: &'a TableName,
    pub symbol: &'a str,
    pub interval: Interval,
    pub grid: Grid,
    pub normalizer: &'a dyn Normalizer,
}

/// Fetches windows and persists what comes back.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Fetch, normalize and write `windows`.
    ///
    /// Per-window failures are counted, never returned. Fails with
    /// [`SyncError::UpstreamUnavailable`] only when no window succeeded.
    async fn fetch_and_persist(
        &self,
        ctx: FetchContext<'_>,
        windows: Vec<FetchWindow>,
    ) -> Result<FetchSummary, SyncError>;
}

/// The round-based [`Scheduler`].
#[derive(Debug, Clone, Default)]
pub struct FetchScheduler {
    settings: ScheduleSettings,
}

type WindowOutcome = (FetchWindow, Result<KlineBatch, ProviderError>);

impl FetchScheduler {
    pub fn new(settings: ScheduleSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    /// One pass over `pending`. Returns the windows to retry, ascending.
    async fn run_round(
        &self,
        ctx: &mut FetchContext<'_>,
        pending: &[FetchWindow],
        summary: &mut FetchSummary,
    ) -> Vec<FetchWindow> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut retry = Vec::new();

        for batch in pending.chunks(self.settings.batch_size) {
            let mut tasks: JoinSet<WindowOutcome> = JoinSet::new();
            for &window in batch {
                let provider = Arc::clone(&ctx.provider);
                let semaphore = Arc::clone(&semaphore);
                let deadline = self.settings.request_timeout;
                let req = KlineRequest {
                    symbol: ctx.symbol.to_string(),
                    interval: ctx.interval,
                    start_ms: window.start,
                    end_ms: window.end,
                    limit: self.settings.limit,
                };
                tasks.spawn(async move {
                    // The semaphore is never closed, so this always yields a permit.
                    let _permit = semaphore.acquire_owned().await;
                    let result = match timeout(deadline, provider.fetch_klines(&req)).await {
                        Ok(r) => r,
                        Err(_) => Err(ProviderError::Timeout),
                    };
                    (window, result)
                });
            }

            let mut batch_weight: Option<u32> = None;
            let mut floor: Option<Duration> = None;

            while let Some(joined) = tasks.join_next().await {
                let (window, result) = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(error = %e, "fetch task failed");
                        summary.dropped += 1;
                        continue;
                    }
                };
                match result {
                    Ok(batch) => {
                        batch_weight = batch_weight.max(batch.used_weight);
                        summary.succeeded += 1;
                        self.persist(ctx, window, batch.rows, summary);
                    }
                    Err(ProviderError::RateLimited { status, retry_after }) => {
                        warn!(status, start = window.start, end = window.end, "window rate limited");
                        batch_weight = Some(self.settings.throttle.max_weight());
                        floor = floor.max(retry_after);
                        summary.rate_limited += 1;
                        retry.push(window);
                    }
                    Err(e) if e.is_retryable() => {
                        debug!(start = window.start, end = window.end, error = %e, "window timed out");
                        summary.timeouts += 1;
                        retry.push(window);
                    }
                    Err(e) => {
                        warn!(start = window.start, end = window.end, error = %e, "window dropped");
                        summary.dropped += 1;
                    }
                }
            }

            self.settings.throttle.pause(batch_weight, floor).await;
        }

        retry.sort();
        retry
    }

    fn persist(
        &self,
        ctx: &mut FetchContext<'_>,
        window: FetchWindow,
        rows: Vec<RawKline>,
        summary: &mut FetchSummary,
    ) {
        let loaded_at = Utc::now().timestamp_millis();
        let batch = ctx.normalizer.normalize(rows, &window, &ctx.grid, loaded_at);
        if batch.rounded > 0 {
            info!(
                table = %ctx.table,
                rounded = batch.rounded,
                start = window.start,
                "corrected off-grid open times"
            );
        }
        summary.fetched += batch.fetched;
        summary.rounded += batch.rounded;
        summary.synthesized += batch.synthesized;

        match ctx.store.insert_ignore(ctx.table, &batch.candles) {
            Ok(n) => {
                debug!(
                    start = window.start,
                    end = window.end,
                    fetched = batch.fetched,
                    synthesized = batch.synthesized,
                    written = n,
                    "window persisted"
                );
                summary.written += n;
            }
            Err(e) => {
                warn!(start = window.start, end = window.end, error = %e, "window write failed");
                summary.write_failures += 1;
            }
        }
    }
}

#[async_trait]
impl Scheduler for FetchScheduler {
    async fn fetch_and_persist(
        &self,
        mut ctx: FetchContext<'_>,
        windows: Vec<FetchWindow>,
    ) -> Result<FetchSummary, SyncError> {
        let mut summary = FetchSummary {
            windows: windows.len(),
            ..FetchSummary::default()
        };
        if windows.is_empty() {
            return Ok(summary);
        }

        let mut pending = windows;
        loop {
            summary.rounds += 1;
            info!(
                table = %ctx.table,
                round = summary.rounds,
                windows = pending.len(),
                "dispatching fetch round"
            );
            let retry = self.run_round(&mut ctx, &pending, &mut summary).await;

            if retry.is_empty() {
                break;
            }
            if retry.len() == pending.len() {
                warn!(round = summary.rounds, windows = retry.len(), "no progress, giving up on retries");
                summary.unresolved = retry;
                break;
            }
            if summary.rounds >= self.settings.max_rounds {
                warn!(round = summary.rounds, windows = retry.len(), "retry cap reached");
                summary.unresolved = retry;
                break;
            }
            pending = retry;
        }

        if summary.succeeded == 0 {
            return Err(SyncError::UpstreamUnavailable {
                windows: summary.windows,
            });
        }
        Ok(summary)
    }
}

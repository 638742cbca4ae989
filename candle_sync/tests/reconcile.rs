use std::{sync::Arc, time::Duration};

use candle_sync::{
    ConfigError, ReconcileRequest, Reconciler, SyncError,
    candle::{Candle, ReconcileState},
    grid::Gap,
    schedule::ScheduleSettings,
    store::{CandleStore, MemoryStore, SortOrder, SqliteStore, StoreConnector, TableName},
};
use chrono::Utc;
use kline_ingestor::{models::interval::Interval, providers::KlineProvider};
use tokio::time::Instant;

mod common;
use common::{MockProvider, t0};

const H: i64 = 3_600_000;

fn settings(limit: u32) -> ScheduleSettings {
    ScheduleSettings {
        limit,
        ..ScheduleSettings::default()
    }
}

fn table() -> TableName {
    let interval: Interval = "1h".parse().unwrap();
    TableName::new("BTCUSDT", &interval).unwrap()
}

fn upstream() -> MockProvider {
    MockProvider::new("1h", Some(t0() - 1000 * H))
}

fn reconciler(
    mem: &MemoryStore,
    provider: Arc<dyn KlineProvider>,
    limit: u32,
) -> Reconciler<MemoryStore, Arc<dyn KlineProvider>> {
    Reconciler::new(mem.clone(), provider, settings(limit))
}

fn stored_opens(mem: &MemoryStore) -> Vec<i64> {
    let mut s = mem.connect().unwrap();
    s.read_range(&table(), i64::MIN, i64::MAX, SortOrder::Ascending)
        .unwrap()
        .iter()
        .map(|c| c.open_time)
        .collect()
}

#[tokio::test]
async fn empty_store_three_widths_fills_with_real_rows() {
    let mem = MemoryStore::new();
    let r = reconciler(&mem, upstream().shared(), 500);
    let base = t0();

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 2 * H))
        .await
        .unwrap();

    assert_eq!(handle.gaps, vec![Gap::new(base, base + 2 * H)]);
    assert_eq!(handle.summary.windows, 1);
    assert_eq!(handle.summary.fetched, 3);
    assert_eq!(handle.summary.synthesized, 0);
    assert_eq!(handle.summary.rounded, 0);
    assert_eq!(handle.written.count, 3);
    assert_eq!(handle.written.first_open_time, Some(base));
    assert_eq!(handle.written.last_open_time, Some(base + 2 * H));
    assert!(handle.is_complete());
    assert_eq!(stored_opens(&mem), vec![base, base + H, base + 2 * H]);

    let mut s = mem.connect().unwrap();
    let rows = s
        .read_range(&table(), base, base + 2 * H, SortOrder::Ascending)
        .unwrap();
    assert!(rows.iter().all(|c| c.reconciled == ReconcileState::GapChecked));
}

#[tokio::test]
async fn missing_middle_slot_is_the_only_gap() {
    let mem = MemoryStore::new();
    let base = t0();
    {
        let mut s = mem.connect().unwrap();
        s.ensure_table(&table()).unwrap();
        let seed: Vec<Candle> = [base, base + 2 * H]
            .iter()
            .map(|&t| Candle::from_raw(common::kline(t, H), 1))
            .collect();
        s.insert_ignore(&table(), &seed).unwrap();
    }
    let r = reconciler(&mem, upstream().shared(), 500);

    let (range, gaps) = r
        .find_gaps(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 2 * H))
        .await
        .unwrap();
    assert_eq!(range.start, base);
    assert_eq!(range.end, base + 2 * H);
    assert_eq!(gaps, vec![Gap::new(base + H, base + H)]);

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 2 * H))
        .await
        .unwrap();
    assert_eq!(handle.written.count, 1);
    assert_eq!(handle.written.first_open_time, Some(base + H));
    assert_eq!(stored_opens(&mem), vec![base, base + H, base + 2 * H]);
}

#[tokio::test]
async fn reconcile_twice_is_idempotent() {
    let mem = MemoryStore::new();
    let provider = Arc::new(upstream().missing([t0() + 5 * H]));
    let r = reconciler(&mem, provider.clone(), 4);
    let req = ReconcileRequest::new("BTCUSDT", "1h", t0(), t0() + 23 * H);

    let first = r.reconcile(&req).await.unwrap();
    assert_eq!(first.written.count, 24);
    let calls = provider.calls();

    let second = r.reconcile(&req).await.unwrap();
    assert!(second.gaps.is_empty());
    assert_eq!(second.written.count, 0);
    assert_eq!(provider.calls(), calls);

    let mut s = mem.connect().unwrap();
    assert_eq!(s.row_count(&table()).unwrap(), 24);
}

#[tokio::test]
async fn empty_upstream_window_becomes_placeholders() {
    let mem = MemoryStore::new();
    let base = t0();
    let provider = upstream().missing((0..3).map(|i| base + i * H));
    let r = reconciler(&mem, provider.shared(), 500);

    let handle = r
        .reconcile(
            &ReconcileRequest::new("BTCUSDT", "1h", base, base + 2 * H).read_back(SortOrder::Ascending),
        )
        .await
        .unwrap();

    assert_eq!(handle.summary.fetched, 0);
    assert_eq!(handle.summary.synthesized, 3);
    assert_eq!(handle.written.count, 3);
    let rows = handle.candles.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|c| c.is_placeholder()));
    for (i, c) in rows.iter().enumerate() {
        assert_eq!(c.open_time, base + i as i64 * H);
        assert_eq!(c.close_time, c.open_time + H - 1);
    }
}

#[tokio::test]
async fn off_grid_rows_are_rounded_onto_the_grid() {
    let mem = MemoryStore::new();
    let base = t0();
    let provider = upstream().jitter(base + H, 1_500).jitter(base + 2 * H, -700);
    let r = reconciler(&mem, provider.shared(), 500);

    let handle = r
        .reconcile(
            &ReconcileRequest::new("BTCUSDT", "1h", base, base + 3 * H).read_back(SortOrder::Ascending),
        )
        .await
        .unwrap();

    assert_eq!(handle.summary.rounded, 2);
    assert_eq!(handle.summary.synthesized, 0);
    let rows = handle.candles.unwrap();
    let opens: Vec<i64> = rows.iter().map(|c| c.open_time).collect();
    assert_eq!(opens, vec![base, base + H, base + 2 * H, base + 3 * H]);
    assert!(rows[1].rounded && rows[2].rounded);
    assert!(!rows[0].rounded);
    assert!(rows.iter().all(|c| c.close_time - c.open_time == H - 1));
}

#[tokio::test]
async fn timed_out_window_is_retried_in_a_later_round() {
    let mem = MemoryStore::new();
    let base = t0();
    // limit 3: windows start at base, base + 3h, base + 6h.
    let provider = Arc::new(upstream().flaky(base + 3 * H, 1));
    let r = reconciler(&mem, provider.clone(), 3);

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 8 * H))
        .await
        .unwrap();

    assert_eq!(handle.summary.windows, 3);
    assert_eq!(handle.summary.rounds, 2);
    assert_eq!(handle.summary.timeouts, 1);
    assert!(handle.is_complete());
    assert_eq!(handle.written.count, 9);
    assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn permanently_stuck_window_is_reported_unresolved() {
    let mem = MemoryStore::new();
    let base = t0();
    let provider = Arc::new(upstream().stuck(base + 3 * H));
    let r = reconciler(&mem, provider.clone(), 3);

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 8 * H))
        .await
        .unwrap();

    assert!(handle.summary.rounds <= ScheduleSettings::default().max_rounds);
    assert_eq!(handle.summary.unresolved.len(), 1);
    assert_eq!(handle.unresolved, vec![Gap::new(base + 3 * H, base + 5 * H)]);
    assert!(!handle.is_complete());
    assert_eq!(handle.written.count, 6);

    // The range is not marked gap-checked while gaps remain.
    let mut s = mem.connect().unwrap();
    let rows = s
        .read_range(&table(), base, base + 8 * H, SortOrder::Ascending)
        .unwrap();
    assert!(rows.iter().all(|c| c.reconciled == ReconcileState::Rounded));
}

#[tokio::test]
async fn rejected_window_is_dropped_without_retry() {
    let mem = MemoryStore::new();
    let base = t0();
    let provider = Arc::new(upstream().api_error(base + 3 * H));
    let r = reconciler(&mem, provider.clone(), 3);

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 8 * H))
        .await
        .unwrap();

    assert_eq!(handle.summary.dropped, 1);
    assert_eq!(handle.summary.timeouts, 0);
    assert_eq!(handle.summary.rounds, 1);
    // One call per window: the rejected one is never resubmitted.
    assert_eq!(provider.calls(), 3);
    assert_eq!(handle.unresolved, vec![Gap::new(base + 3 * H, base + 5 * H)]);
    assert_eq!(handle.written.count, 6);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_window_backs_off_then_succeeds() {
    let mem = MemoryStore::new();
    let base = t0();
    let provider = Arc::new(upstream().rate_limited(base + 3 * H, 1));
    let settings = settings(3);
    let full_load = settings
        .throttle
        .backoff(settings.throttle.max_weight())
        .unwrap();
    let r = Reconciler::new(mem.clone(), provider.clone() as Arc<dyn KlineProvider>, settings);

    let started = Instant::now();
    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 8 * H))
        .await
        .unwrap();

    assert_eq!(handle.summary.rate_limited, 1);
    assert_eq!(handle.summary.rounds, 2);
    assert!(handle.is_complete());
    assert_eq!(provider.calls(), 4);
    // A rejection counts as a maximal load reading.
    assert!(started.elapsed() >= full_load);
}

#[tokio::test(start_paused = true)]
async fn high_load_reading_pauses_after_the_batch() {
    let mem = MemoryStore::new();
    let base = t0();
    let settings = settings(500);
    let expected = settings.throttle.backoff(900).unwrap();
    let r = Reconciler::new(
        mem.clone(),
        upstream().used_weight(900).shared(),
        settings,
    );

    let started = Instant::now();
    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 2 * H))
        .await
        .unwrap();

    assert_eq!(handle.written.count, 3);
    assert!(started.elapsed() >= expected);
}

#[tokio::test(start_paused = true)]
async fn load_below_high_water_does_not_pause() {
    let mem = MemoryStore::new();
    let base = t0();
    let settings = settings(500);
    assert!(settings.throttle.backoff(600).is_none());
    let r = Reconciler::new(
        mem.clone(),
        upstream().used_weight(600).shared(),
        settings,
    );

    let started = Instant::now();
    r.reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 2 * H))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn every_window_failing_is_upstream_unavailable() {
    let mem = MemoryStore::new();
    let r = reconciler(&mem, upstream().always_fail().shared(), 500);

    let err = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", t0(), t0() + 5 * H))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UpstreamUnavailable { windows: 1 }));
}

#[tokio::test]
async fn write_failures_are_counted_not_raised() {
    let mem = MemoryStore::new();
    let r = reconciler(&mem, upstream().shared(), 500);
    mem.set_fail_writes(true);

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", t0(), t0() + 5 * H))
        .await
        .unwrap();
    assert_eq!(handle.summary.write_failures, 1);
    assert_eq!(handle.written.count, 0);
    assert_eq!(handle.unresolved, vec![Gap::new(t0(), t0() + 5 * H)]);
}

#[tokio::test]
async fn single_candle_range_reconciles_one_row() {
    let mem = MemoryStore::new();
    let r = reconciler(&mem, upstream().shared(), 500);

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", t0(), t0()))
        .await
        .unwrap();
    assert_eq!(handle.gaps, vec![Gap::new(t0(), t0())]);
    assert_eq!(handle.written.count, 1);
    assert!(handle.is_complete());
    assert_eq!(stored_opens(&mem), vec![t0()]);
}

#[tokio::test]
async fn range_empty_after_clamping_is_rejected() {
    let mem = MemoryStore::new();
    // Upstream history starts after the requested end.
    let provider = MockProvider::new("1h", Some(t0() + 5 * H));
    let r = reconciler(&mem, provider.shared(), 500);

    let err = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", t0(), t0() + 2 * H))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::RangeTooShort { start, end, step: H } if start == t0() + 5 * H && end == t0() + 2 * H
    ));

    // An end that rounds below the start is empty too.
    let r = reconciler(&mem, upstream().shared(), 500);
    let err = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", t0() + 40 * 60_000, t0() + 20 * 60_000))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RangeTooShort { .. }));
    assert!(!mem.connect().unwrap().table_exists(&table()).unwrap());
}

#[tokio::test]
async fn bad_interval_and_symbol_are_config_errors() {
    let mem = MemoryStore::new();
    let r = reconciler(&mem, upstream().shared(), 500);

    let err = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1x", t0(), t0() + 5 * H))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(ConfigError::Interval(_))));

    let err = r
        .reconcile(&ReconcileRequest::new("BTC-USDT", "1h", t0(), t0() + 5 * H))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Config(ConfigError::InvalidSymbol(_))));
}

#[tokio::test]
async fn store_connect_failure_is_store_unavailable() {
    let mem = MemoryStore::new();
    mem.set_fail_connect(true);
    let r = reconciler(&mem, upstream().shared(), 500);

    let err = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", t0(), t0() + 5 * H))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::StoreUnavailable(_)));
}

#[tokio::test]
async fn range_is_clamped_to_upstream_history_and_closed_candles() {
    let mem = MemoryStore::new();
    let base = t0();
    let r = reconciler(&mem, MockProvider::new("1h", Some(base + 2 * H)).shared(), 500);
    let far_future = Utc::now().timestamp_millis() + 1000 * H;

    let (range, _) = r
        .find_gaps(&ReconcileRequest::new("BTCUSDT", "1h", base, far_future))
        .await
        .unwrap();
    assert_eq!(range.start, base + 2 * H);
    let now = Utc::now().timestamp_millis();
    assert!(range.end + H <= now + 1);
    assert!(range.end + 2 * H > now);
}

#[tokio::test]
async fn read_back_descending() {
    let mem = MemoryStore::new();
    let base = t0();
    let r = reconciler(&mem, upstream().shared(), 500);

    let handle = r
        .reconcile(
            &ReconcileRequest::new("btcusdt", "1h", base, base + 4 * H).read_back(SortOrder::Descending),
        )
        .await
        .unwrap();
    let opens: Vec<i64> = handle.candles.unwrap().iter().map(|c| c.open_time).collect();
    assert_eq!(opens, (0..5).rev().map(|i| base + i * H).collect::<Vec<_>>());
    assert_eq!(handle.range.symbol, "BTCUSDT");
}

#[tokio::test]
async fn sqlite_end_to_end_and_reset() {
    let (db, _conn) = common::setup_db();
    let base = t0();
    let provider = upstream().missing([base + 7 * H]);
    let r = Reconciler::new(db.connector(), provider.shared(), settings(5));

    let handle = r
        .reconcile(&ReconcileRequest::new("BTCUSDT", "1h", base, base + 11 * H))
        .await
        .unwrap();
    assert_eq!(handle.summary.windows, 3);
    assert_eq!(handle.summary.synthesized, 1);
    assert!(handle.is_complete());

    let mut store = SqliteStore::open(&db.path).unwrap();
    let rows = store
        .read_range(&table(), base, base + 11 * H, SortOrder::Ascending)
        .unwrap();
    assert_eq!(rows.len(), 12);
    assert!(rows[7].is_placeholder());
    assert!(rows.iter().all(|c| c.reconciled == ReconcileState::GapChecked));
    drop(store);

    assert!(r.reset("BTCUSDT", "1h").unwrap());
    assert!(!r.reset("BTCUSDT", "1h").unwrap());
}

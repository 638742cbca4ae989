#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use candle_sync::{db::connection, store::SqliteConnector};
use chrono::{TimeZone, Utc};
use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use kline_ingestor::{
    models::{
        interval::Interval,
        kline::{KlineBatch, RawKline},
        request_params::KlineRequest,
    },
    providers::{KlineProvider, ProviderError},
};
use tempfile::TempDir;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestDb {
    _dir: TempDir,    // keep alive for the life of the test
    pub path: String, // <tmpdir>/test.db
}

impl TestDb {
    pub fn connector(&self) -> SqliteConnector {
        SqliteConnector::new(self.path.clone())
    }
}

pub fn setup_db() -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("test.db");
    let path = p.to_string_lossy().to_string();

    let conn = connection::connect_sqlite(&path).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal"); // WAL is persistent per DB file

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

/// 2024-01-01T00:00:00Z.
pub fn t0() -> i64 {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
        .timestamp_millis()
}

pub fn kline(open_time: i64, step: i64) -> RawKline {
    let px = 100.0 + (open_time / step % 50) as f64;
    RawKline {
        open_time,
        open: px,
        high: px + 1.0,
        low: px - 1.0,
        close: px + 0.5,
        volume: 10.0,
        close_time: open_time + step - 1,
        quote_volume: 1000.0,
        trade_count: 42,
        taker_buy_base_volume: 5.0,
        taker_buy_quote_volume: 500.0,
        ignored: 0.0,
    }
}

/// Scripted upstream: a full grid of rows from `earliest`, with holes, jitter and failures.
pub struct MockProvider {
    step: i64,
    earliest: Option<i64>,
    /// Open times the upstream has no data for.
    missing: HashSet<i64>,
    /// Open time -> millisecond offset applied to the returned row.
    jitter: HashMap<i64, i64>,
    /// Window start -> number of timeouts left before it answers.
    flaky: Mutex<HashMap<i64, usize>>,
    /// Window starts that time out forever.
    stuck: HashSet<i64>,
    /// Window starts the upstream rejects outright.
    rejected: HashSet<i64>,
    /// Window start -> number of rate-limit rejections left before it answers.
    throttled: Mutex<HashMap<i64, usize>>,
    always_fail: bool,
    used_weight: u32,
    pub calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(interval: &str, earliest: Option<i64>) -> Self {
        let interval: Interval = interval.parse().unwrap();
        Self {
            step: interval.as_millis(),
            earliest,
            missing: HashSet::new(),
            jitter: HashMap::new(),
            flaky: Mutex::new(HashMap::new()),
            stuck: HashSet::new(),
            rejected: HashSet::new(),
            throttled: Mutex::new(HashMap::new()),
            always_fail: false,
            used_weight: 10,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn missing(mut self, open_times: impl IntoIterator<Item = i64>) -> Self {
        self.missing.extend(open_times);
        self
    }

    pub fn jitter(mut self, open_time: i64, offset: i64) -> Self {
        self.jitter.insert(open_time, offset);
        self
    }

    pub fn flaky(self, window_start: i64, timeouts: usize) -> Self {
        self.flaky.lock().unwrap().insert(window_start, timeouts);
        self
    }

    pub fn stuck(mut self, window_start: i64) -> Self {
        self.stuck.insert(window_start);
        self
    }

    pub fn api_error(mut self, window_start: i64) -> Self {
        self.rejected.insert(window_start);
        self
    }

    pub fn rate_limited(self, window_start: i64, rejections: usize) -> Self {
        self.throttled.lock().unwrap().insert(window_start, rejections);
        self
    }

    /// Load reading attached to every successful response.
    pub fn used_weight(mut self, weight: u32) -> Self {
        self.used_weight = weight;
        self
    }

    pub fn always_fail(mut self) -> Self {
        self.always_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<dyn KlineProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl KlineProvider for MockProvider {
    async fn fetch_klines(&self, req: &KlineRequest) -> Result<KlineBatch, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || self.stuck.contains(&req.start_ms) {
            return Err(ProviderError::Timeout);
        }
        if self.rejected.contains(&req.start_ms) {
            return Err(ProviderError::Api {
                status: 400,
                code: Some(-1121),
                message: "Invalid symbol.".into(),
            });
        }
        if let Some(left) = self.throttled.lock().unwrap().get_mut(&req.start_ms) {
            if *left > 0 {
                *left -= 1;
                return Err(ProviderError::RateLimited {
                    status: 429,
                    retry_after: None,
                });
            }
        }
        if let Some(left) = self.flaky.lock().unwrap().get_mut(&req.start_ms) {
            if *left > 0 {
                *left -= 1;
                return Err(ProviderError::Timeout);
            }
        }

        let first = self.earliest.unwrap_or(i64::MIN).max(req.start_ms);
        let first = first + (self.step - first.rem_euclid(self.step)) % self.step;
        let rows = (0..)
            .map(|i| first + i * self.step)
            .take_while(|t| *t <= req.end_ms)
            .take(req.limit as usize)
            .filter(|t| !self.missing.contains(t))
            .map(|t| {
                let mut row = kline(t, self.step);
                if let Some(off) = self.jitter.get(&t) {
                    row.open_time += off;
                    row.close_time += off;
                }
                row
            })
            .collect();
        Ok(KlineBatch::new(rows).with_used_weight(self.used_weight))
    }

    async fn earliest_open_time(
        &self,
        _symbol: &str,
        _interval: &Interval,
    ) -> Result<Option<i64>, ProviderError> {
        Ok(self.earliest)
    }
}

//! In-memory [`CandleStore`] for tests and dry runs.
//!
//! Clones share the same tables, so a [`MemoryStore`] is also its own
//! [`StoreConnector`]: every session sees what earlier sessions wrote.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use crate::{
    candle::{Candle, ReconcileState},
    store::{CandleStore, SortOrder, StoreConnector, StoreError, TableName, WrittenReport},
};

#[derive(Debug, Default)]
struct MemTable {
    next_id: i64,
    // open_time -> (id, row)
    rows: BTreeMap<i64, (i64, Candle)>,
    close_times: HashSet<i64>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<HashMap<String, MemTable>>,
    fail_writes: AtomicBool,
    fail_connect: AtomicBool,
}

/// Shared, thread-safe in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `connect` fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, MemTable>> {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_table<T>(
        &self,
        table: &TableName,
        f: impl FnOnce(&mut MemTable) -> T,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables();
        let t = tables
            .get_mut(table.as_str())
            .ok_or_else(|| StoreError::MissingTable(table.to_string()))?;
        Ok(f(t))
    }
}

impl CandleStore for MemoryStore {
    fn ensure_table(&mut self, table: &TableName) -> Result<(), StoreError> {
        self.tables()
            .entry(table.as_str().to_string())
            .or_insert_with(|| MemTable {
                next_id: 1,
                ..MemTable::default()
            });
        Ok(())
    }

    fn table_exists(&mut self, table: &TableName) -> Result<bool, StoreError> {
        Ok(self.tables().contains_key(table.as_str()))
    }

    fn count_in_range(&mut self, table: &TableName, start: i64, end: i64) -> Result<i64, StoreError> {
        if end < start {
            return Ok(0);
        }
        self.with_table(table, |t| t.rows.range(start..=end).count() as i64)
    }

    fn open_time_bounds(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
    ) -> Result<Option<(i64, i64)>, StoreError> {
        if end < start {
            return Ok(None);
        }
        self.with_table(table, |t| {
            let mut r = t.rows.range(start..=end);
            let lo = r.next().map(|(k, _)| *k);
            let hi = r.next_back().map(|(k, _)| *k).or(lo);
            lo.zip(hi)
        })
    }

    fn scan_open_times(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        visit: &mut dyn FnMut(i64),
    ) -> Result<(), StoreError> {
        if end < start {
            return Ok(());
        }
        // Copy keys out so `visit` runs without the lock held.
        let keys: Vec<i64> =
            self.with_table(table, |t| t.rows.range(start..=end).map(|(k, _)| *k).collect())?;
        keys.into_iter().for_each(visit);
        Ok(())
    }

    fn insert_ignore(&mut self, table: &TableName, rows: &[Candle]) -> Result<usize, StoreError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        self.with_table(table, |t| {
            let mut written = 0;
            for c in rows {
                if t.rows.contains_key(&c.open_time) || t.close_times.contains(&c.close_time) {
                    continue;
                }
                let id = t.next_id;
                t.next_id += 1;
                t.close_times.insert(c.close_time);
                t.rows.insert(c.open_time, (id, c.clone()));
                written += 1;
            }
            written
        })
    }

    fn read_range(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        order: SortOrder,
    ) -> Result<Vec<Candle>, StoreError> {
        if end < start {
            return Ok(Vec::new());
        }
        self.with_table(table, |t| {
            let it = t.rows.range(start..=end).map(|(_, (_, c))| c.clone());
            match order {
                SortOrder::Ascending => it.collect(),
                SortOrder::Descending => it.rev().collect(),
            }
        })
    }

    fn row_count(&mut self, table: &TableName) -> Result<i64, StoreError> {
        self.with_table(table, |t| t.rows.len() as i64)
    }

    fn latest_id(&mut self, table: &TableName) -> Result<i64, StoreError> {
        self.with_table(table, |t| t.rows.values().map(|(id, _)| *id).max().unwrap_or(0))
    }

    fn written_since(&mut self, table: &TableName, after_id: i64) -> Result<WrittenReport, StoreError> {
        self.with_table(table, |t| {
            let mut report = WrittenReport::default();
            for (open_time, (id, _)) in &t.rows {
                if *id <= after_id {
                    continue;
                }
                report.count += 1;
                report.first_open_time.get_or_insert(*open_time);
                report.last_open_time = Some(*open_time);
            }
            report
        })
    }

    fn mark_reconciled(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        state: ReconcileState,
    ) -> Result<usize, StoreError> {
        if end < start {
            return Ok(0);
        }
        self.with_table(table, |t| {
            let mut n = 0;
            for (_, (_, c)) in t.rows.range_mut(start..=end) {
                c.reconciled = state;
                n += 1;
            }
            n
        })
    }

    fn drop_table(&mut self, table: &TableName) -> Result<bool, StoreError> {
        Ok(self.tables().remove(table.as_str()).is_some())
    }
}

impl StoreConnector for MemoryStore {
    type Store = MemoryStore;

    fn connect(&self) -> Result<MemoryStore, StoreError> {
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connect disabled".into()));
        }
        Ok(self.clone())
    }
}

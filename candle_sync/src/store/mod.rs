//! Candle persistence: one table per (symbol, interval).
//!
//! [`CandleStore`] is the portable surface the engine talks to. The SQLite
//! implementation lives in [`sqlite`], an in-memory one in [`memory`].
//! Both derive their table from a [`TableName`] and honor the same column
//! manifest ([`CANDLE_COLUMNS`]): `open_time` and `close_time` are each
//! `UNIQUE NOT NULL`, and inserts silently skip rows whose keys already exist.

pub mod memory;
pub mod sqlite;

use std::fmt;

use kline_ingestor::models::interval::Interval;

use crate::candle::{Candle, ReconcileState};

pub use memory::MemoryStore;
pub use sqlite::{SqliteConnector, SqliteStore};

/// Errors raised by a [`CandleStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be opened.
    #[error("failed to open store: {0}")]
    Connection(#[from] diesel::ConnectionError),

    /// A statement failed.
    #[error("store query failed: {0}")]
    Query(#[from] diesel::result::Error),

    /// The table has not been created.
    #[error("no such table: {0}")]
    MissingTable(String),

    /// The symbol cannot be turned into a table name.
    #[error("invalid table name for symbol {0:?}: must be non-empty ASCII alphanumeric")]
    InvalidTableName(String),

    /// Backend-specific failure without a richer type.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Validated, deterministic table name: `{SYMBOL}{interval}Hist`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// Build the table name for a symbol and interval.
    ///
    /// The symbol is upper-cased; anything but ASCII letters and digits is rejected,
    /// which also keeps the name safe to splice into SQL.
    pub fn new(symbol: &str, interval: &Interval) -> Result<Self, StoreError> {
        if symbol.is_empty() || !symbol.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(StoreError::InvalidTableName(symbol.to_string()));
        }
        Ok(Self(format!("{}{}Hist", symbol.to_ascii_uppercase(), interval)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-back order for [`CandleStore::read_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first; consumers pop from the end to get the oldest.
    Descending,
}

impl SortOrder {
    pub(crate) const fn sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Rows added to a table after a given identity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WrittenReport {
    /// Number of rows.
    pub count: i64,
    /// Smallest open time among them.
    pub first_open_time: Option<i64>,
    /// Largest open time among them.
    pub last_open_time: Option<i64>,
}

/// One column of the candle table.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub constraints: &'static str,
    /// Whether inserts supply a value (the identity column is generated).
    pub insertable: bool,
}

const fn col(name: &'static str, sql_type: &'static str, constraints: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        sql_type,
        constraints,
        insertable: true,
    }
}

/// Column manifest of every candle table, in storage order.
pub const CANDLE_COLUMNS: &[ColumnDef] = &[
    ColumnDef {
        name: "id",
        sql_type: "INTEGER",
        constraints: "PRIMARY KEY AUTOINCREMENT",
        insertable: false,
    },
    col("open_time", "BIGINT", "NOT NULL UNIQUE"),
    col("open", "DOUBLE", ""),
    col("high", "DOUBLE", ""),
    col("low", "DOUBLE", ""),
    col("close", "DOUBLE", ""),
    col("volume", "DOUBLE", ""),
    col("close_time", "BIGINT", "NOT NULL UNIQUE"),
    col("quote_volume", "DOUBLE", ""),
    col("trade_count", "BIGINT", ""),
    col("taker_buy_base_volume", "DOUBLE", ""),
    col("taker_buy_quote_volume", "DOUBLE", ""),
    col("ignored", "DOUBLE", ""),
    col("loaded_at", "BIGINT", "NOT NULL"),
    col("placeholder", "BOOLEAN", "NOT NULL DEFAULT 0"),
    col("rounded", "BOOLEAN", "NOT NULL DEFAULT 0"),
    col("reconciled", "INTEGER", "NOT NULL DEFAULT 0"),
];

/// `CREATE TABLE IF NOT EXISTS` statement for `table`.
pub fn create_table_sql(table: &TableName) -> String {
    let cols: Vec<String> = CANDLE_COLUMNS
        .iter()
        .map(|c| {
            if c.constraints.is_empty() {
                format!("{} {}", c.name, c.sql_type)
            } else {
                format!("{} {} {}", c.name, c.sql_type, c.constraints)
            }
        })
        .collect();
    format!("CREATE TABLE IF NOT EXISTS \"{table}\" ({})", cols.join(", "))
}

/// Columns an insert must bind, in manifest order.
pub fn insert_columns() -> impl Iterator<Item = &'static str> {
    CANDLE_COLUMNS
        .iter()
        .filter(|c| c.insertable)
        .map(|c| c.name)
}

/// Portable surface over candle tables. Ranges are inclusive open times.
pub trait CandleStore: Send {
    /// Create the table if absent. Never fails because it already exists.
    fn ensure_table(&mut self, table: &TableName) -> Result<(), StoreError>;

    /// Whether the table exists.
    fn table_exists(&mut self, table: &TableName) -> Result<bool, StoreError>;

    /// Rows with `open_time` in `[start, end]`.
    fn count_in_range(&mut self, table: &TableName, start: i64, end: i64) -> Result<i64, StoreError>;

    /// Smallest and largest `open_time` in `[start, end]`, if any row is there.
    fn open_time_bounds(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
    ) -> Result<Option<(i64, i64)>, StoreError>;

    /// Stream every `open_time` in `[start, end]` in ascending order.
    fn scan_open_times(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        visit: &mut dyn FnMut(i64),
    ) -> Result<(), StoreError>;

    /// Insert rows, skipping any whose `open_time` or `close_time` already exists.
    /// Returns the number of rows actually written.
    fn insert_ignore(&mut self, table: &TableName, rows: &[Candle]) -> Result<usize, StoreError>;

    /// Rows with `open_time` in `[start, end]`.
    fn read_range(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        order: SortOrder,
    ) -> Result<Vec<Candle>, StoreError>;

    /// Total rows in the table.
    fn row_count(&mut self, table: &TableName) -> Result<i64, StoreError>;

    /// Largest identity value handed out so far, `0` for an empty table.
    fn latest_id(&mut self, table: &TableName) -> Result<i64, StoreError>;

    /// Summary of rows whose identity is greater than `after_id`.
    fn written_since(&mut self, table: &TableName, after_id: i64) -> Result<WrittenReport, StoreError>;

    /// Set the `reconciled` flag on every row in `[start, end]`. Returns rows touched.
    fn mark_reconciled(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        state: ReconcileState,
    ) -> Result<usize, StoreError>;

    /// Drop the table. Returns whether it existed.
    fn drop_table(&mut self, table: &TableName) -> Result<bool, StoreError>;
}

/// Opens one store session per reconciliation call.
pub trait StoreConnector: Send + Sync {
    type Store: CandleStore;

    fn connect(&self) -> Result<Self::Store, StoreError>;
}

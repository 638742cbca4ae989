//! SQLite-backed [`CandleStore`].
//!
//! Table names are only known at runtime, so statements go through `sql_query`
//! with typed binds rather than the `table!` DSL. Range scans stream rows with
//! `load_iter` instead of materializing the whole range.

use std::collections::HashSet;

use diesel::{
    QueryableByName, RunQueryDsl, SqliteConnection,
    connection::{Connection, DefaultLoadingMode},
    sql_query,
    sql_types::{BigInt, Bool, Double, Integer, Nullable, Text},
};
use tracing::debug;

use crate::{
    candle::{BarData, Candle, ReconcileState},
    db::connection::connect_sqlite,
    store::{
        CandleStore, SortOrder, StoreConnector, StoreError, TableName, WrittenReport,
        create_table_sql, insert_columns,
    },
};

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
}

#[derive(QueryableByName)]
struct BoundsRow {
    #[diesel(sql_type = Nullable<BigInt>)]
    lo: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    hi: Option<i64>,
}

#[derive(QueryableByName)]
struct WrittenRow {
    #[diesel(sql_type = BigInt)]
    n: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    lo: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    hi: Option<i64>,
}

#[derive(QueryableByName)]
struct OpenTimeRow {
    #[diesel(sql_type = BigInt)]
    open_time: i64,
}

#[derive(QueryableByName)]
struct CandleRow {
    #[diesel(sql_type = BigInt)]
    open_time: i64,
    #[diesel(sql_type = Nullable<Double>)]
    open: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    high: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    low: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    close: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    volume: Option<f64>,
    #[diesel(sql_type = BigInt)]
    close_time: i64,
    #[diesel(sql_type = Nullable<Double>)]
    quote_volume: Option<f64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    trade_count: Option<i64>,
    #[diesel(sql_type = Nullable<Double>)]
    taker_buy_base_volume: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    taker_buy_quote_volume: Option<f64>,
    #[diesel(sql_type = Nullable<Double>)]
    ignored: Option<f64>,
    #[diesel(sql_type = BigInt)]
    loaded_at: i64,
    #[diesel(sql_type = Bool)]
    placeholder: bool,
    #[diesel(sql_type = Bool)]
    rounded: bool,
    #[diesel(sql_type = Integer)]
    reconciled: i32,
}

impl CandleRow {
    fn bar(&self) -> Option<BarData> {
        if self.placeholder {
            return None;
        }
        Some(BarData {
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume?,
            quote_volume: self.quote_volume?,
            trade_count: self.trade_count?,
            taker_buy_base_volume: self.taker_buy_base_volume?,
            taker_buy_quote_volume: self.taker_buy_quote_volume?,
            ignored: self.ignored?,
        })
    }
}

impl From<CandleRow> for Candle {
    fn from(row: CandleRow) -> Self {
        Candle {
            bar: row.bar(),
            open_time: row.open_time,
            close_time: row.close_time,
            loaded_at: row.loaded_at,
            rounded: row.rounded,
            reconciled: ReconcileState::from_code(row.reconciled),
        }
    }
}

/// Candle store over one SQLite connection.
pub struct SqliteStore {
    conn: SqliteConnection,
    ensured: HashSet<String>,
}

impl SqliteStore {
    /// Open `database_url` with the standard PRAGMAs applied.
    pub fn open(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::from_connection(connect_sqlite(database_url)?))
    }

    /// Wrap an already configured connection.
    pub fn from_connection(conn: SqliteConnection) -> Self {
        Self {
            conn,
            ensured: HashSet::new(),
        }
    }

    fn insert_sql(table: &TableName) -> String {
        let cols: Vec<&str> = insert_columns().collect();
        let marks = vec!["?"; cols.len()].join(", ");
        format!(
            "INSERT OR IGNORE INTO \"{table}\" ({}) VALUES ({marks})",
            cols.join(", ")
        )
    }
}

impl CandleStore for SqliteStore {
    fn ensure_table(&mut self, table: &TableName) -> Result<(), StoreError> {
        if self.ensured.contains(table.as_str()) {
            return Ok(());
        }
        sql_query(create_table_sql(table)).execute(&mut self.conn)?;
        debug!(%table, "candle table ensured");
        self.ensured.insert(table.as_str().to_string());
        Ok(())
    }

    fn table_exists(&mut self, table: &TableName) -> Result<bool, StoreError> {
        let row: CountRow =
            sql_query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind::<Text, _>(table.as_str())
                .get_result(&mut self.conn)?;
        Ok(row.n > 0)
    }

    fn count_in_range(&mut self, table: &TableName, start: i64, end: i64) -> Result<i64, StoreError> {
        let row: CountRow = sql_query(format!(
            "SELECT COUNT(*) AS n FROM \"{table}\" WHERE open_time BETWEEN ? AND ?"
        ))
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(end)
        .get_result(&mut self.conn)?;
        Ok(row.n)
    }

    fn open_time_bounds(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
    ) -> Result<Option<(i64, i64)>, StoreError> {
        let row: BoundsRow = sql_query(format!(
            "SELECT MIN(open_time) AS lo, MAX(open_time) AS hi FROM \"{table}\" \
             WHERE open_time BETWEEN ? AND ?"
        ))
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(end)
        .get_result(&mut self.conn)?;
        Ok(row.lo.zip(row.hi))
    }

    fn scan_open_times(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        visit: &mut dyn FnMut(i64),
    ) -> Result<(), StoreError> {
        let rows = sql_query(format!(
            "SELECT open_time FROM \"{table}\" WHERE open_time BETWEEN ? AND ? \
             ORDER BY open_time ASC"
        ))
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(end)
        .load_iter::<OpenTimeRow, DefaultLoadingMode>(&mut self.conn)?;

        for row in rows {
            visit(row?.open_time);
        }
        Ok(())
    }

    fn insert_ignore(&mut self, table: &TableName, rows: &[Candle]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = Self::insert_sql(table);

        let written = self.conn.transaction::<usize, diesel::result::Error, _>(|conn| {
            let mut n = 0;
            for c in rows {
                let bar = c.bar.as_ref();
                n += sql_query(sql.as_str())
                    .bind::<BigInt, _>(c.open_time)
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.open))
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.high))
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.low))
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.close))
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.volume))
                    .bind::<BigInt, _>(c.close_time)
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.quote_volume))
                    .bind::<Nullable<BigInt>, _>(bar.map(|b| b.trade_count))
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.taker_buy_base_volume))
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.taker_buy_quote_volume))
                    .bind::<Nullable<Double>, _>(bar.map(|b| b.ignored))
                    .bind::<BigInt, _>(c.loaded_at)
                    .bind::<Bool, _>(c.is_placeholder())
                    .bind::<Bool, _>(c.rounded)
                    .bind::<Integer, _>(c.reconciled.code())
                    .execute(conn)?;
            }
            Ok(n)
        })?;
        Ok(written)
    }

    fn read_range(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        order: SortOrder,
    ) -> Result<Vec<Candle>, StoreError> {
        let cols: Vec<&str> = insert_columns().collect();
        let rows: Vec<CandleRow> = sql_query(format!(
            "SELECT {} FROM \"{table}\" WHERE open_time BETWEEN ? AND ? ORDER BY open_time {}",
            cols.join(", "),
            order.sql()
        ))
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(end)
        .load(&mut self.conn)?;
        Ok(rows.into_iter().map(Candle::from).collect())
    }

    fn row_count(&mut self, table: &TableName) -> Result<i64, StoreError> {
        let row: CountRow = sql_query(format!("SELECT COUNT(*) AS n FROM \"{table}\""))
            .get_result(&mut self.conn)?;
        Ok(row.n)
    }

    fn latest_id(&mut self, table: &TableName) -> Result<i64, StoreError> {
        let row: CountRow = sql_query(format!("SELECT COALESCE(MAX(id), 0) AS n FROM \"{table}\""))
            .get_result(&mut self.conn)?;
        Ok(row.n)
    }

    fn written_since(&mut self, table: &TableName, after_id: i64) -> Result<WrittenReport, StoreError> {
        let row: WrittenRow = sql_query(format!(
            "SELECT COUNT(*) AS n, MIN(open_time) AS lo, MAX(open_time) AS hi \
             FROM \"{table}\" WHERE id > ?"
        ))
        .bind::<BigInt, _>(after_id)
        .get_result(&mut self.conn)?;
        Ok(WrittenReport {
            count: row.n,
            first_open_time: row.lo,
            last_open_time: row.hi,
        })
    }

    fn mark_reconciled(
        &mut self,
        table: &TableName,
        start: i64,
        end: i64,
        state: ReconcileState,
    ) -> Result<usize, StoreError> {
        let n = sql_query(format!(
            "UPDATE \"{table}\" SET reconciled = ? WHERE open_time BETWEEN ? AND ?"
        ))
        .bind::<Integer, _>(state.code())
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(end)
        .execute(&mut self.conn)?;
        Ok(n)
    }

    fn drop_table(&mut self, table: &TableName) -> Result<bool, StoreError> {
        let existed = self.table_exists(table)?;
        sql_query(format!("DROP TABLE IF EXISTS \"{table}\"")).execute(&mut self.conn)?;
        self.ensured.remove(table.as_str());
        Ok(existed)
    }
}

/// Opens a fresh [`SqliteStore`] per session.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    database_url: String,
}

impl SqliteConnector {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    fn connect(&self) -> Result<SqliteStore, StoreError> {
        SqliteStore::open(&self.database_url)
    }
}

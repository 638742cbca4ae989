//! Database utilities.
//!
//! - SQLite connection helpers: [`connection::connect_sqlite`] applies WAL and a 5000ms
//!   busy_timeout.
//!
//! Candle tables are created at runtime per (symbol, interval), so there is no migration
//! set; see [`crate::store::create_table_sql`].

pub mod connection;

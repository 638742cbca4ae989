//! Candle ingestion and reconciliation engine.
//!
//! Keeps a local store of fixed-interval candles gap-free against an upstream
//! kline provider: detect missing slots, fetch them in bounded windows, align
//! the rows to the interval grid, fill what the upstream lacks with
//! placeholders, and insert without duplicates.

pub mod candle;
pub mod config;
pub mod db;
pub mod errors;
pub mod gaps;
pub mod grid;
pub mod normalize;
pub mod partition;
pub mod providers;
pub mod reconcile;
pub mod schedule;
pub mod store;
pub mod tz;

pub use errors::{ConfigError, SyncError};
pub use reconcile::{ReconcileRequest, Reconciler, SeriesHandle};

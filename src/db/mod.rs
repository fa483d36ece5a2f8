//! Database layer for catalog-harvest
//!
//! Handles SQLite persistence for the current catalog state and the append-only
//! price history.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`products`]: Transactional batch writes and read helpers

use crate::Result;
use crate::types::Record;
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod products;

/// One row of the append-only price history
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct HistoryRow {
    /// Unique database ID (insertion order)
    pub id: i64,
    /// Business key of the product
    pub code: String,
    /// List price at the time of the flush
    pub price: f64,
    /// "Was" price at the time of the flush
    pub was_price: f64,
    /// Offer price at the time of the flush
    pub offer_price: f64,
    /// Unix timestamp of the flush
    pub recorded_at: i64,
}

/// Destination for committed batches
///
/// The aggregator is the only caller, so implementations need no internal locking
/// for ordering. A batch is all-or-nothing: both the current-state upserts and the
/// history rows commit together or not at all.
#[async_trait::async_trait]
pub trait CatalogSink: Send + Sync {
    /// Atomically upsert `batch` into current state and append its history rows
    ///
    /// An empty batch is a no-op.
    async fn persist(&self, batch: &[Record]) -> Result<()>;
}

#[async_trait::async_trait]
impl CatalogSink for Database {
    async fn persist(&self, batch: &[Record]) -> Result<()> {
        self.persist_batch(batch).await
    }
}

/// Database handle for catalog-harvest
pub struct Database {
    pool: SqlitePool,
}

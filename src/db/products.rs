//! Current-state upserts, history appends and read helpers.

use crate::error::DatabaseError;
use crate::types::Record;
use crate::{Error, Result};

use super::{Database, HistoryRow};

// SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999.
// A product row binds 14 variables, so max 71 rows per upsert statement.
const MAX_PRODUCTS_PER_STATEMENT: usize = 71;
// A history row binds 5 variables, so max 199 rows per insert statement.
const MAX_HISTORY_PER_STATEMENT: usize = 199;

const PRODUCT_COLUMNS: &str = "code, name, brand_name, brand_type, color_group, segment, \
     vertical, brick, image_url, price, was_price, offer_price, url";

impl Database {
    /// Upsert a batch into `products` and append it to `product_history` in one transaction
    ///
    /// Every non-key column is overwritten on conflict. Within a batch, a code that
    /// appears twice ends with the values of its last occurrence. Any failure rolls the
    /// whole batch back.
    pub async fn persist_batch(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let failed = |e: sqlx::Error| {
            Error::Database(DatabaseError::TransactionFailed {
                size: records.len(),
                reason: e.to_string(),
            })
        };

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(failed)?;

        for chunk in records.chunks(MAX_PRODUCTS_PER_STATEMENT) {
            let mut query_builder = sqlx::QueryBuilder::new(format!(
                "INSERT INTO products ({PRODUCT_COLUMNS}, updated_at) "
            ));

            query_builder.push_values(chunk, |mut b, record| {
                b.push_bind(&record.code)
                    .push_bind(&record.name)
                    .push_bind(&record.brand_name)
                    .push_bind(&record.brand_type)
                    .push_bind(&record.color_group)
                    .push_bind(&record.segment)
                    .push_bind(&record.vertical)
                    .push_bind(&record.brick)
                    .push_bind(&record.image_url)
                    .push_bind(record.price)
                    .push_bind(record.was_price)
                    .push_bind(record.offer_price)
                    .push_bind(&record.url)
                    .push_bind(now);
            });

            query_builder.push(
                " ON CONFLICT(code) DO UPDATE SET \
                 name = excluded.name, \
                 brand_name = excluded.brand_name, \
                 brand_type = excluded.brand_type, \
                 color_group = excluded.color_group, \
                 segment = excluded.segment, \
                 vertical = excluded.vertical, \
                 brick = excluded.brick, \
                 image_url = excluded.image_url, \
                 price = excluded.price, \
                 was_price = excluded.was_price, \
                 offer_price = excluded.offer_price, \
                 url = excluded.url, \
                 updated_at = excluded.updated_at",
            );

            query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
        }

        for chunk in records.chunks(MAX_HISTORY_PER_STATEMENT) {
            let mut query_builder = sqlx::QueryBuilder::new(
                "INSERT INTO product_history (code, price, was_price, offer_price, recorded_at) ",
            );

            query_builder.push_values(chunk, |mut b, record| {
                b.push_bind(&record.code)
                    .push_bind(record.price)
                    .push_bind(record.was_price)
                    .push_bind(record.offer_price)
                    .push_bind(now);
            });

            query_builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
        }

        tx.commit().await.map_err(failed)?;

        tracing::debug!(batch_size = records.len(), "batch committed");
        Ok(())
    }

    /// Get the current state of one product
    pub async fn get_product(&self, code: &str) -> Result<Option<Record>> {
        let record = sqlx::query_as::<_, Record>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE code = ?"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get product: {}",
                e
            )))
        })?;

        Ok(record)
    }

    /// Count rows in the current-state table
    pub async fn count_products(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count products: {}",
                    e
                )))
            })?;

        Ok(count)
    }

    /// Count history rows, optionally for a single product
    pub async fn count_history(&self, code: Option<&str>) -> Result<i64> {
        let count: i64 = match code {
            Some(code) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM product_history WHERE code = ?")
                    .bind(code)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM product_history")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count history: {}",
                e
            )))
        })?;

        Ok(count)
    }

    /// Price trail for one product, oldest first
    pub async fn price_history(&self, code: &str) -> Result<Vec<HistoryRow>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, code, price, was_price, offer_price, recorded_at
            FROM product_history
            WHERE code = ?
            ORDER BY id ASC
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query price history: {}",
                e
            )))
        })?;

        Ok(rows)
    }
}

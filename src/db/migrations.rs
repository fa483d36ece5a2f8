//! Database lifecycle and schema migrations.
//!
//! Migrations are an ordered list of statement groups. Each group is applied in
//! its own transaction together with its `schema_version` row, so a failing
//! statement leaves the schema at the previous version.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;

use super::Database;

/// One schema step
pub(super) struct Migration {
    pub(super) version: i64,
    pub(super) description: &'static str,
    pub(super) statements: &'static [&'static str],
}

pub(super) const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "products and product_history",
    statements: &[
        // Current state, one row per product code
        r#"
        CREATE TABLE products (
            code TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            brand_name TEXT NOT NULL DEFAULT '',
            brand_type TEXT NOT NULL DEFAULT '',
            color_group TEXT NOT NULL DEFAULT '',
            segment TEXT NOT NULL DEFAULT '',
            vertical TEXT NOT NULL DEFAULT '',
            brick TEXT NOT NULL DEFAULT '',
            image_url TEXT NOT NULL DEFAULT '',
            price REAL NOT NULL DEFAULT 0,
            was_price REAL NOT NULL DEFAULT 0,
            offer_price REAL NOT NULL DEFAULT 0,
            url TEXT NOT NULL DEFAULT '',
            updated_at INTEGER NOT NULL
        )
        "#,
        // Append-only; the same code appears once per observation
        r#"
        CREATE TABLE product_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code TEXT NOT NULL,
            price REAL NOT NULL,
            was_price REAL NOT NULL,
            offer_price REAL NOT NULL,
            recorded_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX idx_product_history_code ON product_history(code, recorded_at)",
    ],
}];

fn connection_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

impl Database {
    /// Open (or create) the SQLite file at `path` and bring its schema up to date
    ///
    /// Missing parent directories are created. The connection uses WAL journaling.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| connection_failed("cannot create database directory", e))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| connection_failed("cannot open database", e))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::MigrationFailed(format!("schema_version table: {e}")))?;

        let current = self.schema_version().await?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            self.apply_migration(migration).await?;
        }
        Ok(())
    }

    /// Apply every statement of `migration` and record it, atomically
    pub(super) async fn apply_migration(&self, migration: &Migration) -> Result<()> {
        let version = migration.version;
        let failed = move |e: sqlx::Error| {
            Error::Database(DatabaseError::MigrationFailed(format!("v{version}: {e}")))
        };

        tracing::info!(version, description = migration.description, "applying migration");

        let mut tx = self.pool.begin().await.map_err(failed)?;
        for statement in migration.statements {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
        }
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(failed)?;
        // Dropping `tx` on an early return rolls the whole step back
        tx.commit().await.map_err(failed)?;

        Ok(())
    }

    /// Current schema version (0 for a database that was never migrated)
    pub async fn schema_version(&self) -> Result<i64> {
        let version = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryFailed(format!("schema version: {e}")))?;
        Ok(version.unwrap_or(0))
    }

    /// Close every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

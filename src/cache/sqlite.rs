use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::{prune_cutoff, CacheError, CacheRecord, CacheStore};

// ============================================================================
// SQLite Cache
// ============================================================================

/// Cache backed by a single SQLite file.
///
/// Timestamps are stored as unix milliseconds. Cloning shares the pool.
#[derive(Clone)]
pub struct SqliteCache {
    pub(crate) pool: SqlitePool,
}

impl SqliteCache {
    /// Open (creating if needed) the cache file and run migrations.
    ///
    /// `":memory:"` gives a private in-memory store.
    pub async fn open(path: &str) -> Result<Self, CacheError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: concurrent writers from parallel fetches wait for the
        // lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)?.pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let cache = Self { pool };
        cache
            .migrate()
            .await
            .map_err(|e| CacheError::Migration(e.to_string()))?;
        Ok(cache)
    }

    /// Create the schema atomically. Idempotent.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                fetched_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // prune() scans by age
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_feed_cache_fetched ON feed_cache(fetched_at)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn from_millis(key: &str, millis: i64) -> Result<DateTime<Utc>, CacheError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| CacheError::InvalidTimestamp(format!("{key}: {millis}")))
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, CacheError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT value, fetched_at FROM feed_cache WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(value, fetched_at)| {
            Ok(CacheRecord {
                key: key.to_string(),
                value,
                fetched_at: from_millis(key, fetched_at)?,
            })
        })
        .transpose()
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO feed_cache (key, value, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                fetched_at = excluded.fetched_at
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(fetched_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn prune(&self, older_than: Duration) -> Result<u64, CacheError> {
        let cutoff = prune_cutoff(older_than)?;
        let result = sqlx::query("DELETE FROM feed_cache WHERE fetched_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

//! On-disk keyed cache backed by SQLite.
//!
//! Holds data that never changes once written: terminal submission records
//! and their cost summaries. Entries expire after a configurable age and
//! are ignored (and later pruned) past that point.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;

/// Composite cache key: a kind plus the identifiers that scope it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: &'static str,
    key: String,
}

impl CacheKey {
    pub fn new<I, S>(kind: &'static str, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = parts
            .into_iter()
            .map(|p| p.as_ref().replace('/', "_"))
            .collect::<Vec<_>>()
            .join(".");
        Self { kind, key }
    }

    pub fn submission(bucket: &str, submission_id: &str) -> Self {
        Self::new("submission-json", [bucket, submission_id])
    }

    pub fn cost(bucket: &str, submission_id: &str) -> Self {
        Self::new("submission-cost", [bucket, submission_id])
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.key)
    }
}

/// Disk cache handle. Owns the SQLite pool.
pub struct DiskCache {
    pool: SqlitePool,
    ttl: Duration,
}

impl DiskCache {
    /// Open or create the cache database at `path`.
    pub async fn open(path: &Path, ttl_days: i64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Self::with_pool(pool, ttl_days).await
    }

    /// In-memory cache (for testing). Single connection so every query
    /// sees the same database.
    pub async fn in_memory(ttl_days: i64) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool, ttl_days).await
    }

    async fn with_pool(pool: SqlitePool, ttl_days: i64) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            ttl: Duration::days(ttl_days),
        })
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let cutoff = (Utc::now() - self.ttl).timestamp_millis();
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM cache_entries WHERE kind = ?1 AND key = ?2 AND updated_at > ?3",
        )
        .bind(key.kind)
        .bind(&key.key)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            debug!(key = %key, "disk cache hit");
        }
        Ok(row.map(|(value,)| value))
    }

    pub async fn put(&self, key: &CacheKey, value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO cache_entries (kind, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (kind, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key.kind)
        .bind(&key.key)
        .bind(value)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        debug!(key = %key, size = value.len(), "disk cache write");
        Ok(())
    }

    /// Typed read. A stored value that no longer parses is treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let Some(bytes) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding unreadable cache entry");
                Ok(None)
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes).await
    }

    /// Delete expired entries. Returns how many were removed.
    pub async fn prune(&self) -> Result<u64> {
        let cutoff = (Utc::now() - self.ttl).timestamp_millis();
        let result = sqlx::query("DELETE FROM cache_entries WHERE updated_at <= ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every entry.
    pub async fn purge(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

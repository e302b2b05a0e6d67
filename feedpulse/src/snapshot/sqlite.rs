use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, info};

use super::{clamp_ttl, CacheError, SnapshotCache};
use crate::entry::Entry;

/// Snapshot cache persisted in SQLite, so animation history survives a restart.
///
/// Entries are stored as a JSON array; `expires_at` is in unix seconds.
#[derive(Clone)]
pub struct SqliteSnapshotCache {
    pool: SqlitePool,
}

impl SqliteSnapshotCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `feed_snapshots` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_snapshots (
                cache_key TEXT PRIMARY KEY NOT NULL,
                payload TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("snapshot cache schema ready");
        Ok(())
    }
}

#[async_trait]
impl SnapshotCache for SqliteSnapshotCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<Entry>>, CacheError> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM feed_snapshots WHERE cache_key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entries: &[Entry], ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(entries)?;
        let ttl_secs = i64::try_from(clamp_ttl(ttl).as_secs()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl_secs);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO feed_snapshots (cache_key, payload, expires_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(&payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        debug!(key, entries = entries.len(), expires_at, "snapshot stored");
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM feed_snapshots WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::entry::Entry;

pub mod memory;
pub mod sqlite;

pub use memory::MemorySnapshotCache;
pub use sqlite::SqliteSnapshotCache;

/// Longest lifetime a backend will store a snapshot for
pub const MAX_SNAPSHOT_TTL: Duration = Duration::from_secs(common::MAX_CACHE_TTL_SECONDS);

/// Bound a requested TTL so expiry arithmetic cannot overflow.
pub fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.min(MAX_SNAPSHOT_TTL)
}

/// Failure of the snapshot cache backend.
///
/// Callers treat every variant as "no snapshot available"; none of them is
/// fatal to a refresh.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("snapshot cache backend unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("cached snapshot could not be decoded: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Key-value store holding the last entries shown to one viewer session.
///
/// A missing key and an expired key are the same thing: `Ok(None)`.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<Entry>>, CacheError>;

    /// Store `entries` under `key`, replacing any previous value and restarting its TTL.
    async fn set(&self, key: &str, entries: &[Entry], ttl: Duration) -> Result<(), CacheError>;

    /// Drop expired snapshots. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

/// Cache key of the snapshot for one widget instance seen by one session.
///
/// Neither part is escaped: an instance id containing `:` can in principle
/// collide with another instance/session pair.
pub fn cache_key(instance_id: &str, session_id: &str) -> String {
    format!("RSSFeedWidget:{}:{}", instance_id, session_id)
}

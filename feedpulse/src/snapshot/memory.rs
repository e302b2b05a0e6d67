use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{clamp_ttl, CacheError, SnapshotCache};
use crate::entry::Entry;

/// Upper bound on stored snapshots, one per (widget instance, session) pair
pub const DEFAULT_MAX_SNAPSHOTS: u64 = 10_000;

#[derive(Clone)]
struct Snapshot {
    entries: Arc<Vec<Entry>>,
    ttl: Duration,
}

/// Expires each snapshot after the TTL it was stored with. An overwrite
/// starts a new TTL; reads leave it alone.
struct SnapshotExpiry;

impl Expiry<String, Snapshot> for SnapshotExpiry {
    fn expire_after_create(&self, _key: &String, value: &Snapshot, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Snapshot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local snapshot cache backed by moka. Expired snapshots are never
/// returned; moka evicts them during its housekeeping.
pub struct MemorySnapshotCache {
    cache: Cache<String, Snapshot>,
    expired: Arc<AtomicU64>,
}

impl Default for MemorySnapshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SNAPSHOTS)
    }
}

impl MemorySnapshotCache {
    pub fn new(max_snapshots: u64) -> Self {
        let expired = Arc::new(AtomicU64::new(0));
        let counter = expired.clone();
        let cache = Cache::builder()
            .max_capacity(max_snapshots)
            .expire_after(SnapshotExpiry)
            .eviction_listener(move |_key, _value, cause| {
                if matches!(cause, RemovalCause::Expired) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
            .build();

        Self { cache, expired }
    }

    /// Number of live snapshots, after pending housekeeping has run.
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SnapshotCache for MemorySnapshotCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<Entry>>, CacheError> {
        Ok(self.cache.get(key).await.map(|s| s.entries.as_ref().clone()))
    }

    async fn set(&self, key: &str, entries: &[Entry], ttl: Duration) -> Result<(), CacheError> {
        let snapshot = Snapshot {
            entries: Arc::new(entries.to_vec()),
            ttl: clamp_ttl(ttl),
        };
        self.cache.insert(key.to_string(), snapshot).await;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let before = self.expired.load(Ordering::Relaxed);
        self.cache.run_pending_tasks().await;
        let removed = self.expired.load(Ordering::Relaxed) - before;
        debug!(removed, "memory snapshot cache purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MAX_SNAPSHOT_TTL;

    fn entries() -> Vec<Entry> {
        vec![Entry::new("A", "p1"), Entry::new("B", "p2")]
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let cache = MemorySnapshotCache::default();
        assert!(cache.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_returns_entries_in_order() {
        let cache = MemorySnapshotCache::default();
        cache.set("k", &entries(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(entries()));
    }

    #[tokio::test]
    async fn set_overwrites_previous_snapshot() {
        let cache = MemorySnapshotCache::default();
        cache.set("k", &entries(), Duration::from_secs(60)).await.unwrap();
        cache.set("k", &[], Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(vec![]));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn expired_key_reads_as_none() {
        let cache = MemorySnapshotCache::default();
        cache.set("k", &entries(), Duration::ZERO).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_restarts_the_ttl() {
        let cache = MemorySnapshotCache::default();
        let ttl = Duration::from_millis(600);

        cache.set("k", &entries(), ttl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        cache.set("k", &entries(), ttl).await.unwrap();

        // past the first deadline, before the second
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(entries()));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn huge_ttl_does_not_panic() {
        let cache = MemorySnapshotCache::default();
        cache.set("k", &entries(), Duration::MAX).await.unwrap();
        cache.set("k", &entries(), Duration::from_secs(u64::MAX)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(entries()));
        assert_eq!(clamp_ttl(Duration::MAX), MAX_SNAPSHOT_TTL);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_snapshots() {
        let cache = MemorySnapshotCache::default();
        cache.set("old", &entries(), Duration::from_millis(100)).await.unwrap();
        cache.set("live", &entries(), Duration::from_secs(60)).await.unwrap();

        // expiry timers are coarse, wait past a full tick
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("live").await.unwrap().is_some());
    }
}

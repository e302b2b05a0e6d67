use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::entry::RenderEntry;
use crate::ingestion::{FeedError, FeedSource};
use crate::reconcile::reconcile;
use crate::snapshot::{cache_key, SnapshotCache};

/// Result of a successful refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Refreshed {
    pub feed_title: String,
    pub entries: Vec<RenderEntry>,
}

/// Runs one refresh cycle for a (widget instance, viewer session) pair.
///
/// Holds no lock while fetching; concurrent refreshes of the same key may
/// overwrite each other's snapshot, which only costs an animation flag.
pub struct Refresher {
    source: Arc<dyn FeedSource>,
    cache: Arc<dyn SnapshotCache>,
    ttl: Duration,
}

impl Refresher {
    pub fn new(source: Arc<dyn FeedSource>, cache: Arc<dyn SnapshotCache>, ttl: Duration) -> Self {
        Self { source, cache, ttl }
    }

    /// Fetch `feed_url`, merge it with the session's snapshot and store the new one.
    ///
    /// A fetch or parse failure is returned before the cache is touched, so
    /// the previous snapshot and its expiry stay as they were. Cache failures
    /// are logged and otherwise ignored.
    pub async fn refresh(
        &self,
        instance_id: &str,
        session_id: &str,
        feed_url: &str,
        max_count: usize,
    ) -> Result<Refreshed, FeedError> {
        let feed = self.source.fetch(feed_url).await?;

        let key = cache_key(instance_id, session_id);
        let previous = match self.cache.get(&key).await {
            Ok(Some(entries)) => entries,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(%e, key = %key, "snapshot cache read failed, animating from scratch");
                Vec::new()
            }
        };

        let merged = reconcile(&previous, &feed.entries, max_count);

        if let Err(e) = self.cache.set(&key, &merged.to_cache, self.ttl).await {
            warn!(%e, key = %key, "snapshot cache write failed");
        }

        debug!(
            instance_id,
            previous = previous.len(),
            fetched = feed.entries.len(),
            rendered = merged.to_render.len(),
            "feed reconciled"
        );

        Ok(Refreshed {
            feed_title: feed.title,
            entries: merged.to_render,
        })
    }
}

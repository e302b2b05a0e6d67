use async_trait::async_trait;
use common::{WidgetSettings, DEFAULT_FEEDS};
use feedpulse::entry::{Entry, ParsedFeed, RenderEntry};
use feedpulse::ingestion::{FeedError, FeedSource};
use feedpulse::refresh::Refresher;
use feedpulse::snapshot::{cache_key, CacheError, MemorySnapshotCache, SnapshotCache};
use feedpulse::widget::{DashboardWidget, RssFeedWidget, WidgetRegistry};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(3600);

/// Feed source answering with a fixed script, one response per fetch.
struct ScriptedSource {
    responses: Mutex<VecDeque<Result<ParsedFeed, FeedError>>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn new(responses: Vec<Result<ParsedFeed, FeedError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requested: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FeedError> {
        self.requested.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted response left")
    }
}

/// Cache whose backend is always down.
struct BrokenCache;

#[async_trait]
impl SnapshotCache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<Entry>>, CacheError> {
        Err(CacheError::Unavailable(sqlx::Error::PoolClosed))
    }

    async fn set(&self, _key: &str, _entries: &[Entry], _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable(sqlx::Error::PoolClosed))
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        Err(CacheError::Unavailable(sqlx::Error::PoolClosed))
    }
}

fn entry(title: &str) -> Entry {
    Entry::new(title, format!("Mon, 1 Jan 2024 10:00:00 +0000 {}", title))
        .with_field("link", format!("https://example.com/{}", title))
}

fn feed(titles: &[&str]) -> ParsedFeed {
    ParsedFeed {
        title: "Sample".to_string(),
        entries: titles.iter().map(|t| entry(t)).collect(),
    }
}

fn summary(entries: &[RenderEntry]) -> Vec<(String, bool, bool)> {
    entries
        .iter()
        .map(|e| (e.entry.title.clone(), e.is_new, e.to_remove))
        .collect()
}

fn row(title: &str, is_new: bool, to_remove: bool) -> (String, bool, bool) {
    (title.to_string(), is_new, to_remove)
}

#[tokio::test]
async fn cold_start_then_incremental_refresh() {
    let source = ScriptedSource::new(vec![Ok(feed(&["A", "B", "C"])), Ok(feed(&["D", "A", "B"]))]);
    let cache = Arc::new(MemorySnapshotCache::default());
    let refresher = Refresher::new(source.clone(), cache.clone(), TTL);

    let first = refresher.refresh("w1", "s1", "https://example.com/rss", 2).await.unwrap();
    assert_eq!(summary(&first.entries), vec![row("A", true, false), row("B", true, false)]);
    assert_eq!(
        cache.get(&cache_key("w1", "s1")).await.unwrap(),
        Some(vec![entry("A"), entry("B")])
    );

    let second = refresher.refresh("w1", "s1", "https://example.com/rss", 2).await.unwrap();
    assert_eq!(
        summary(&second.entries),
        vec![row("D", true, false), row("A", false, false), row("B", false, true)]
    );
    assert_eq!(second.feed_title, "Sample");
    assert_eq!(
        cache.get(&cache_key("w1", "s1")).await.unwrap(),
        Some(vec![entry("D"), entry("A")])
    );
    assert_eq!(source.requested.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn failed_fetch_keeps_previous_snapshot() {
    let source = ScriptedSource::new(vec![
        Ok(feed(&["A", "B"])),
        Err(FeedError::fetch("https://example.com/rss", "connection refused")),
        Err(FeedError::parse("https://example.com/rss", "not a feed")),
        Ok(feed(&["C"])),
    ]);
    let cache = Arc::new(MemorySnapshotCache::default());
    let refresher = Refresher::new(source, cache.clone(), TTL);
    let key = cache_key("w1", "s1");

    refresher.refresh("w1", "s1", "https://example.com/rss", 10).await.unwrap();

    let err = refresher.refresh("w1", "s1", "https://example.com/rss", 10).await.unwrap_err();
    assert!(matches!(err, FeedError::Fetch { .. }));
    let err = refresher.refresh("w1", "s1", "https://example.com/rss", 10).await.unwrap_err();
    assert!(matches!(err, FeedError::Parse { .. }));
    assert_eq!(cache.get(&key).await.unwrap(), Some(vec![entry("A"), entry("B")]));

    // history survived the outage, so the old entries animate out
    let after = refresher.refresh("w1", "s1", "https://example.com/rss", 10).await.unwrap();
    assert_eq!(
        summary(&after.entries),
        vec![row("C", true, false), row("A", false, true), row("B", false, true)]
    );
}

#[tokio::test]
async fn unavailable_cache_degrades_to_cold_start() {
    let source = ScriptedSource::new(vec![Ok(feed(&["A", "B"])), Ok(feed(&["A", "B"]))]);
    let refresher = Refresher::new(source, Arc::new(BrokenCache), TTL);

    for _ in 0..2 {
        let out = refresher.refresh("w1", "s1", "https://example.com/rss", 10).await.unwrap();
        assert_eq!(summary(&out.entries), vec![row("A", true, false), row("B", true, false)]);
    }
}

#[tokio::test]
async fn expired_snapshot_behaves_like_cold_start() {
    let source = ScriptedSource::new(vec![Ok(feed(&["A"])), Ok(feed(&["A"]))]);
    let cache = Arc::new(MemorySnapshotCache::default());
    let refresher = Refresher::new(source, cache, Duration::ZERO);

    refresher.refresh("w1", "s1", "https://example.com/rss", 10).await.unwrap();
    let out = refresher.refresh("w1", "s1", "https://example.com/rss", 10).await.unwrap();
    assert_eq!(summary(&out.entries), vec![row("A", true, false)]);
}

#[tokio::test]
async fn identical_refresh_restarts_the_snapshot_ttl() {
    let source = ScriptedSource::new(vec![Ok(feed(&["A"])), Ok(feed(&["A"])), Ok(feed(&["A"]))]);
    let cache = Arc::new(MemorySnapshotCache::default());
    let refresher = Refresher::new(source, cache.clone(), Duration::from_millis(600));
    let key = cache_key("w1", "s1");

    refresher.refresh("w1", "s1", "u", 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    refresher.refresh("w1", "s1", "u", 10).await.unwrap();

    // the first deadline has passed, the second has not
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(cache.get(&key).await.unwrap(), Some(vec![entry("A")]));

    let out = refresher.refresh("w1", "s1", "u", 10).await.unwrap();
    assert_eq!(summary(&out.entries), vec![row("A", false, false)]);
}

#[tokio::test]
async fn failed_fetch_does_not_extend_the_snapshot_ttl() {
    let source = ScriptedSource::new(vec![
        Ok(feed(&["A"])),
        Err(FeedError::fetch("u", "connection reset")),
        Ok(feed(&["A"])),
    ]);
    let cache = Arc::new(MemorySnapshotCache::default());
    let refresher = Refresher::new(source, cache.clone(), Duration::from_millis(600));
    let key = cache_key("w1", "s1");

    refresher.refresh("w1", "s1", "u", 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(refresher.refresh("w1", "s1", "u", 10).await.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(cache.get(&key).await.unwrap().is_none());

    let out = refresher.refresh("w1", "s1", "u", 10).await.unwrap();
    assert_eq!(summary(&out.entries), vec![row("A", true, false)]);
}

#[tokio::test]
async fn sessions_and_instances_have_separate_history() {
    let source = ScriptedSource::new(vec![
        Ok(feed(&["A"])),
        Ok(feed(&["A"])),
        Ok(feed(&["A"])),
        Ok(feed(&["A"])),
    ]);
    let cache = Arc::new(MemorySnapshotCache::default());
    let refresher = Refresher::new(source, cache.clone(), TTL);

    refresher.refresh("w1", "s1", "u", 10).await.unwrap();
    let other_session = refresher.refresh("w1", "s2", "u", 10).await.unwrap();
    let other_instance = refresher.refresh("w2", "s1", "u", 10).await.unwrap();
    let same = refresher.refresh("w1", "s1", "u", 10).await.unwrap();

    assert!(other_session.entries[0].is_new);
    assert!(other_instance.entries[0].is_new);
    assert!(!same.entries[0].is_new);
    assert_eq!(cache.len().await, 3);
}

#[tokio::test]
async fn widget_renders_title_and_entries() {
    let source = ScriptedSource::new(vec![Ok(feed(&["A", "B", "C"]))]);
    let refresher = Refresher::new(source.clone(), Arc::new(MemorySnapshotCache::default()), TTL);
    let widget = RssFeedWidget::new(refresher);

    let settings = WidgetSettings {
        feed_url: Some("custom".to_string()),
        custom_url: Some("https://example.com/custom.xml".to_string()),
        refresh_interval: Some(5),
        entry_count: Some(2),
    };
    let data = widget.render("w1", &settings, "s1").await;

    assert_eq!(data.title, "RSS feed: Sample");
    assert_eq!(data.feed_title.as_deref(), Some("Sample"));
    assert_eq!(data.feed_url, "https://example.com/custom.xml");
    assert_eq!(data.refresh_interval, 5);
    assert_eq!(data.entries.len(), 2);
    assert!(data.error.is_none());
    assert_eq!(source.requested.lock().unwrap().as_slice(), ["https://example.com/custom.xml"]);

    let json = serde_json::to_value(&data).unwrap();
    assert_eq!(json["entries"][0]["title"], "A");
    assert_eq!(json["entries"][0]["is_new"], true);
    assert_eq!(json["entries"][0]["link"], "https://example.com/A");
}

#[tokio::test]
async fn widget_reports_fetch_errors() {
    let source = ScriptedSource::new(vec![Err(FeedError::fetch(DEFAULT_FEEDS[0].url, "timed out"))]);
    let refresher = Refresher::new(source, Arc::new(MemorySnapshotCache::default()), TTL);
    let widget = RssFeedWidget::new(refresher);

    let data = widget.render("w1", &WidgetSettings::default(), "s1").await;

    assert_eq!(data.title, "RSS feed");
    assert_eq!(data.feed_url, DEFAULT_FEEDS[0].url);
    assert_eq!(data.refresh_interval, 30);
    assert!(data.entries.is_empty());
    assert!(data.error.unwrap().contains("timed out"));
}

#[test]
fn settings_form_is_forced_until_a_feed_is_chosen() {
    let refresher = Refresher::new(ScriptedSource::new(vec![]), Arc::new(MemorySnapshotCache::default()), TTL);
    let widget = RssFeedWidget::new(refresher);

    assert!(widget.force_show_config(&WidgetSettings::default()));
    let chosen = WidgetSettings {
        feed_url: Some(DEFAULT_FEEDS[1].url.to_string()),
        ..Default::default()
    };
    assert!(!widget.force_show_config(&chosen));
    assert!(widget.configurable());
    assert_eq!(widget.template_name(), "rss_feed_widget.html");
    assert_eq!(widget.plugin_guid(), "19F4BB8E-343D-43A6-A2A6-AC16D66CEA73");
    assert_eq!(widget.list_title(), "RSS feed");

    let choices = RssFeedWidget::feed_choices();
    assert_eq!(choices.len(), DEFAULT_FEEDS.len() + 1);
    assert_eq!(choices.last().unwrap().0, "custom");
}

#[test]
fn registry_rejects_duplicate_names() {
    let make = || {
        let refresher = Refresher::new(ScriptedSource::new(vec![]), Arc::new(MemorySnapshotCache::default()), TTL);
        Arc::new(RssFeedWidget::new(refresher))
    };
    let mut registry = WidgetRegistry::new();

    registry.register(make()).unwrap();
    assert!(registry.register(make()).is_err());
    assert!(registry.get(RssFeedWidget::NAME).is_some());
    assert!(registry.get("ClockWidget").is_none());
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["RSSFeedWidget"]);
}

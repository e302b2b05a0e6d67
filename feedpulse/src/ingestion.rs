use anyhow::Context;
use async_trait::async_trait;
use feed_rs::model;
use feed_rs::parser;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::entry::{Entry, ParsedFeed};

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_USER_AGENT: &str = "feedpulse/0.1.0";

/// Why a feed could not be obtained. Both variants are shown to the viewer
/// and leave the cached snapshot untouched.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to fetch feed {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("failed to parse feed {url}: {reason}")]
    Parse { url: String, reason: String },
}

impl FeedError {
    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        FeedError::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(url: &str, reason: impl ToString) -> Self {
        FeedError::Parse {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Anything that can turn a feed url into parsed entries.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FeedError>;
}

/// Fetches feeds over HTTP and parses them with feed-rs.
///
/// The whole feed is downloaded on every call; no ETag or Last-Modified
/// handling is done.
pub struct HttpFeedSource {
    client: Client,
    max_attempts: u32,
}

impl HttpFeedSource {
    pub fn new(timeout_secs: u64, user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Total number of requests per fetch, first one included.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FeedError> {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let backoff = Duration::from_secs(2u64.pow(attempt - 2)); // 1s, 2s, 4s...
                info!("Retrying feed fetch for {} (attempt {}/{}) after {:?}...", url, attempt, self.max_attempts, backoff);
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| FeedError::fetch(url, format!("failed to read response body: {}", e)))?;
                        return Ok(bytes.to_vec());
                    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(FeedError::fetch(url, format!("server answered {}", status)));
                        continue;
                    } else {
                        // other 4xx will not fix themselves
                        return Err(FeedError::fetch(url, format!("server answered {}", status)));
                    }
                }
                Err(e) => {
                    last_error = Some(FeedError::fetch(url, format!("network error: {}", e)));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FeedError::fetch(url, "no attempt was made")))
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed, FeedError> {
        let start = Instant::now();
        let body = self.download(url).await?;

        let feed = parser::parse(body.as_slice()).map_err(|e| {
            error!("Error parsing feed {}: {}", url, e);
            FeedError::parse(url, e)
        })?;
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            feed_url = url,
            entries = feed.entries.len(),
            "feed loaded"
        );

        Ok(convert_feed(feed))
    }
}

/// Map a feed-rs feed onto the widget's entry model.
pub fn convert_feed(feed: model::Feed) -> ParsedFeed {
    ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        entries: feed.entries.into_iter().map(convert_entry).collect(),
    }
}

fn convert_entry(e: model::Entry) -> Entry {
    let title = e.title.map(|t| t.content).unwrap_or_default();
    let published = e
        .published
        .or(e.updated)
        .map(|d| d.to_rfc2822())
        .unwrap_or_default();

    let mut entry = Entry::new(title, published);
    if !e.id.is_empty() {
        entry = entry.with_field("id", e.id);
    }
    if let Some(link) = e.links.into_iter().next() {
        entry = entry.with_field("link", link.href);
    }
    if let Some(summary) = e.summary {
        entry = entry.with_field("summary", summary.content);
    }
    entry
}

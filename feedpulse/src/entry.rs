use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One syndication item as shown by the widget.
///
/// `published` is kept exactly as the feed source formatted it; it is only ever
/// compared for equality. Everything else the source provides (link, summary,
/// id, ...) travels in `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub published: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entry {
    pub fn new(title: impl Into<String>, published: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            published: published.into(),
            extra: Map::new(),
        }
    }

    /// Attach an opaque payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Identity used to match entries between two fetches of the same feed.
///
/// Only `published` and `title` take part. Distinct items sharing both values
/// collapse into one identity.
pub fn entry_identity(entry: &Entry) -> String {
    let mut key = String::with_capacity(entry.published.len() + entry.title.len());
    key.push_str(&entry.published);
    key.push_str(&entry.title);
    key
}

/// An entry prepared for rendering, with the flags the template animates on.
///
/// Flags never reach the snapshot cache; only the inner `Entry` is cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderEntry {
    #[serde(flatten)]
    pub entry: Entry,
    pub is_new: bool,
    pub to_remove: bool,
}

impl RenderEntry {
    pub fn new_arrival(entry: Entry) -> Self {
        Self {
            entry,
            is_new: true,
            to_remove: false,
        }
    }

    pub fn known(entry: Entry, to_remove: bool) -> Self {
        Self {
            entry,
            is_new: false,
            to_remove,
        }
    }
}

/// A parsed feed as returned by a `FeedSource`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFeed {
    pub title: String,
    pub entries: Vec<Entry>,
}

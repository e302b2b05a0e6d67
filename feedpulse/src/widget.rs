//! Dashboard widget surface: the RSS widget and the registry the host fills
//! at startup.

use anyhow::{bail, Result};
use async_trait::async_trait;
use common::{WidgetSettings, CUSTOM_FEED, DEFAULT_FEEDS};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entry::RenderEntry;
use crate::refresh::Refresher;

/// Everything the template needs to draw one widget instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderData {
    pub id: String,
    pub title: String,
    pub refresh_interval: u64,
    /// Shown in the error message when the feed cannot be loaded
    pub feed_url: String,
    pub feed_title: Option<String>,
    pub entries: Vec<RenderEntry>,
    pub error: Option<String>,
}

/// A widget kind that can be placed on a dashboard.
#[async_trait]
pub trait DashboardWidget: Send + Sync {
    fn name(&self) -> &str;

    /// Stable identifier the dashboard host stores with placed widgets
    fn plugin_guid(&self) -> &str;

    /// Title shown in the "add widget" list
    fn list_title(&self) -> &str;

    fn template_name(&self) -> &str;

    fn configurable(&self) -> bool;

    /// Whether the settings form must be shown before the widget can render.
    fn force_show_config(&self, settings: &WidgetSettings) -> bool;

    async fn render(&self, instance_id: &str, settings: &WidgetSettings, session_id: &str) -> RenderData;
}

/// Widget following an RSS or Atom feed, animating entries in and out.
pub struct RssFeedWidget {
    refresher: Refresher,
}

impl RssFeedWidget {
    pub const NAME: &'static str = "RSSFeedWidget";
    pub const PLUGIN_GUID: &'static str = "19F4BB8E-343D-43A6-A2A6-AC16D66CEA73";
    pub const TEMPLATE_NAME: &'static str = "rss_feed_widget.html";
    pub const LIST_TITLE: &'static str = "RSS feed";

    pub fn new(refresher: Refresher) -> Self {
        Self { refresher }
    }

    /// Feed choices for the settings form as `(value, label)`, ending with the custom url option.
    pub fn feed_choices() -> Vec<(String, String)> {
        DEFAULT_FEEDS
            .iter()
            .map(|f| (f.url.to_string(), f.label.to_string()))
            .chain(std::iter::once((CUSTOM_FEED.to_string(), "Custom RSS URL".to_string())))
            .collect()
    }
}

#[async_trait]
impl DashboardWidget for RssFeedWidget {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn plugin_guid(&self) -> &str {
        Self::PLUGIN_GUID
    }

    fn list_title(&self) -> &str {
        Self::LIST_TITLE
    }

    fn template_name(&self) -> &str {
        Self::TEMPLATE_NAME
    }

    fn configurable(&self) -> bool {
        true
    }

    fn force_show_config(&self, settings: &WidgetSettings) -> bool {
        settings.feed_url.is_none()
    }

    async fn render(&self, instance_id: &str, settings: &WidgetSettings, session_id: &str) -> RenderData {
        let feed_url = settings.feed_url();
        let mut data = RenderData {
            id: instance_id.to_string(),
            title: Self::LIST_TITLE.to_string(),
            refresh_interval: settings.refresh_interval(),
            feed_url: feed_url.clone(),
            feed_title: None,
            entries: Vec::new(),
            error: None,
        };

        match self
            .refresher
            .refresh(instance_id, session_id, &feed_url, settings.entry_count())
            .await
        {
            Ok(refreshed) => {
                data.title = format!("{}: {}", data.title, refreshed.feed_title);
                data.feed_title = Some(refreshed.feed_title);
                data.entries = refreshed.entries;
            }
            Err(e) => {
                data.error = Some(e.to_string());
            }
        }

        data
    }
}

/// Widget kinds available to the host, keyed by name.
#[derive(Default)]
pub struct WidgetRegistry {
    widgets: BTreeMap<String, Arc<dyn DashboardWidget>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, widget: Arc<dyn DashboardWidget>) -> Result<()> {
        let name = widget.name().to_string();
        if self.widgets.contains_key(&name) {
            bail!("widget {} is already registered", name);
        }
        self.widgets.insert(name, widget);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DashboardWidget>> {
        self.widgets.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.widgets.keys().map(String::as_str)
    }
}

/*
feedpulse - main.rs
Composition root: loads the configuration, builds the snapshot cache and feed
source, registers the RSS widget and keeps every configured widget instance
refreshed, writing each render as one JSON line on stdout.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::{Config, WidgetConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use feedpulse::driver::{run_purge, run_widget};
use feedpulse::ingestion::{self, HttpFeedSource};
use feedpulse::refresh::Refresher;
use feedpulse::snapshot::{MemorySnapshotCache, SnapshotCache, SqliteSnapshotCache};
use feedpulse::widget::{DashboardWidget, RenderData, RssFeedWidget, WidgetRegistry};

const DEFAULT_DB_PATH: &str = "data/feedpulse.db";

#[derive(Parser, Debug)]
#[command(name = "feedpulse", about = "RSS dashboard widget refresher")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Viewer session id (a random one is generated when omitted)
    #[arg(long)]
    session: Option<String>,

    /// Render every widget once and exit
    #[arg(long)]
    once: bool,

    /// Print the built-in feed choices and exit
    #[arg(long)]
    list_feeds: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr, stdout carries the render data
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if args.list_feeds {
        for (value, label) in RssFeedWidget::feed_choices() {
            println!("{}\t{}", value, label);
        }
        return Ok(());
    }

    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    config.validate().context("invalid configuration")?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let cache = create_snapshot_cache(&config).await?;
    let ttl = Duration::from_secs(config.cache.ttl_seconds());

    let fetch = config.fetch.clone().unwrap_or_default();
    let source = HttpFeedSource::new(
        fetch.timeout_seconds.unwrap_or(ingestion::DEFAULT_TIMEOUT_SECS),
        fetch.user_agent.as_deref().unwrap_or(ingestion::DEFAULT_USER_AGENT),
    )?
    .with_max_attempts(fetch.max_attempts.unwrap_or(ingestion::DEFAULT_MAX_ATTEMPTS));

    let refresher = Refresher::new(Arc::new(source), cache.clone(), ttl);

    let mut registry = WidgetRegistry::new();
    let rss = Arc::new(RssFeedWidget::new(refresher));
    info!(name = rss.name(), guid = rss.plugin_guid(), "registering widget");
    registry.register(rss)?;
    info!(widgets = ?registry.names().collect::<Vec<_>>(), "widgets registered");

    let instances = if config.widgets.is_empty() {
        info!("no widgets configured, showing the default feed");
        vec![WidgetConfig {
            id: "default".to_string(),
            kind: None,
            settings: Default::default(),
        }]
    } else {
        config.widgets.clone()
    };

    let mut bound = Vec::with_capacity(instances.len());
    for instance in instances {
        let kind = instance.kind.as_deref().unwrap_or(RssFeedWidget::NAME);
        let widget = registry
            .get(kind)
            .with_context(|| format!("widget {} uses unknown kind {}", instance.id, kind))?;
        bound.push((widget, instance));
    }

    let session_id = args.session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(session = %session_id, instances = bound.len(), "starting refresh loops");

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    for (widget, instance) in bound {
        handles.push(tokio::spawn(run_widget(
            widget,
            instance,
            session_id.clone(),
            shutdown.clone(),
            args.once,
            print_render,
        )));
    }

    if args.once {
        for handle in handles {
            if let Err(join_err) = handle.await {
                error!(%join_err, "widget task panicked");
            }
        }
        return Ok(());
    }

    let purge = tokio::spawn(run_purge(cache, ttl, shutdown.clone()));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, stopping refresh loops");
    shutdown.cancel();

    let all = async {
        for handle in handles {
            if let Err(join_err) = handle.await {
                error!(%join_err, "widget task panicked");
            }
        }
        let _ = purge.await;
    };
    if tokio::time::timeout(Duration::from_secs(20), all).await.is_err() {
        info!("Timed out waiting for refresh loops to exit; continuing shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

/// Build the snapshot cache selected by `cache.backend`.
async fn create_snapshot_cache(config: &Config) -> Result<Arc<dyn SnapshotCache>> {
    let backend = config.cache.backend.as_deref().unwrap_or("memory");
    match backend {
        "memory" => Ok(Arc::new(MemorySnapshotCache::default())),
        "sqlite" => {
            let path = config.cache.path.as_deref().unwrap_or(DEFAULT_DB_PATH);
            let pool = common::init_db_pool(path).await?;
            let cache = SqliteSnapshotCache::new(pool);
            cache
                .ensure_schema()
                .await
                .context("failed to create snapshot cache schema")?;
            info!(db_path = %path, "sqlite snapshot cache ready");
            Ok(Arc::new(cache))
        }
        _ => anyhow::bail!("Unknown cache backend: {}", backend),
    }
}

/// Write one render as a JSON line on stdout.
fn print_render(data: &RenderData) {
    match serde_json::to_string(data) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(%e, widget = %data.id, "failed to serialize render data"),
    }
}

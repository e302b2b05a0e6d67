//! Periodic refresh loops run by the binary, one per widget instance, plus
//! the snapshot purge loop.
//!
//! Both stop on a `CancellationToken`. Cancellation is sticky: a loop that is
//! busy rendering when the token fires still sees it on its next wait.

use common::WidgetConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::snapshot::SnapshotCache;
use crate::widget::{DashboardWidget, RenderData};

/// Refresh one widget instance until shutdown, handing each render to `emit`.
pub async fn run_widget<F>(
    widget: Arc<dyn DashboardWidget>,
    instance: WidgetConfig,
    session_id: String,
    shutdown: CancellationToken,
    once: bool,
    mut emit: F,
) where
    F: FnMut(&RenderData) + Send,
{
    if widget.force_show_config(&instance.settings) {
        warn!(widget = %instance.id, "widget has no feed configured, showing the default feed");
    }
    let interval = Duration::from_secs(instance.settings.refresh_interval());

    loop {
        let data = widget.render(&instance.id, &instance.settings, &session_id).await;
        if let Some(err) = &data.error {
            error!(widget = %instance.id, feed_url = %data.feed_url, "refresh failed: {}", err);
        }
        emit(&data);

        if once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                info!(widget = %instance.id, "shutdown requested, exiting loop");
                break;
            }
        }
    }
}

/// Sweep expired snapshots once per `period` until shutdown.
pub async fn run_purge(cache: Arc<dyn SnapshotCache>, period: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                match cache.purge_expired().await {
                    Ok(removed) => info!(removed, "expired snapshots purged"),
                    Err(e) => warn!(%e, "failed to purge expired snapshots"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

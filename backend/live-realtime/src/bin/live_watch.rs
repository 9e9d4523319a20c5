//! Joins a live stream's chat and control rooms and logs what happens until
//! interrupted. Useful for watching reconnect and fallback behaviour against
//! a real deployment.

use live_realtime::api::{LiveApi, StreamApi};
use live_realtime::metrics::{HttpMetricsTransport, MetricsSink};
use live_realtime::models::Author;
use live_realtime::monitor::ConnectionMonitor;
use live_realtime::protocol::Role;
use live_realtime::transport::WsConnector;
use live_realtime::{logging, LiveConfig, LiveError, LiveStreamSession, SessionDeps};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), LiveError> {
    logging::init_tracing();
    let config = LiveConfig::from_env()?;

    let stream_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LIVE_STREAM_ID").ok())
        .ok_or_else(|| LiveError::Config("usage: live-watch <stream-id>".into()))?;

    let api = Arc::new(LiveApi::new(&config.api_base_url)?);

    match api.stream_snapshot(&stream_id).await {
        Ok(snapshot) => info!(
            stream_id = %snapshot.stream_id,
            title = snapshot.title.as_deref().unwrap_or("-"),
            viewers = snapshot.viewer_count,
            "Stream snapshot"
        ),
        Err(e) => warn!(error = %e, "Could not fetch stream snapshot"),
    }

    let (metrics, flusher) = match &config.metrics.endpoint {
        Some(endpoint) => {
            let egress = resilience::metrics_egress_config();
            let transport = HttpMetricsTransport::new(endpoint, egress.timeout.duration)?;
            let (sink, handle) = MetricsSink::spawn(Arc::new(transport), &config.metrics);
            (sink, Some(handle))
        }
        None => (MetricsSink::disabled(), None),
    };

    let monitor = ConnectionMonitor::new(true);
    let viewer = Author {
        id: format!("watch-{}", uuid::Uuid::new_v4()),
        display_name: "live-watch".to_string(),
        role: Role::Viewer,
    };

    let session = LiveStreamSession::open(
        stream_id,
        viewer,
        None,
        &config,
        SessionDeps {
            connector: Arc::new(WsConnector),
            chat_api: api.clone(),
            stream_api: api,
            monitor: monitor.clone(),
            metrics,
            playback: None,
        },
    );

    let mut chat_status = session.chat_channel().watch();
    let mut control_status = session.control_channel().watch();
    let mut messages = session.messages().changes();
    let mut health = session.control().watch_health();
    let mut last_seen: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = chat_status.changed() => {
                let connection = chat_status.borrow_and_update().clone();
                info!(state = connection.state.as_str(), mode = ?connection.mode, attempts = connection.reconnect_attempts, "Chat channel");
            }
            Ok(()) = control_status.changed() => {
                let connection = control_status.borrow_and_update().clone();
                info!(state = connection.state.as_str(), mode = ?connection.mode, "Control channel");
            }
            Ok(()) = messages.changed() => {
                let snapshot = session.messages().snapshot();
                let start = last_seen
                    .as_ref()
                    .and_then(|id| snapshot.iter().position(|m| &m.id == id))
                    .map_or(0, |index| index + 1);
                for message in &snapshot[start..] {
                    info!(id = %message.id, author = %message.author.display_name, "{}", message.body);
                }
                last_seen = snapshot.last().map(|m| m.id.clone());
            }
            Ok(()) = health.changed() => {
                if let Some(sample) = health.borrow_and_update().clone() {
                    info!(viewers = sample.viewer_count, fps = sample.fps, bitrate_kbps = sample.bitrate_kbps, "Stream health");
                }
            }
        }
    }

    info!("Shutting down");
    session.close().await;
    monitor.teardown();
    if let Some(handle) = flusher {
        // The flusher drains once the last sink clone is gone
        let _ = handle.await;
    }
    Ok(())
}

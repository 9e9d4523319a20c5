//! Batched, fire-and-forget telemetry egress.
//!
//! `record` never blocks and never fails; a background flusher posts batches
//! when they fill up or when the flush interval passes. Egress goes through a
//! circuit breaker and every failure is logged and dropped.

use crate::channel::{ChannelMode, ChannelState, Connection};
use crate::config::MetricsConfig;
use crate::error::{LiveError, LiveResult, MediaErrorClass};
use async_trait::async_trait;
use reqwest::Url;
use resilience::CircuitBreaker;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Per-phase offsets from bring-up start, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseDurations {
    pub preconnect_ms: Option<u64>,
    pub manifest_ms: Option<u64>,
    pub engine_init_ms: Option<u64>,
    pub first_frame_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRecord {
    JoinTime {
        stream_id: String,
        join_time_ms: u64,
        phases: PhaseDurations,
        recorded_at_ms: i64,
    },
    PlaybackError {
        stream_id: String,
        class: MediaErrorClass,
        message: String,
        recovery_attempts: u32,
        recorded_at_ms: i64,
    },
    ChannelStatus {
        channel: &'static str,
        channel_id: String,
        state: ChannelState,
        mode: ChannelMode,
        reconnect_attempts: u32,
        last_error: Option<String>,
        recorded_at_ms: i64,
    },
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl MetricRecord {
    pub fn join_time(stream_id: &str, join_time: Duration, phases: PhaseDurations) -> Self {
        MetricRecord::JoinTime {
            stream_id: stream_id.to_string(),
            join_time_ms: join_time.as_millis() as u64,
            phases,
            recorded_at_ms: now_ms(),
        }
    }

    pub fn playback_error(
        stream_id: &str,
        class: MediaErrorClass,
        message: &str,
        recovery_attempts: u32,
    ) -> Self {
        MetricRecord::PlaybackError {
            stream_id: stream_id.to_string(),
            class,
            message: message.to_string(),
            recovery_attempts,
            recorded_at_ms: now_ms(),
        }
    }

    pub fn channel_status(channel: &'static str, connection: &Connection) -> Self {
        MetricRecord::ChannelStatus {
            channel,
            channel_id: connection.channel_id.clone(),
            state: connection.state,
            mode: connection.mode,
            reconnect_attempts: connection.reconnect_attempts,
            last_error: connection.last_error.clone(),
            recorded_at_ms: now_ms(),
        }
    }
}

#[async_trait]
pub trait MetricsTransport: Send + Sync {
    async fn post_batch(&self, records: &[MetricRecord]) -> LiveResult<()>;
}

#[derive(Serialize)]
struct BatchBody<'a> {
    records: &'a [MetricRecord],
}

/// JSON POST of `{records: [...]}` to the configured endpoint
#[derive(Debug, Clone)]
pub struct HttpMetricsTransport {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpMetricsTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> LiveResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| LiveError::Config(format!("invalid metrics endpoint: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LiveError::Config(format!("metrics client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl MetricsTransport for HttpMetricsTransport {
    async fn post_batch(&self, records: &[MetricRecord]) -> LiveResult<()> {
        self.client
            .post(self.endpoint.clone())
            .json(&BatchBody { records })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Cloneable recording handle shared by every component of a session
#[derive(Debug, Clone, Default)]
pub struct MetricsSink {
    tx: Option<mpsc::Sender<MetricRecord>>,
}

impl MetricsSink {
    /// Start the background flusher. It exits after a final flush once every
    /// clone of the sink has been dropped.
    pub fn spawn(
        transport: Arc<dyn MetricsTransport>,
        config: &MetricsConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sink, rx) = Self::buffered(config.queue_capacity);
        let egress = resilience::metrics_egress_config();
        let flusher = Flusher {
            transport,
            breaker: CircuitBreaker::new("metrics-egress", egress.circuit_breaker),
            batch_size: config.batch_size.max(1),
        };
        let handle = tokio::spawn(flusher.run(rx, config.flush_interval));
        (sink, handle)
    }

    /// A sink whose records are handed to the returned receiver as-is.
    pub fn buffered(capacity: usize) -> (Self, mpsc::Receiver<MetricRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, record: MetricRecord) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(record) {
                debug!("Dropping metric record: {}", e);
            }
        }
    }
}

struct Flusher {
    transport: Arc<dyn MetricsTransport>,
    breaker: CircuitBreaker,
    batch_size: usize,
}

impl Flusher {
    async fn run(self, mut rx: mpsc::Receiver<MetricRecord>, flush_interval: Duration) {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(flush_interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= self.batch_size {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => {
                        self.flush(&mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush(&mut batch).await,
            }
        }
    }

    async fn flush(&self, batch: &mut Vec<MetricRecord>) {
        if batch.is_empty() {
            return;
        }
        let records = std::mem::take(batch);
        match self
            .breaker
            .call(|| self.transport.post_batch(&records))
            .await
        {
            Ok(()) => debug!(count = records.len(), "Posted metrics batch"),
            Err(e) if e.is_open() => {
                debug!(count = records.len(), "Metrics egress circuit open, dropping batch")
            }
            Err(e) => warn!(count = records.len(), error = %e, "Failed to post metrics batch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl MetricsTransport for RecordingTransport {
        async fn post_batch(&self, records: &[MetricRecord]) -> LiveResult<()> {
            self.batches.lock().push(records.len());
            if self.fail {
                Err(LiveError::Transport("down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn config(batch_size: usize) -> MetricsConfig {
        MetricsConfig {
            endpoint: None,
            batch_size,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 64,
        }
    }

    fn error_record() -> MetricRecord {
        MetricRecord::playback_error("s1", MediaErrorClass::Network, "lost", 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_size_and_on_close() {
        let transport = Arc::new(RecordingTransport::default());
        let (sink, handle) = MetricsSink::spawn(transport.clone(), &config(2));

        for _ in 0..3 {
            sink.record(error_record());
        }
        drop(sink);
        handle.await.unwrap();

        assert_eq!(*transport.batches.lock(), vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_interval() {
        let transport = Arc::new(RecordingTransport::default());
        let (sink, _handle) = MetricsSink::spawn(transport.clone(), &config(50));

        sink.record(error_record());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(transport.batches.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*transport.batches.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed_and_breaker_stops_egress() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let (sink, handle) = MetricsSink::spawn(transport.clone(), &config(1));

        for _ in 0..5 {
            sink.record(error_record());
        }
        drop(sink);
        handle.await.unwrap();

        // metrics egress opens after 3 consecutive failures
        assert_eq!(transport.batches.lock().len(), 3);
    }

    #[test]
    fn test_disabled_sink_accepts_records() {
        let sink = MetricsSink::disabled();
        sink.record(error_record());
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let value = serde_json::to_value(error_record()).unwrap();
        assert_eq!(value["kind"], "playback_error");
        assert_eq!(value["class"], "network");
        assert_eq!(value["stream_id"], "s1");
    }
}

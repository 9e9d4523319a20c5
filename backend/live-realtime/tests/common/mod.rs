//! Hand-written fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use live_realtime::api::{ChatApi, StreamApi, StreamSnapshot, StreamStats};
use live_realtime::channel::PollSource;
use live_realtime::error::{LiveError, LiveResult};
use live_realtime::playback::{
    EngineEvent, EngineTunables, MediaEngine, NetworkProfile, PlaybackBackend, SeekableRange,
};
use live_realtime::protocol::WireMessage;
use live_realtime::transport::{LinkPeer, SocketConnector, SocketLink};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Let every ready task run without moving the paused clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn assert_near(actual: Duration, expected: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(20),
        "expected ~{expected:?}, got {actual:?}"
    );
}

// ============================================================
// Socket
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
}

/// Connector that follows a script of outcomes, then repeats `fallback`.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    attempts: Mutex<Vec<(String, Instant)>>,
    peers: Mutex<Vec<(String, LinkPeer)>>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Outcome>, fallback: Outcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            attempts: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new(Vec::new(), Outcome::Accept)
    }

    pub fn set_fallback(&self, outcome: Outcome) {
        *self.fallback.lock() = outcome;
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Most recent accepted link for `url`
    pub fn take_peer(&self, url: &str) -> Option<LinkPeer> {
        let mut peers = self.peers.lock();
        let index = peers.iter().rposition(|(peer_url, _)| peer_url == url)?;
        Some(peers.remove(index).1)
    }
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> LiveResult<SocketLink> {
        self.attempts.lock().push((url.to_string(), Instant::now()));
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(*self.fallback.lock());
        match outcome {
            Outcome::Refuse => Err(LiveError::Transport("connection refused".into())),
            Outcome::Accept => {
                let (link, peer) = SocketLink::channel();
                self.peers.lock().push((url.to_string(), peer));
                Ok(link)
            }
        }
    }
}

/// Drain everything written to a peer so far.
pub fn sent_frames(peer: &mut LinkPeer) -> Vec<serde_json::Value> {
    let mut frames = Vec::new();
    while let Ok(text) = peer.sent.try_recv() {
        frames.push(serde_json::from_str(&text).expect("client frames are JSON"));
    }
    frames
}

// ============================================================
// HTTP fallback
// ============================================================

/// Poll source that hands out queued batches, then empty results.
pub struct QueuedPoller<T> {
    batches: Mutex<VecDeque<Vec<T>>>,
    polls: Mutex<Vec<Instant>>,
    fail: AtomicBool,
}

impl<T> QueuedPoller<T> {
    pub fn new(batches: Vec<Vec<T>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(batches.into()),
            polls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn failing() -> Arc<Self> {
        let poller = Self::new(Vec::new());
        poller.fail.store(true, Ordering::SeqCst);
        poller
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().len()
    }
}

#[async_trait]
impl<T: Send + 'static> PollSource for QueuedPoller<T> {
    type Item = T;

    async fn poll(&self) -> LiveResult<Vec<T>> {
        self.polls.lock().push(Instant::now());
        if self.fail.load(Ordering::SeqCst) {
            return Err(LiveError::Http {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeApi {
    pub history: Mutex<Vec<WireMessage>>,
    pub posted: Mutex<Vec<String>>,
    pub stats_calls: AtomicU32,
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn chat_history(&self, _stream_id: &str, since: Option<i64>) -> LiveResult<Vec<WireMessage>> {
        Ok(self
            .history
            .lock()
            .iter()
            .filter(|m| since.map_or(true, |since| m.ts >= since))
            .cloned()
            .collect())
    }

    async fn send_message(&self, _stream_id: &str, text: &str) -> LiveResult<()> {
        self.posted.lock().push(text.to_string());
        Ok(())
    }
}

#[async_trait]
impl StreamApi for FakeApi {
    async fn stream_snapshot(&self, stream_id: &str) -> LiveResult<StreamSnapshot> {
        Ok(StreamSnapshot {
            stream_id: stream_id.to_string(),
            title: None,
            status: Some("live".into()),
            playback_url: None,
            viewer_count: 1,
        })
    }

    async fn stream_stats(&self, _stream_id: &str) -> LiveResult<StreamStats> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StreamStats {
            viewer_count: 7,
            bitrate_kbps: 3000.0,
            fps: 30.0,
            drop_rate: 0.0,
            timestamp: 0,
        })
    }
}

// ============================================================
// Playback
// ============================================================

#[derive(Default)]
pub struct FakeEngine {
    pub loads: AtomicU32,
    pub start_loads: AtomicU32,
    pub media_recoveries: AtomicU32,
    pub destroyed: AtomicBool,
    pub seeks: Mutex<Vec<f64>>,
    pub range: Mutex<Option<SeekableRange>>,
    pub position: Mutex<f64>,
    /// Remaining `load_source` calls that fail with a transport error
    pub failing_loads: AtomicU32,
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn load_source(&self, _url: &str) -> LiveResult<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_loads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_loads.store(remaining - 1, Ordering::SeqCst);
            return Err(LiveError::Transport("manifest fetch failed".into()));
        }
        Ok(())
    }

    fn attach_media(&self) -> LiveResult<()> {
        Ok(())
    }

    fn start_load(&self) {
        self.start_loads.fetch_add(1, Ordering::SeqCst);
    }

    fn recover_media_error(&self) {
        self.media_recoveries.fetch_add(1, Ordering::SeqCst);
    }

    fn seekable_range(&self) -> Option<SeekableRange> {
        *self.range.lock()
    }

    fn current_time(&self) -> f64 {
        *self.position.lock()
    }

    fn seek(&self, position: f64) {
        self.seeks.lock().push(position);
        *self.position.lock() = position;
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub preconnects: Mutex<Vec<String>>,
    pub engines: Mutex<Vec<Arc<FakeEngine>>>,
    pub tunables: Mutex<Vec<EngineTunables>>,
    events: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
    /// `load_source` failures injected into every new engine
    pub failing_loads: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Emit on the most recently created engine.
    pub fn emit(&self, event: EngineEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn engine(&self, index: usize) -> Arc<FakeEngine> {
        self.engines.lock()[index].clone()
    }

    pub fn engine_count(&self) -> usize {
        self.engines.lock().len()
    }
}

#[async_trait]
impl PlaybackBackend for FakeBackend {
    fn preconnect(&self, origin: &str) {
        self.preconnects.lock().push(origin.to_string());
    }

    async fn preload_manifest(&self, _url: &str) -> LiveResult<()> {
        Ok(())
    }

    fn network_profile(&self) -> NetworkProfile {
        NetworkProfile {
            downlink_kbps: Some(10_000),
            rtt_ms: Some(40),
            save_data: false,
        }
    }

    fn create_engine(
        &self,
        tunables: &EngineTunables,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> LiveResult<Arc<dyn MediaEngine>> {
        let engine = Arc::new(FakeEngine::default());
        engine
            .failing_loads
            .store(self.failing_loads.load(Ordering::SeqCst), Ordering::SeqCst);
        self.tunables.lock().push(*tunables);
        self.engines.lock().push(engine.clone());
        *self.events.lock() = Some(events);
        Ok(engine)
    }
}

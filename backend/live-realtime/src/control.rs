//! Creator control room state: stream health, viewer count and the tip
//! animation queue.

use crate::channel::ChannelOutput;
use crate::models::{HealthSample, TipEvent};
use crate::protocol::ControlServerFrame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_TIP_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct ControlFeed {
    health: Arc<watch::Sender<Option<HealthSample>>>,
    viewers: Arc<watch::Sender<Option<u64>>>,
    tips: Arc<Mutex<VecDeque<TipEvent>>>,
    tip_capacity: usize,
}

impl Default for ControlFeed {
    fn default() -> Self {
        Self::new(DEFAULT_TIP_CAPACITY)
    }
}

impl ControlFeed {
    pub fn new(tip_capacity: usize) -> Self {
        let (health, _) = watch::channel(None);
        let (viewers, _) = watch::channel(None);
        let tip_capacity = tip_capacity.max(1);
        Self {
            health: Arc::new(health),
            viewers: Arc::new(viewers),
            tips: Arc::new(Mutex::new(VecDeque::with_capacity(tip_capacity))),
            tip_capacity,
        }
    }

    pub fn apply(&self, frame: ControlServerFrame) {
        match frame {
            ControlServerFrame::Health(health) => {
                let sample = HealthSample::from(health);
                self.viewers.send_replace(Some(sample.viewer_count));
                self.health.send_replace(Some(sample));
            }
            ControlServerFrame::Viewers { count } => {
                self.viewers.send_if_modified(|current| {
                    let changed = *current != Some(count);
                    *current = Some(count);
                    changed
                });
            }
            ControlServerFrame::Tip(tip) => {
                let mut tips = self.tips.lock();
                if tips.len() >= self.tip_capacity {
                    // Animations are ephemeral, the oldest can go
                    tips.pop_front();
                    debug!("Tip queue full, dropped oldest");
                }
                tips.push_back(tip.into());
            }
        }
    }

    pub fn latest_health(&self) -> Option<HealthSample> {
        self.health.borrow().clone()
    }

    pub fn watch_health(&self) -> watch::Receiver<Option<HealthSample>> {
        self.health.subscribe()
    }

    pub fn viewer_count(&self) -> Option<u64> {
        *self.viewers.borrow()
    }

    /// Take every queued tip, oldest first.
    pub fn drain_tips(&self) -> Vec<TipEvent> {
        self.tips.lock().drain(..).collect()
    }

    pub fn spawn_ingest(
        &self,
        mut events: broadcast::Receiver<ChannelOutput<ControlServerFrame>>,
    ) -> JoinHandle<()> {
        let feed = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelOutput::Event(frame)) => feed.apply(frame),
                    Ok(ChannelOutput::Status(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Control ingest lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{WireHealth, WireTip};

    fn health(viewers: u64, fps: f64) -> ControlServerFrame {
        ControlServerFrame::Health(WireHealth {
            viewer_count: viewers,
            bitrate_kbps: 4500.0,
            fps,
            drop_rate: 0.2,
            timestamp: 1_700_000_000_000,
        })
    }

    fn tip(id: &str) -> ControlServerFrame {
        ControlServerFrame::Tip(WireTip {
            id: id.into(),
            amount: 5.0,
            currency: "USD".into(),
            actor: "fan".into(),
            message: None,
            stream_id: "s1".into(),
        })
    }

    #[test]
    fn test_health_last_value_wins() {
        let feed = ControlFeed::default();
        assert!(feed.latest_health().is_none());

        feed.apply(health(10, 30.0));
        feed.apply(health(12, 60.0));

        let latest = feed.latest_health().unwrap();
        assert_eq!(latest.fps, 60.0);
        assert_eq!(feed.viewer_count(), Some(12));

        feed.apply(ControlServerFrame::Viewers { count: 15 });
        assert_eq!(feed.viewer_count(), Some(15));
    }

    #[test]
    fn test_tip_queue_is_bounded() {
        let feed = ControlFeed::new(2);
        for id in ["a", "b", "c"] {
            feed.apply(tip(id));
        }

        let ids: Vec<_> = feed.drain_tips().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(feed.drain_tips().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_applies_events_until_closed() {
        let feed = ControlFeed::default();
        let (tx, rx) = broadcast::channel(8);
        let handle = feed.spawn_ingest(rx);

        tx.send(ChannelOutput::Event(ControlServerFrame::Viewers { count: 3 }))
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(feed.viewer_count(), Some(3));
    }
}

//! Chat message stream for one room.
//!
//! Server events are applied in arrival order. Sends are optimistic while the
//! socket is up: a pending line appears at once and is swapped for the
//! authoritative one when the echo arrives. With the socket down the message
//! goes straight to the HTTP API.

use super::{Cursor, MessageBuffer, SlowMode};
use crate::api::ChatApi;
use crate::channel::{ChannelOutput, ChannelSender, ChatChannel};
use crate::config::ChatConfig;
use crate::error::{LiveError, LiveResult};
use crate::models::{Author, Message};
use crate::protocol::{self, ChatClientFrame, ChatServerFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Write side of the chat socket
#[async_trait]
pub trait ChatOutbound: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn send_frame(&self, frame: String) -> LiveResult<()>;
}

#[async_trait]
impl ChatOutbound for ChannelSender<ChatChannel> {
    fn is_connected(&self) -> bool {
        ChannelSender::is_connected(self)
    }

    async fn send_frame(&self, frame: String) -> LiveResult<()> {
        self.send(frame).await
    }
}

/// Outcome of [`MessageStream::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReceipt {
    /// Written to the socket; the pending line carries `temp_id` until echoed
    Sent { temp_id: String },
    /// Accepted by the HTTP API
    Delivered,
    /// Slow mode is active; nothing was sent
    CoolingDown { remaining_secs: u64 },
}

struct ChatState {
    buffer: MessageBuffer,
    viewer_count: Option<u64>,
}

struct Inner {
    stream_id: String,
    room: String,
    viewer: Author,
    max_message_chars: usize,
    state: Mutex<ChatState>,
    revision: watch::Sender<u64>,
    cursor: Cursor,
    slow_mode: SlowMode,
    outbound: Arc<dyn ChatOutbound>,
    api: Arc<dyn ChatApi>,
}

#[derive(Clone)]
pub struct MessageStream {
    inner: Arc<Inner>,
}

impl MessageStream {
    pub fn new(
        stream_id: impl Into<String>,
        room: impl Into<String>,
        viewer: Author,
        config: &ChatConfig,
        cursor: Cursor,
        outbound: Arc<dyn ChatOutbound>,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                stream_id: stream_id.into(),
                room: room.into(),
                viewer,
                max_message_chars: config.max_message_chars,
                state: Mutex::new(ChatState {
                    buffer: MessageBuffer::new(config.buffer_capacity),
                    viewer_count: None,
                }),
                revision,
                cursor,
                slow_mode: SlowMode::new(),
                outbound,
                api,
            }),
        }
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut ChatState) -> (R, bool)) -> R {
        let mut state = self.inner.state.lock();
        let (result, changed) = f(&mut state);
        drop(state);
        if changed {
            self.bump();
        }
        result
    }

    /// Insert a confirmed message at the tail. Returns false for duplicates.
    pub fn append(&self, message: Message) -> bool {
        let sent_at = message.sent_at;
        let confirmed = !message.is_pending();
        let added = self.mutate(|state| {
            let added = state.buffer.push(message);
            (added, added)
        });
        if confirmed {
            self.inner.cursor.advance(sent_at);
        }
        added
    }

    pub fn pin(&self, id: &str) -> bool {
        self.mutate(|state| {
            let pinned = state.buffer.pin(id);
            (pinned, pinned)
        })
    }

    pub fn unpin(&self) -> bool {
        self.mutate(|state| {
            let changed = state.buffer.unpin();
            (changed, changed)
        })
    }

    pub fn delete(&self, id: &str) -> bool {
        self.mutate(|state| {
            let deleted = state.buffer.mark_deleted(id);
            (deleted, deleted)
        })
    }

    /// Apply one server event.
    pub fn apply(&self, frame: ChatServerFrame) {
        match frame {
            ChatServerFrame::Message(wire) => self.merge(wire.client_id.clone(), wire.into()),
            ChatServerFrame::Pinned { id: Some(id) } => {
                if !self.pin(&id) {
                    debug!(stream_id = %self.inner.stream_id, id = %id, "Pin for unknown message ignored");
                }
            }
            ChatServerFrame::Pinned { id: None } => {
                self.unpin();
            }
            ChatServerFrame::SlowMode { seconds } => {
                debug!(stream_id = %self.inner.stream_id, seconds, "Slow mode updated");
                self.inner.slow_mode.set_window(seconds);
                self.bump();
            }
            ChatServerFrame::Viewers { count } => self.mutate(|state| {
                let changed = state.viewer_count != Some(count);
                state.viewer_count = Some(count);
                ((), changed)
            }),
            ChatServerFrame::Deleted { id } => {
                self.delete(&id);
            }
        }
    }

    fn merge(&self, correlation_id: Option<String>, message: Message) {
        let sent_at = message.sent_at;
        self.mutate(|state| {
            let buffer = &mut state.buffer;
            let pending =
                buffer.find_pending(correlation_id.as_deref(), &message.author.id, &message.body);
            let changed = match pending {
                // Already have the authoritative copy, drop the optimistic one
                Some(temp_id) if buffer.contains(&message.id) => buffer.remove(&temp_id).is_some(),
                Some(temp_id) => buffer.confirm(&temp_id, message),
                None => buffer.push(message),
            };
            ((), changed)
        });
        self.inner.cursor.advance(sent_at);
    }

    /// Send `text` as the viewer.
    ///
    /// Fails with [`LiveError::Validation`] for empty or over-long text, and
    /// with the HTTP error when the fallback POST fails. Slow mode is reported
    /// through the receipt, not as an error.
    pub async fn send(&self, text: &str) -> LiveResult<SendReceipt> {
        let inner = &self.inner;
        let body = text.trim();
        if body.is_empty() {
            return Err(LiveError::Validation("message is empty".to_string()));
        }
        if body.chars().count() > inner.max_message_chars {
            return Err(LiveError::Validation(format!(
                "message exceeds {} characters",
                inner.max_message_chars
            )));
        }

        let remaining_secs = inner.slow_mode.remaining_secs();
        if remaining_secs > 0 {
            return Ok(SendReceipt::CoolingDown { remaining_secs });
        }

        if inner.outbound.is_connected() {
            let correlation_id = Uuid::new_v4().to_string();
            let frame = protocol::encode(&ChatClientFrame::Message {
                room: inner.room.clone(),
                text: body.to_string(),
                client_id: Some(correlation_id.clone()),
            })?;
            let pending = Message::pending(
                inner.viewer.clone(),
                body.to_string(),
                chrono::Utc::now().timestamp(),
                correlation_id,
            );
            let temp_id = pending.id.clone();
            self.append(pending);

            match inner.outbound.send_frame(frame).await {
                Ok(()) => {
                    inner.slow_mode.start_cooldown();
                    return Ok(SendReceipt::Sent { temp_id });
                }
                Err(e) => {
                    warn!(stream_id = %inner.stream_id, error = %e, "Socket send failed, posting instead");
                    self.mutate(|state| {
                        let removed = state.buffer.remove(&temp_id).is_some();
                        ((), removed)
                    });
                }
            }
        }

        inner.api.send_message(&inner.stream_id, body).await?;
        inner.slow_mode.start_cooldown();
        Ok(SendReceipt::Delivered)
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.state.lock().buffer.snapshot()
    }

    pub fn pinned(&self) -> Option<Message> {
        self.inner.state.lock().buffer.pinned().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn viewer_count(&self) -> Option<u64> {
        self.inner.state.lock().viewer_count
    }

    /// Bumped on every visible change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    pub fn slow_mode(&self) -> &SlowMode {
        &self.inner.slow_mode
    }

    pub fn cursor(&self) -> &Cursor {
        &self.inner.cursor
    }

    /// Feed chat channel events into this stream until the channel goes away.
    pub fn spawn_ingest(
        &self,
        mut events: broadcast::Receiver<ChannelOutput<ChatServerFrame>>,
    ) -> JoinHandle<()> {
        let stream = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelOutput::Event(frame)) => stream.apply(frame),
                    Ok(ChannelOutput::Status(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(stream_id = %stream.inner.stream_id, skipped, "Chat ingest lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

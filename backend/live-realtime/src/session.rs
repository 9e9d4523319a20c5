//! One viewer's connection to one live stream: chat and control rooms,
//! playback, and the telemetry they share.

use crate::api::{ChatApi, ChatHistoryPoller, StreamApi, StreamStatsPoller};
use crate::channel::{ChannelDeps, ChannelManager, ChatChannel, Connection, ControlChannel};
use crate::chat::{Cursor, MessageStream, SendReceipt};
use crate::config::LiveConfig;
use crate::control::ControlFeed;
use crate::error::LiveResult;
use crate::metrics::MetricsSink;
use crate::models::Author;
use crate::monitor::ConnectionMonitor;
use crate::playback::{PlaybackBackend, PlaybackSession};
use crate::transport::SocketConnector;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct SessionDeps {
    pub connector: Arc<dyn SocketConnector>,
    pub chat_api: Arc<dyn ChatApi>,
    pub stream_api: Arc<dyn StreamApi>,
    pub monitor: Arc<ConnectionMonitor>,
    pub metrics: MetricsSink,
    /// Without a backend the session runs chat and control only
    pub playback: Option<Arc<dyn PlaybackBackend>>,
}

pub struct LiveStreamSession {
    stream_id: String,
    chat_channel: ChannelManager<ChatChannel>,
    control_channel: ChannelManager<ControlChannel>,
    messages: MessageStream,
    control: ControlFeed,
    playback: Option<PlaybackSession>,
    ingest: Vec<JoinHandle<()>>,
}

impl LiveStreamSession {
    /// Create both channel managers, wire their events into the message
    /// stream and control feed, join both rooms and start playback.
    pub fn open(
        stream_id: impl Into<String>,
        viewer: Author,
        source_url: Option<String>,
        config: &LiveConfig,
        deps: SessionDeps,
    ) -> Self {
        let stream_id = stream_id.into();
        let cursor = Cursor::default();

        let chat_channel = ChannelManager::spawn(
            ChatChannel::new(&stream_id),
            &config.chat_channel,
            ChannelDeps {
                connector: deps.connector.clone(),
                poll_source: Arc::new(ChatHistoryPoller::new(
                    deps.chat_api.clone(),
                    &stream_id,
                    cursor.clone(),
                )),
                monitor: deps.monitor.clone(),
                metrics: deps.metrics.clone(),
            },
        );
        let control_channel = ChannelManager::spawn(
            ControlChannel::new(&stream_id),
            &config.control_channel,
            ChannelDeps {
                connector: deps.connector,
                poll_source: Arc::new(StreamStatsPoller::new(deps.stream_api, &stream_id)),
                monitor: deps.monitor.clone(),
                metrics: deps.metrics.clone(),
            },
        );

        let messages = MessageStream::new(
            &stream_id,
            &stream_id,
            viewer,
            &config.chat,
            cursor,
            Arc::new(chat_channel.sender()),
            deps.chat_api,
        );
        let control = ControlFeed::default();

        // Subscribe before joining so no early event is missed
        let ingest = vec![
            messages.spawn_ingest(chat_channel.subscribe()),
            control.spawn_ingest(control_channel.subscribe()),
        ];
        chat_channel.join();
        control_channel.join();

        let playback = deps.playback.map(|backend| {
            let session = PlaybackSession::spawn(
                &stream_id,
                config.playback.clone(),
                backend,
                deps.monitor,
                deps.metrics,
            );
            if let Some(url) = source_url {
                session.set_source(url);
            }
            session
        });

        info!(stream_id = %stream_id, playback = playback.is_some(), "Live session opened");
        Self {
            stream_id,
            chat_channel,
            control_channel,
            messages,
            control,
            playback,
            ingest,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn messages(&self) -> &MessageStream {
        &self.messages
    }

    pub fn control(&self) -> &ControlFeed {
        &self.control
    }

    pub fn playback(&self) -> Option<&PlaybackSession> {
        self.playback.as_ref()
    }

    pub fn chat_channel(&self) -> &ChannelManager<ChatChannel> {
        &self.chat_channel
    }

    pub fn control_channel(&self) -> &ChannelManager<ControlChannel> {
        &self.control_channel
    }

    pub fn chat_connection(&self) -> Connection {
        self.chat_channel.connection()
    }

    pub fn control_connection(&self) -> Connection {
        self.control_channel.connection()
    }

    pub async fn send_message(&self, text: &str) -> LiveResult<SendReceipt> {
        self.messages.send(text).await
    }

    /// The app returned to the foreground
    pub fn notify_foreground(&self) {
        self.chat_channel.notify_foreground();
        self.control_channel.notify_foreground();
    }

    /// Manual reconnect of both rooms
    pub fn reconnect(&self) {
        self.chat_channel.reconnect();
        self.control_channel.reconnect();
    }

    /// Leave both rooms and release everything the session started.
    pub async fn close(mut self) {
        self.chat_channel.leave();
        self.control_channel.leave();

        if let Some(playback) = self.playback.as_mut() {
            playback.shutdown().await;
        }
        self.chat_channel.shutdown().await;
        self.control_channel.shutdown().await;

        for task in self.ingest.drain(..) {
            task.abort();
        }
        info!(stream_id = %self.stream_id, "Live session closed");
    }
}

impl Drop for LiveStreamSession {
    fn drop(&mut self) {
        for task in &self.ingest {
            task.abort();
        }
    }
}

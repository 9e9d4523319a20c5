//! Channel manager actor.
//!
//! All connection state lives inside one task and changes only in response
//! to commands read from its mailbox, in arrival order. Transport callbacks,
//! timers and the poller never touch state directly: they post commands
//! tagged with the generation they were started under, and anything from a
//! superseded generation is discarded.

use super::machine::{ChannelState, Connection, Effect, Machine, Trigger};
use super::{ChannelKind, PollSource};
use crate::config::ChannelConfig;
use crate::error::{LiveError, LiveResult};
use crate::metrics::{MetricRecord, MetricsSink};
use crate::monitor::{ConnectionMonitor, Subscription};
use crate::scheduler::Scheduler;
use crate::transport::{SocketConnector, SocketFrame, SocketLink};
use resilience::{with_timeout, Backoff, CircuitBreaker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const OUTPUT_CAPACITY: usize = 256;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

const CONNECT: &str = "connect";
const READER: &str = "reader";
const RECONNECT: &str = "reconnect";
const POLLER: &str = "poller";

/// What a manager publishes to its subscribers
#[derive(Debug, Clone)]
pub enum ChannelOutput<T> {
    Event(T),
    Status(Connection),
}

pub struct ChannelDeps<T> {
    pub connector: Arc<dyn SocketConnector>,
    pub poll_source: Arc<dyn PollSource<Item = T>>,
    pub monitor: Arc<ConnectionMonitor>,
    pub metrics: MetricsSink,
}

enum Command<T> {
    Join,
    Leave,
    Reconnect,
    Foreground,
    NetworkOnline,
    Send {
        frame: String,
        reply: oneshot::Sender<LiveResult<()>>,
    },
    Shutdown,
    LinkOpened {
        generation: u64,
        link: SocketLink,
    },
    LinkFailed {
        generation: u64,
        error: LiveError,
    },
    Frame {
        generation: u64,
        text: String,
    },
    LinkClosed {
        generation: u64,
        reason: String,
    },
    ReconnectDue {
        attempt: u32,
    },
    Polled {
        generation: u64,
        items: Vec<T>,
    },
}

pub struct ChannelManager<K: ChannelKind> {
    channel_id: String,
    commands: mpsc::UnboundedSender<Command<K::Inbound>>,
    outputs: broadcast::Sender<ChannelOutput<K::Inbound>>,
    connection: watch::Receiver<Connection>,
    task: JoinHandle<()>,
    _network: Subscription,
}

impl<K: ChannelKind> ChannelManager<K> {
    pub fn spawn(kind: K, config: &ChannelConfig, deps: ChannelDeps<K::Inbound>) -> Self {
        let channel_id = kind.channel_id();
        let machine = Machine::new(
            channel_id.clone(),
            Backoff::new(config.reconnect_base, config.reconnect_cap),
            config.max_reconnect_attempts,
        );
        let (status, connection) = watch::channel(machine.connection().clone());
        let (outputs, _) = broadcast::channel(OUTPUT_CAPACITY);
        let (commands, mailbox) = mpsc::unbounded_channel();

        let network_commands = commands.clone();
        let network = deps.monitor.subscribe(move |online| {
            if online {
                let _ = network_commands.send(Command::NetworkOnline);
            }
        });

        let actor = Actor {
            breaker: CircuitBreaker::new(format!("{channel_id}-poll"), config.poll_breaker.clone()),
            channel_id: channel_id.clone(),
            kind,
            machine,
            socket_url: config.socket_url.clone(),
            connect_timeout: config.connect_timeout,
            poll_interval: config.poll_interval,
            connector: deps.connector,
            poll_source: deps.poll_source,
            metrics: deps.metrics,
            scheduler: Scheduler::new(K::NAME),
            mailbox: commands.clone(),
            outputs: outputs.clone(),
            status,
            link: None,
            link_generation: 0,
            poll_generation: 0,
        };
        let task = tokio::spawn(actor.run(mailbox));

        Self {
            channel_id,
            commands,
            outputs,
            connection,
            task,
            _network: network,
        }
    }

    fn post(&self, command: Command<K::Inbound>) {
        if self.commands.send(command).is_err() {
            debug!(channel = %self.channel_id, "Channel manager already stopped");
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn join(&self) {
        self.post(Command::Join);
    }

    /// Send the leave frame (if any), close intentionally, stop polling.
    pub fn leave(&self) {
        self.post(Command::Leave);
    }

    /// Cancel any scheduled attempt and reconnect now.
    pub fn reconnect(&self) {
        self.post(Command::Reconnect);
    }

    /// The page became visible again.
    pub fn notify_foreground(&self) {
        self.post(Command::Foreground);
    }

    pub async fn send(&self, frame: String) -> LiveResult<()> {
        self.sender().send(frame).await
    }

    pub fn sender(&self) -> ChannelSender<K> {
        ChannelSender {
            commands: self.commands.clone(),
            connection: self.connection.clone(),
        }
    }

    pub fn connection(&self) -> Connection {
        self.connection.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.borrow().state == ChannelState::Connected
    }

    pub fn watch(&self) -> watch::Receiver<Connection> {
        self.connection.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelOutput<K::Inbound>> {
        self.outputs.subscribe()
    }

    /// Dispose the manager: cancels every timer and drops the transport.
    /// Nothing it started fires afterwards.
    pub async fn shutdown(&mut self) {
        if self.task.is_finished() {
            return;
        }
        self.post(Command::Shutdown);
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!(channel = %self.channel_id, "Channel manager task failed: {}", e);
            }
        }
    }
}

impl<K: ChannelKind> Drop for ChannelManager<K> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Cheap handle for writing frames through a manager's socket.
pub struct ChannelSender<K: ChannelKind> {
    commands: mpsc::UnboundedSender<Command<K::Inbound>>,
    connection: watch::Receiver<Connection>,
}

impl<K: ChannelKind> Clone for ChannelSender<K> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<K: ChannelKind> ChannelSender<K> {
    pub fn is_connected(&self) -> bool {
        self.connection.borrow().state == ChannelState::Connected
    }

    /// Fails with [`LiveError::Closed`] unless the socket is connected.
    pub async fn send(&self, frame: String) -> LiveResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Send { frame, reply })
            .map_err(|_| LiveError::Closed)?;
        response.await.map_err(|_| LiveError::Closed)?
    }
}

struct Actor<K: ChannelKind> {
    channel_id: String,
    kind: K,
    machine: Machine,
    socket_url: String,
    connect_timeout: Duration,
    poll_interval: Duration,
    connector: Arc<dyn SocketConnector>,
    poll_source: Arc<dyn PollSource<Item = K::Inbound>>,
    breaker: CircuitBreaker,
    metrics: MetricsSink,
    scheduler: Scheduler,
    mailbox: mpsc::UnboundedSender<Command<K::Inbound>>,
    outputs: broadcast::Sender<ChannelOutput<K::Inbound>>,
    status: watch::Sender<Connection>,
    link: Option<mpsc::UnboundedSender<String>>,
    link_generation: u64,
    poll_generation: u64,
}

impl<K: ChannelKind> Actor<K> {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Command<K::Inbound>>) {
        while let Some(command) = mailbox.recv().await {
            if !self.handle(command) {
                break;
            }
        }

        self.scheduler.dispose();
        self.link = None;
        self.status.send_modify(|connection| connection.state = ChannelState::Closed);
        debug!(channel = %self.channel_id, "Channel manager disposed");
    }

    fn handle(&mut self, command: Command<K::Inbound>) -> bool {
        match command {
            Command::Join => self.apply(Trigger::Join),
            Command::Leave => self.apply(Trigger::Leave),
            Command::Reconnect => self.apply(Trigger::ManualReconnect),
            Command::Foreground => self.apply(Trigger::Foreground),
            Command::NetworkOnline => self.apply(Trigger::NetworkOnline),
            Command::ReconnectDue { attempt } => self.apply(Trigger::ReconnectDue { attempt }),
            Command::LinkOpened { generation, link } => {
                if generation != self.link_generation
                    || self.machine.state() != ChannelState::Connecting
                {
                    debug!(channel = %self.channel_id, "Discarding superseded socket");
                    return true;
                }
                let SocketLink { outbound, inbound } = link;
                self.link = Some(outbound);
                self.spawn_reader(generation, inbound);
                self.apply(Trigger::Opened);
            }
            Command::LinkFailed { generation, error } => {
                if generation == self.link_generation {
                    warn!(channel = %self.channel_id, error = %error, "Socket connect failed");
                    self.apply(Trigger::ConnectFailed {
                        reason: error.to_string(),
                    });
                }
            }
            Command::Frame { generation, text } => {
                if generation == self.link_generation {
                    match self.kind.decode(&text) {
                        Ok(event) => self.publish_event(event),
                        Err(e) => warn!(channel = %self.channel_id, error = %e, "Dropping undecodable frame"),
                    }
                }
            }
            Command::LinkClosed { generation, reason } => {
                if generation == self.link_generation {
                    warn!(channel = %self.channel_id, reason = %reason, "Socket closed unexpectedly");
                    self.link = None;
                    self.apply(Trigger::Closed { reason });
                }
            }
            Command::Polled { generation, items } => {
                if generation == self.poll_generation && self.machine.poller_active() {
                    for item in items {
                        self.publish_event(item);
                    }
                }
            }
            Command::Send { frame, reply } => {
                let result = match (&self.link, self.machine.state()) {
                    (Some(outbound), ChannelState::Connected) => {
                        outbound.send(frame).map_err(|_| LiveError::Closed)
                    }
                    _ => Err(LiveError::Closed),
                };
                let _ = reply.send(result);
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn apply(&mut self, trigger: Trigger) {
        let before = self.machine.connection().clone();
        let effects = self.machine.handle(trigger);
        for effect in effects {
            self.execute(effect);
        }

        let after = self.machine.connection().clone();
        if after != before {
            self.publish_status(&before, after);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport => self.open_transport(),
            Effect::CloseTransport => self.close_transport(),
            Effect::SendJoin => match self.kind.join_frame() {
                Ok(frame) => self.write(frame),
                Err(e) => warn!(channel = %self.channel_id, error = %e, "Failed to encode join frame"),
            },
            Effect::SendLeave => match self.kind.leave_frame() {
                Ok(Some(frame)) => self.write(frame),
                Ok(None) => {}
                Err(e) => warn!(channel = %self.channel_id, error = %e, "Failed to encode leave frame"),
            },
            Effect::StartPoller => self.start_poller(),
            Effect::StopPoller => {
                self.poll_generation += 1;
                self.scheduler.cancel(POLLER);
                info!(channel = %self.channel_id, "Polling fallback stopped");
            }
            Effect::ScheduleReconnect { attempt, delay } => {
                info!(
                    channel = %self.channel_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                let mailbox = self.mailbox.clone();
                self.scheduler.schedule(RECONNECT, delay, async move {
                    let _ = mailbox.send(Command::ReconnectDue { attempt });
                });
            }
            Effect::CancelReconnect => {
                self.scheduler.cancel(RECONNECT);
            }
        }
    }

    fn write(&self, frame: String) {
        match &self.link {
            Some(outbound) => {
                if outbound.send(frame).is_err() {
                    debug!(channel = %self.channel_id, "Socket writer already gone");
                }
            }
            None => debug!(channel = %self.channel_id, "No socket to write to"),
        }
    }

    fn open_transport(&mut self) {
        self.close_transport();
        let generation = self.link_generation;
        let connector = self.connector.clone();
        let url = self.socket_url.clone();
        let timeout = self.connect_timeout;
        let mailbox = self.mailbox.clone();

        debug!(channel = %self.channel_id, url = %url, "Opening socket");
        self.scheduler.spawn(CONNECT, async move {
            let command = match with_timeout(timeout, connector.connect(&url)).await {
                Ok(Ok(link)) => Command::LinkOpened { generation, link },
                Ok(Err(error)) => Command::LinkFailed { generation, error },
                Err(elapsed) => Command::LinkFailed {
                    generation,
                    error: elapsed.into(),
                },
            };
            let _ = mailbox.send(command);
        });
    }

    fn close_transport(&mut self) {
        self.link_generation += 1;
        // Dropping the sender lets the writer flush queued frames, then close
        self.link = None;
        self.scheduler.cancel(READER);
        self.scheduler.cancel(CONNECT);
    }

    fn spawn_reader(&mut self, generation: u64, mut inbound: mpsc::UnboundedReceiver<SocketFrame>) {
        let mailbox = self.mailbox.clone();
        self.scheduler.spawn(READER, async move {
            let reason = loop {
                match inbound.recv().await {
                    Some(SocketFrame::Text(text)) => {
                        if mailbox.send(Command::Frame { generation, text }).is_err() {
                            return;
                        }
                    }
                    Some(SocketFrame::Closed(reason)) => {
                        break reason.unwrap_or_else(|| "closed by server".to_string())
                    }
                    None => break "transport ended".to_string(),
                }
            };
            let _ = mailbox.send(Command::LinkClosed { generation, reason });
        });
    }

    fn start_poller(&mut self) {
        self.poll_generation += 1;
        let generation = self.poll_generation;
        let source = self.poll_source.clone();
        let breaker = self.breaker.clone();
        let mailbox = self.mailbox.clone();
        let every = self.poll_interval.max(MIN_POLL_INTERVAL);
        let channel = self.channel_id.clone();

        info!(channel = %channel, "Polling fallback engaged");
        self.scheduler.spawn(POLLER, async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match breaker.call(|| source.poll()).await {
                    Ok(items) => {
                        if mailbox.send(Command::Polled { generation, items }).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.is_open() => {
                        debug!(channel = %channel, "Poll skipped, fallback circuit open")
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "Poll failed"),
                }
            }
        });
    }

    fn publish_event(&self, event: K::Inbound) {
        // No subscribers is fine
        let _ = self.outputs.send(ChannelOutput::Event(event));
    }

    fn publish_status(&self, before: &Connection, after: Connection) {
        if before.state != after.state || before.mode != after.mode {
            info!(
                channel = %after.channel_id,
                from = before.state.as_str(),
                to = after.state.as_str(),
                attempts = after.reconnect_attempts,
                "Channel state changed"
            );
            self.metrics
                .record(MetricRecord::channel_status(K::NAME, &after));
        }
        self.status.send_replace(after.clone());
        let _ = self.outputs.send(ChannelOutput::Status(after));
    }
}

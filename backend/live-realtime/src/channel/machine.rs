//! Connection lifecycle as an explicit `(state, trigger) -> (state, effects)`
//! table. Pure: no transport, no timers. The manager executes the effects.

use resilience::Backoff;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    /// Reconnect attempts exhausted; the poller stays engaged
    Failed,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Disconnected => "disconnected",
            ChannelState::Failed => "failed",
            ChannelState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Socket,
    Polling,
}

/// Snapshot of one channel's connection, owned by its manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub channel_id: String,
    pub mode: ChannelMode,
    pub state: ChannelState,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Join,
    Opened,
    /// Non-intentional transport close
    Closed { reason: String },
    ConnectFailed { reason: String },
    ReconnectDue { attempt: u32 },
    ManualReconnect,
    Foreground,
    NetworkOnline,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    SendJoin,
    SendLeave,
    StartPoller,
    StopPoller,
    ScheduleReconnect { attempt: u32, delay: Duration },
    CancelReconnect,
}

#[derive(Debug, Clone)]
pub struct Machine {
    connection: Connection,
    backoff: Backoff,
    max_attempts: u32,
}

impl Machine {
    pub fn new(channel_id: impl Into<String>, backoff: Backoff, max_attempts: u32) -> Self {
        Self {
            connection: Connection {
                channel_id: channel_id.into(),
                mode: ChannelMode::Socket,
                state: ChannelState::Idle,
                reconnect_attempts: 0,
                last_error: None,
            },
            backoff,
            max_attempts,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> ChannelState {
        self.connection.state
    }

    pub fn poller_active(&self) -> bool {
        self.connection.mode == ChannelMode::Polling
    }

    pub fn handle(&mut self, trigger: Trigger) -> Vec<Effect> {
        use ChannelState::*;

        let mut effects = Vec::new();
        match (self.connection.state, trigger) {
            (Idle | Closed, Trigger::Join) => {
                self.connection.reconnect_attempts = 0;
                self.connection.last_error = None;
                self.connection.state = Connecting;
                effects.push(Effect::OpenTransport);
            }

            (Connecting, Trigger::Opened) => {
                self.connection.state = Connected;
                self.connection.reconnect_attempts = 0;
                self.connection.last_error = None;
                effects.push(Effect::CancelReconnect);
                effects.push(Effect::SendJoin);
                if self.poller_active() {
                    self.connection.mode = ChannelMode::Socket;
                    effects.push(Effect::StopPoller);
                }
            }

            (Connecting, Trigger::ConnectFailed { reason } | Trigger::Closed { reason })
            | (Connected, Trigger::Closed { reason }) => {
                self.connection.state = Disconnected;
                self.connection.last_error = Some(reason);
                effects.push(Effect::CloseTransport);
                if !self.poller_active() {
                    self.connection.mode = ChannelMode::Polling;
                    effects.push(Effect::StartPoller);
                }
                self.schedule_next(&mut effects);
            }

            (Disconnected, Trigger::ReconnectDue { attempt })
                if attempt == self.connection.reconnect_attempts =>
            {
                self.connection.state = Connecting;
                effects.push(Effect::OpenTransport);
            }

            (Disconnected | Failed, Trigger::ManualReconnect) => {
                self.connection.reconnect_attempts = 0;
                self.connection.state = Connecting;
                effects.push(Effect::CancelReconnect);
                effects.push(Effect::OpenTransport);
            }

            (Disconnected | Failed, Trigger::Foreground | Trigger::NetworkOnline) => {
                if self.connection.state == Failed {
                    self.connection.reconnect_attempts = 0;
                }
                self.connection.state = Connecting;
                effects.push(Effect::CancelReconnect);
                effects.push(Effect::OpenTransport);
            }

            (Idle, Trigger::Leave) => {
                self.connection.state = Closed;
            }

            (Connecting | Connected | Disconnected | Failed, Trigger::Leave) => {
                let was_connected = self.connection.state == Connected;
                self.connection.state = Closed;
                effects.push(Effect::CancelReconnect);
                if self.poller_active() {
                    self.connection.mode = ChannelMode::Socket;
                    effects.push(Effect::StopPoller);
                }
                if was_connected {
                    effects.push(Effect::SendLeave);
                }
                effects.push(Effect::CloseTransport);
            }

            // Stale timers, duplicate requests, or events after close
            _ => {}
        }

        effects
    }

    fn schedule_next(&mut self, effects: &mut Vec<Effect>) {
        if self.connection.reconnect_attempts >= self.max_attempts {
            self.connection.state = ChannelState::Failed;
            return;
        }
        self.connection.reconnect_attempts += 1;
        let attempt = self.connection.reconnect_attempts;
        effects.push(Effect::ScheduleReconnect {
            attempt,
            delay: self.backoff.delay_for_attempt(attempt),
        });
    }
}

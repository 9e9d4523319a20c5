//! Dual-channel connection management: persistent socket plus HTTP-poll
//! fallback, one manager per logical room.

pub mod machine;
pub mod manager;

pub use machine::{ChannelMode, ChannelState, Connection, Effect, Machine, Trigger};
pub use manager::{ChannelDeps, ChannelManager, ChannelOutput, ChannelSender};

use crate::error::LiveResult;
use crate::protocol::{self, ChatClientFrame, ChatServerFrame, ControlClientFrame, ControlServerFrame};
use async_trait::async_trait;
use std::fmt;

/// What differs between the chat and control rooms: join/leave frames and
/// the inbound event type.
pub trait ChannelKind: Send + Sync + 'static {
    type Inbound: Clone + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;

    fn channel_id(&self) -> String;
    fn join_frame(&self) -> LiveResult<String>;
    fn leave_frame(&self) -> LiveResult<Option<String>>;
    fn decode(&self, text: &str) -> LiveResult<Self::Inbound>;
}

/// Periodic HTTP fetch used while the socket is down.
#[async_trait]
pub trait PollSource: Send + Sync {
    type Item: Send;

    async fn poll(&self) -> LiveResult<Vec<Self::Item>>;
}

#[derive(Debug, Clone)]
pub struct ChatChannel {
    room: String,
}

impl ChatChannel {
    pub fn new(room: impl Into<String>) -> Self {
        Self { room: room.into() }
    }

    pub fn room(&self) -> &str {
        &self.room
    }
}

impl ChannelKind for ChatChannel {
    type Inbound = ChatServerFrame;

    const NAME: &'static str = "chat";

    fn channel_id(&self) -> String {
        format!("chat:{}", self.room)
    }

    fn join_frame(&self) -> LiveResult<String> {
        protocol::encode(&ChatClientFrame::Join {
            room: self.room.clone(),
        })
    }

    fn leave_frame(&self) -> LiveResult<Option<String>> {
        protocol::encode(&ChatClientFrame::Leave).map(Some)
    }

    fn decode(&self, text: &str) -> LiveResult<ChatServerFrame> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone)]
pub struct ControlChannel {
    stream_id: String,
}

impl ControlChannel {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
        }
    }
}

impl ChannelKind for ControlChannel {
    type Inbound = ControlServerFrame;

    const NAME: &'static str = "control";

    fn channel_id(&self) -> String {
        format!("control:{}", self.stream_id)
    }

    fn join_frame(&self) -> LiveResult<String> {
        protocol::encode(&ControlClientFrame::JoinControl {
            stream_id: self.stream_id.clone(),
        })
    }

    // The control room has no leave frame; closing the socket suffices
    fn leave_frame(&self) -> LiveResult<Option<String>> {
        Ok(None)
    }

    fn decode(&self, text: &str) -> LiveResult<ControlServerFrame> {
        Ok(serde_json::from_str(text)?)
    }
}

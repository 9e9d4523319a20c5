use crate::protocol::{Role, WireHealth, WireMessage, WireTip, WireUser};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

impl From<WireUser> for Author {
    fn from(user: WireUser) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            role: user.role,
        }
    }
}

/// Delivery phase of a chat line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    /// Sent over the socket, awaiting the server echo
    Pending {
        temp_id: String,
        correlation_id: String,
    },
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub author: Author,
    pub body: String,
    /// Epoch seconds
    pub sent_at: i64,
    pub pinned: bool,
    pub deleted: bool,
    pub delivery: Delivery,
}

impl Message {
    pub fn pending(author: Author, body: String, sent_at: i64, correlation_id: String) -> Self {
        let temp_id = format!("tmp-{correlation_id}");
        Self {
            id: temp_id.clone(),
            author,
            body,
            sent_at,
            pinned: false,
            deleted: false,
            delivery: Delivery::Pending {
                temp_id,
                correlation_id,
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match &self.delivery {
            Delivery::Pending { correlation_id, .. } => Some(correlation_id),
            Delivery::Confirmed => None,
        }
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: wire.id,
            author: wire.user.into(),
            body: wire.text,
            sent_at: wire.ts,
            pinned: false,
            deleted: false,
            delivery: Delivery::Confirmed,
        }
    }
}

/// Ephemeral tip animation event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TipEvent {
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub actor: String,
    pub message: Option<String>,
    pub stream_id: String,
}

impl From<WireTip> for TipEvent {
    fn from(tip: WireTip) -> Self {
        Self {
            id: tip.id,
            amount: tip.amount,
            currency: tip.currency,
            actor: tip.actor,
            message: tip.message,
            stream_id: tip.stream_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSample {
    pub viewer_count: u64,
    pub bitrate_kbps: f64,
    pub fps: f64,
    pub drop_rate_percent: f64,
    pub sampled_at_ms: i64,
}

impl From<WireHealth> for HealthSample {
    fn from(health: WireHealth) -> Self {
        Self {
            viewer_count: health.viewer_count,
            bitrate_kbps: health.bitrate_kbps,
            fps: health.fps,
            drop_rate_percent: health.drop_rate,
            sampled_at_ms: health.timestamp,
        }
    }
}

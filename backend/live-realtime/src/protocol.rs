//! Socket wire protocol: JSON text frames tagged by `type`.

use crate::error::LiveResult;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(id) => id,
            RawId::Int(id) => id.to_string(),
        }
    }
}

/// Accept ids sent either as strings or as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(RawId::into_string)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(RawId::into_string))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Moderator,
    Creator,
    /// Anything unrecognised is treated as a plain viewer
    #[default]
    #[serde(other)]
    Viewer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireUser {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(alias = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub user: WireUser,
    pub text: String,
    /// Epoch seconds
    pub ts: i64,
    /// Echo of the sender's correlation id, when the server supports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

// ============================================================
// Chat channel
// ============================================================

/// Client → server chat frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatClientFrame {
    Join {
        room: String,
    },
    Message {
        room: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
    Leave,
}

/// Server → client chat frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatServerFrame {
    Message(WireMessage),
    /// `id: null` clears the pin
    Pinned {
        #[serde(default, deserialize_with = "optional_string_or_number")]
        id: Option<String>,
    },
    SlowMode {
        seconds: u64,
    },
    Viewers {
        count: u64,
    },
    /// Moderation removal decided upstream
    Deleted {
        #[serde(deserialize_with = "string_or_number")]
        id: String,
    },
}

// ============================================================
// Control channel
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlClientFrame {
    JoinControl {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireHealth {
    pub viewer_count: u64,
    pub bitrate_kbps: f64,
    pub fps: f64,
    /// Percent of dropped frames
    pub drop_rate: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTip {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub amount: f64,
    pub currency: String,
    pub actor: String,
    #[serde(default)]
    pub message: Option<String>,
    pub stream_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlServerFrame {
    Health(WireHealth),
    Viewers { count: u64 },
    Tip(WireTip),
}

pub fn encode<T: Serialize>(frame: &T) -> LiveResult<String> {
    Ok(serde_json::to_string(frame)?)
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NotifyError, Result};
use crate::models::notification::{Notification, UnreadCount};

/// Frames the backend pushes over `/ws/notifications`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Notification(Notification),
    UnreadCount(u64),
    FridgeUpdate(Value),
    Pong,
}

/// Frames this client sends.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl ServerFrame {
    /// Decodes a `{type, payload}` text frame. Unknown `type` tags are reported
    /// as [`NotifyError::UnknownFrame`] so the caller can drop them.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;

        match raw.kind.as_str() {
            "notification" => Ok(ServerFrame::Notification(serde_json::from_value(raw.payload)?)),
            "unread_count" => {
                let count: UnreadCount = serde_json::from_value(raw.payload)?;
                Ok(ServerFrame::UnreadCount(count.count))
            }
            "fridge_update" => Ok(ServerFrame::FridgeUpdate(raw.payload)),
            "pong" => Ok(ServerFrame::Pong),
            _ => Err(NotifyError::UnknownFrame(raw.kind)),
        }
    }
}

impl ClientFrame {
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::types::{Group, Permission};

/// Client-initiated close. Never triggers a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Reported when the socket went away without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Default application close code for a rejected token (configurable).
pub const CLOSE_AUTH_REJECTED: u16 = 4001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Added,
    Removed,
    Updated,
}

/// Inbound messages from the permission event endpoint, tagged by `type`.
///
/// Payload fields are optional hints: a field of the wrong shape decodes as
/// `None` instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionSuccess {
        #[serde(default, deserialize_with = "lenient")]
        message: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        user_id: Option<i64>,
    },
    PermissionUpdate {
        #[serde(default, deserialize_with = "lenient")]
        action: Option<PermissionAction>,
        #[serde(default, deserialize_with = "lenient")]
        message: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        user_id: Option<i64>,
        #[serde(default, deserialize_with = "lenient")]
        timestamp: Option<String>,
    },
    UserPermissionChange {
        #[serde(default, deserialize_with = "lenient")]
        user_id: Option<i64>,
        #[serde(default, deserialize_with = "lenient")]
        action: Option<PermissionAction>,
        #[serde(default, deserialize_with = "lenient")]
        permissions: Option<Vec<Permission>>,
        #[serde(default, deserialize_with = "lenient")]
        groups: Option<Vec<Group>>,
        #[serde(default, deserialize_with = "lenient")]
        timestamp: Option<String>,
    },
    Pong {
        #[serde(default, deserialize_with = "lenient")]
        timestamp: Option<String>,
    },
    PermissionsData {
        #[serde(default, deserialize_with = "lenient")]
        permissions: Option<Vec<Permission>>,
        #[serde(default, deserialize_with = "lenient")]
        groups: Option<Vec<Group>>,
    },
    Error {
        #[serde(default, deserialize_with = "lenient")]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Decode a field, or `None` if it is absent or malformed
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Result of decoding one text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(ServerMessage),
    /// Well-formed envelope with a `type` this client does not handle
    Unrecognized(String),
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Inbound, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match serde_json::from_value::<ServerMessage>(value)? {
            ServerMessage::Unknown => Ok(Inbound::Unrecognized(kind)),
            message => Ok(Inbound::Message(message)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionSuccess { .. } => "connection_success",
            ServerMessage::PermissionUpdate { .. } => "permission_update",
            ServerMessage::UserPermissionChange { .. } => "user_permission_change",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::PermissionsData { .. } => "permissions_data",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// Outbound messages. Only the heartbeat is ever sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands accepted from a client once its connection is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Help,
    List,
    Join {
        room_name: RoomName,
    },
    Part {
        room_name: RoomName,
    },
    Message {
        room_name: RoomName,
        body: String,
    },
    /// Never stored; relayed to the room for bots to pick up
    Custom {
        room_name: RoomName,
        command: String,
        payload: String,
    },
}

const KNOWN_COMMANDS: &[&str] = &["help", "list", "join", "part", "message", "custom"];

/// Why an inbound frame could not be turned into a `ClientMessage`
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not a JSON object of the expected shape")]
    InvalidFormat,

    #[error("unsupported command: {0}")]
    UnsupportedCommand(Value),
}

impl ProtocolError {
    pub fn notice(&self) -> ServerMessage {
        match self {
            ProtocolError::InvalidFormat => ServerMessage::Error(ErrorNotice::InvalidFormat),
            ProtocolError::UnsupportedCommand(details) => {
                ServerMessage::Error(ErrorNotice::UnsupportedCommand {
                    details: details.clone(),
                })
            }
        }
    }
}

impl ClientMessage {
    /// Decode a text frame. Anything that is not an object, or a known command
    /// with missing/mistyped fields, is `InvalidFormat`; an object whose `type`
    /// is not a known command is `UnsupportedCommand` echoing that value.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidFormat)?;
        let Some(object) = value.as_object() else {
            return Err(ProtocolError::InvalidFormat);
        };

        let kind = object.get("type").cloned().unwrap_or(Value::Null);
        match kind.as_str() {
            Some(name) if KNOWN_COMMANDS.contains(&name) => {
                serde_json::from_value(value).map_err(|_| ProtocolError::InvalidFormat)
            }
            _ => Err(ProtocolError::UnsupportedCommand(kind)),
        }
    }
}

/// Everything the server sends, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "notification")]
    Notification(Notification),
    #[serde(rename = "error")]
    Error(ErrorNotice),
    #[serde(rename = "room:notification")]
    Room(RoomNotification),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum Notification {
    ApiMotd { content: String },
    Help { help: String },
    List { list: Vec<RoomSummary> },
    LoggedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "code")]
pub enum ErrorNotice {
    #[serde(rename = "not-authenticated")]
    NotAuthenticated,
    #[serde(rename = "already-chatting")]
    AlreadyChatting,
    #[serde(rename = "invalid-format")]
    InvalidFormat,
    #[serde(rename = "unsupported-command")]
    UnsupportedCommand { details: Value },
    #[serde(rename = "room:invalid")]
    RoomInvalid { name: RoomName },
    #[serde(rename = "room:already-joined")]
    AlreadyJoined { name: RoomName },
    #[serde(rename = "room:not-joined")]
    NotJoined { name: RoomName },
    #[serde(rename = "room:empty-message")]
    EmptyMessage { name: RoomName },
    #[serde(rename = "room:empty-custom")]
    EmptyCustom { name: RoomName },
    #[serde(rename = "store-unavailable")]
    StoreUnavailable { name: RoomName },
}

/// Room-scoped events. `you` is computed per recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum RoomNotification {
    Joined(Presence),
    Parted(Presence),
    Message {
        you: bool,
        user: String,
        room_name: RoomName,
        body: String,
        stamp: String,
    },
    Custom {
        you: bool,
        user: String,
        room_name: RoomName,
        command: String,
        payload: String,
        stamp: String,
    },
    /// Member snapshot sent to a connection right after it joins
    Users {
        room_name: RoomName,
        users: Vec<String>,
    },
    /// History replay, oldest first
    Messages {
        room_name: RoomName,
        messages: Vec<HistoryEntry>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Presence {
    pub you: bool,
    pub user: String,
    pub room_name: RoomName,
    pub stamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub stamp: String,
    pub user: String,
    pub room_name: RoomName,
    pub body: String,
    pub you: bool,
}

impl HistoryEntry {
    pub fn from_stored(message: &StoredMessage, viewer: &Identity) -> Self {
        Self {
            stamp: format_stamp(message.created_on),
            user: message.author.username.clone(),
            room_name: message.room_name.clone(),
            body: message.body.clone(),
            you: message.author.id == viewer.id,
        }
    }
}

pub const MOTD: &str = "Welcome to finchat!\n\nIf you see this message, this means you're using an API \
instead of the given UI. Send a {\"type\": \"help\"} message for details about this server's commands";

pub const HELP: &str = r#"
This help is only meaningful if you're using the API directly instead of through the given UI.

The following list of commands are allowed in this server:
- {"type": "help"}
  - Display this help again.
- {"type": "list"}
  - List all the available rooms in this server, telling which ones you joined.
- {"type": "join", "room_name": "making_friends"}
  - Joins the "making_friends" room. The room must exist.
  - You receive the room members and its last messages.
- {"type": "part", "room_name": "making_friends"}
  - Leaves the "making_friends" room.
- {"type": "message", "room_name": "making_friends", "body": "Hello everyone!"}
  - Sends "Hello everyone!" to the "making_friends" room.
  - You must be already joined in the room.
- {"type": "custom", "room_name": "making_friends", "command": "stock", "payload": "aapl.us"}
  - Relays a command to everyone in the room (bots included). It is not stored.
"#;

impl ServerMessage {
    pub fn motd() -> Self {
        ServerMessage::Notification(Notification::ApiMotd {
            content: MOTD.to_string(),
        })
    }

    pub fn help() -> Self {
        ServerMessage::Notification(Notification::Help {
            help: HELP.to_string(),
        })
    }

    pub fn logged_out() -> Self {
        ServerMessage::Notification(Notification::LoggedOut)
    }
}

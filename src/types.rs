use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type UserId = String;
pub type ConnectionId = String;
pub type RoomName = String;
pub type MessageId = u64;

/// Maximum length of a room name
pub const MAX_ROOM_NAME_CHARS: usize = 50;
/// Message bodies are cut to this many characters before being stored
pub const MAX_MESSAGE_CHARS: usize = 512;
/// How many messages are replayed to a connection joining a room
pub const HISTORY_LIMIT: usize = 50;

const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An authenticated principal, as resolved by the token authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
}

impl Identity {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub name: RoomName,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// A message as persisted by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_name: RoomName,
    pub author: Identity,
    pub body: String,
    pub created_on: DateTime<Utc>,
}

/// Room listing entry: name plus whether the asking connection is a member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSummary {
    pub name: RoomName,
    pub joined: bool,
}

/// Check a room name against the identifier grammar: a leading letter, then
/// letters/digits/underscores, with single hyphens separating segments.
pub fn is_valid_room_name(name: &str) -> bool {
    if name.is_empty() || name.chars().count() > MAX_ROOM_NAME_CHARS {
        return false;
    }

    let mut segments = name.split('-');
    let Some(head) = segments.next() else {
        return false;
    };

    let mut head_chars = head.chars();
    if !head_chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    if !head_chars.all(is_word_char) {
        return false;
    }

    segments.all(|segment| !segment.is_empty() && segment.chars().all(is_word_char))
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Cut a body down to `MAX_MESSAGE_CHARS` characters (not bytes)
pub fn bound_message(body: &str) -> String {
    body.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Wire format used for every timestamp sent to clients
pub fn format_stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

pub fn stamp_now() -> String {
    format_stamp(Utc::now())
}

//! Persistent store adapter
//!
//! The chat core only needs room existence checks, message append and recent
//! history. The store itself is an external collaborator; `MemoryStore` is the
//! bundled implementation, optionally snapshotted to a JSON file.

mod memory;
pub mod snapshot;

use async_trait::async_trait;

use crate::types::*;

pub use memory::MemoryStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room does not exist: {0}")]
    RoomNotFound(RoomName),

    #[error("room already exists: {0}")]
    RoomExists(RoomName),

    #[error("room still has messages: {0}")]
    RoomInUse(RoomName),

    #[error("invalid room name: {0:?}")]
    InvalidRoomName(String),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("snapshot rejected: {0}")]
    InvalidSnapshot(String),
}

/// Operations the chat core consumes from the persistent store
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn room_exists(&self, name: &str) -> StoreResult<bool>;

    /// Append a message to a room's log, returning it with its creation time
    async fn append_message(
        &self,
        room_name: &str,
        author: &Identity,
        body: &str,
    ) -> StoreResult<StoredMessage>;

    /// Most recent messages of a room, most recent first
    async fn recent_messages(&self, room_name: &str, limit: usize)
        -> StoreResult<Vec<StoredMessage>>;

    /// Room names, ascending
    async fn list_rooms(&self) -> StoreResult<Vec<RoomName>>;

    async fn create_room(&self, name: &str) -> StoreResult<Room>;

    async fn delete_room(&self, name: &str) -> StoreResult<()>;
}

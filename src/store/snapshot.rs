//! On-disk snapshot of the store.
//!
//! Rooms and the message log are written as a single JSON document after every
//! mutation so a restart picks up where the previous process left off.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Schema version for snapshot format compatibility
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema_version: u32,
    /// Export timestamp (ISO8601)
    pub exported_at: String,
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

impl StoreSnapshot {
    pub fn new(rooms: Vec<Room>, messages: Vec<StoredMessage>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            rooms,
            messages,
        }
    }

    /// Validate the snapshot before loading it
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(format!(
                "Snapshot schema version {} is newer than supported version {}",
                self.schema_version, SNAPSHOT_SCHEMA_VERSION
            ));
        }

        let mut names = HashSet::new();
        for room in &self.rooms {
            if !is_valid_room_name(&room.name) {
                return Err(format!("Room name '{}' is not a valid identifier", room.name));
            }
            if !names.insert(room.name.as_str()) {
                return Err(format!("Room '{}' appears twice", room.name));
            }
        }

        for message in &self.messages {
            if !names.contains(message.room_name.as_str()) {
                return Err(format!(
                    "Message {} references room '{}' which doesn't exist",
                    message.id, message.room_name
                ));
            }
        }

        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Self, super::StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: StoreSnapshot = serde_json::from_str(&raw)?;
        snapshot
            .validate()
            .map_err(super::StoreError::InvalidSnapshot)?;
        Ok(snapshot)
    }

    /// Write through a sibling temp file so a crash never leaves half a snapshot
    pub async fn write(&self, path: &Path) -> Result<(), super::StoreError> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

//! Room registry: which live connections are in which room.
//!
//! Each room has its own lock, so joins, parts and fanout in one room never
//! wait on another room. Entries for rooms that emptied out are kept; there is
//! at most one per room the store knows about.

use super::connection::ConnectionHandle;
use crate::store::{MessageStore, StoreResult};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub(crate) type Members = HashMap<ConnectionId, Arc<ConnectionHandle>>;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomName, Arc<Mutex<Members>>>>,
    store: Arc<dyn MessageStore>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            store,
        }
    }

    async fn entry(&self, room_name: &str) -> Arc<Mutex<Members>> {
        if let Some(members) = self.rooms.read().await.get(room_name) {
            return members.clone();
        }
        self.rooms
            .write()
            .await
            .entry(room_name.to_string())
            .or_default()
            .clone()
    }

    async fn existing(&self, room_name: &str) -> Option<Arc<Mutex<Members>>> {
        self.rooms.read().await.get(room_name).cloned()
    }

    /// Returns false if the connection was already registered in the room
    pub async fn add(&self, room_name: &str, conn: Arc<ConnectionHandle>) -> bool {
        let members = self.entry(room_name).await;
        let mut members = members.lock().await;
        members.insert(conn.id().clone(), conn).is_none()
    }

    /// Returns false if the connection wasn't registered in the room
    pub async fn remove(&self, room_name: &str, conn_id: &str) -> bool {
        match self.existing(room_name).await {
            Some(members) => members.lock().await.remove(conn_id).is_some(),
            None => false,
        }
    }

    /// Snapshot of the room's members at the time of the call
    pub async fn members(&self, room_name: &str) -> Vec<Arc<ConnectionHandle>> {
        match self.existing(room_name).await {
            Some(members) => members.lock().await.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Usernames of the room's members, ascending
    pub async fn usernames(&self, room_name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .members(room_name)
            .await
            .iter()
            .map(|conn| conn.username().to_string())
            .collect();
        names.sort();
        names
    }

    /// Run `f` on every member while holding the room's lock, so two fanouts
    /// into the same room reach every member in the same order.
    pub(crate) async fn for_each_member<F>(&self, room_name: &str, mut f: F)
    where
        F: FnMut(&Arc<ConnectionHandle>),
    {
        if let Some(members) = self.existing(room_name).await {
            for conn in members.lock().await.values() {
                f(conn);
            }
        }
    }

    pub async fn exists(&self, room_name: &str) -> StoreResult<bool> {
        self.store.room_exists(room_name).await
    }

    /// Every room known to the store, ascending by name, flagged with whether
    /// `conn` is currently a member
    pub async fn all_rooms(&self, conn: &ConnectionHandle) -> StoreResult<Vec<RoomSummary>> {
        let mut names = self.store.list_rooms().await?;
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| RoomSummary {
                joined: conn.is_member(&name),
                name,
            })
            .collect())
    }
}

//! Session directory: at most one live connection per identity.

use super::connection::ConnectionHandle;
use crate::types::*;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("user {0} already has a live connection")]
pub struct AlreadyActive(pub UserId);

#[derive(Default)]
pub struct SessionDirectory {
    users: RwLock<HashMap<UserId, Arc<ConnectionHandle>>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for its identity. Check and insert happen under
    /// one write lock, so of two racing connections exactly one wins.
    pub async fn register(&self, conn: Arc<ConnectionHandle>) -> Result<(), AlreadyActive> {
        let user_id = conn.identity().id.clone();
        match self.users.write().await.entry(user_id) {
            Entry::Occupied(entry) => Err(AlreadyActive(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(conn);
                Ok(())
            }
        }
    }

    /// Remove the identity's entry, but only if it still points at `conn_id`
    pub async fn unregister(&self, user_id: &str, conn_id: &str) -> bool {
        let mut users = self.users.write().await;
        match users.get(user_id) {
            Some(conn) if conn.id() == conn_id => {
                users.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.users.read().await.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

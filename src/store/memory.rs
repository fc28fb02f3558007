use super::snapshot::StoreSnapshot;
use super::*;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[derive(Default, Clone)]
struct Inner {
    rooms: BTreeMap<RoomName, Room>,
    messages: Vec<StoredMessage>,
    next_id: MessageId,
}

impl Inner {
    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::new(self.rooms.values().cloned().collect(), self.messages.clone())
    }
}

/// In-process store with an optional JSON snapshot file
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`, loading it when the file exists
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut inner = Inner::default();

        if tokio::fs::try_exists(&path).await? {
            let snapshot = StoreSnapshot::read(&path).await?;
            inner.next_id = snapshot.messages.iter().map(|m| m.id).max().unwrap_or(0);
            inner.rooms = snapshot
                .rooms
                .into_iter()
                .map(|room| (room.name.clone(), room))
                .collect();
            inner.messages = snapshot.messages;
            tracing::info!(
                "Loaded store snapshot from {}: {} rooms, {} messages",
                path.display(),
                inner.rooms.len(),
                inner.messages.len()
            );
        } else {
            tracing::info!("No store snapshot at {}, starting empty", path.display());
        }

        Ok(Self {
            inner: RwLock::new(inner),
            path: Some(path),
        })
    }

    /// Create every room in `names` that doesn't exist yet
    pub async fn ensure_rooms<I, S>(&self, names: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            match self.create_room(name.as_ref()).await {
                Ok(_) | Err(StoreError::RoomExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Apply `change` and persist the result. With a snapshot file the change
    /// is staged on a copy that only becomes current once the write succeeded,
    /// so a failed write leaves the store exactly as it was.
    async fn commit<T, F>(&self, inner: &mut Inner, change: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Inner) -> StoreResult<T>,
    {
        let Some(path) = &self.path else {
            return change(inner);
        };

        let mut staged = inner.clone();
        let result = change(&mut staged)?;
        staged.snapshot().write(path).await?;
        *inner = staged;
        Ok(result)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn room_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.inner.read().await.rooms.contains_key(name))
    }

    async fn append_message(
        &self,
        room_name: &str,
        author: &Identity,
        body: &str,
    ) -> StoreResult<StoredMessage> {
        let mut inner = self.inner.write().await;
        self.commit(&mut inner, |inner| {
            let now = Utc::now();
            let room = inner
                .rooms
                .get_mut(room_name)
                .ok_or_else(|| StoreError::RoomNotFound(room_name.to_string()))?;
            room.updated_on = now;

            inner.next_id += 1;
            let message = StoredMessage {
                id: inner.next_id,
                room_name: room_name.to_string(),
                author: author.clone(),
                body: bound_message(body),
                created_on: now,
            };
            inner.messages.push(message.clone());
            Ok(message)
        })
        .await
    }

    async fn recent_messages(
        &self,
        room_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<StoredMessage>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.room_name == room_name)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_rooms(&self) -> StoreResult<Vec<RoomName>> {
        Ok(self.inner.read().await.rooms.keys().cloned().collect())
    }

    async fn create_room(&self, name: &str) -> StoreResult<Room> {
        if !is_valid_room_name(name) {
            return Err(StoreError::InvalidRoomName(name.to_string()));
        }

        let mut inner = self.inner.write().await;
        let room = self
            .commit(&mut inner, |inner| {
                if inner.rooms.contains_key(name) {
                    return Err(StoreError::RoomExists(name.to_string()));
                }
                let now = Utc::now();
                let room = Room {
                    name: name.to_string(),
                    created_on: now,
                    updated_on: now,
                };
                inner.rooms.insert(room.name.clone(), room.clone());
                Ok(room)
            })
            .await?;

        tracing::info!("Room created: {}", name);
        Ok(room)
    }

    /// Message history is append-only, so a room that has any is kept.
    async fn delete_room(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        self.commit(&mut inner, |inner| {
            if !inner.rooms.contains_key(name) {
                return Err(StoreError::RoomNotFound(name.to_string()));
            }
            if inner.messages.iter().any(|m| m.room_name == name) {
                return Err(StoreError::RoomInUse(name.to_string()));
            }
            inner.rooms.remove(name);
            Ok(())
        })
        .await?;

        tracing::info!("Room deleted: {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new("1", "alice")
    }

    #[tokio::test]
    async fn test_rooms_listed_by_name() {
        let store = MemoryStore::new();
        store.ensure_rooms(["work", "family", "a-team"]).await.unwrap();
        // Creating twice is fine through ensure_rooms
        store.ensure_rooms(["family"]).await.unwrap();

        assert_eq!(
            store.list_rooms().await.unwrap(),
            vec!["a-team", "family", "work"]
        );
        assert!(store.room_exists("family").await.unwrap());
        assert!(!store.room_exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_room_validates() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.create_room("9lives").await,
            Err(StoreError::InvalidRoomName(_))
        ));
        store.create_room("family").await.unwrap();
        assert!(matches!(
            store.create_room("family").await,
            Err(StoreError::RoomExists(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_messages_per_room_most_recent_first() {
        let store = MemoryStore::new();
        store.ensure_rooms(["family", "work"]).await.unwrap();

        for i in 0..5 {
            store
                .append_message("family", &alice(), &format!("family {}", i))
                .await
                .unwrap();
            store
                .append_message("work", &alice(), &format!("work {}", i))
                .await
                .unwrap();
        }

        let recent = store.recent_messages("family", 3).await.unwrap();
        let bodies: Vec<_> = recent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["family 4", "family 3", "family 2"]);
    }

    #[tokio::test]
    async fn test_append_bounds_body_and_requires_room() {
        let store = MemoryStore::new();
        store.create_room("family").await.unwrap();

        let message = store
            .append_message("family", &alice(), &"x".repeat(600))
            .await
            .unwrap();
        assert_eq!(message.body.chars().count(), MAX_MESSAGE_CHARS);

        assert!(matches!(
            store.append_message("nope", &alice(), "hi").await,
            Err(StoreError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_room_keeps_history() {
        let store = MemoryStore::new();
        store.ensure_rooms(["family", "work"]).await.unwrap();
        store.append_message("family", &alice(), "hi").await.unwrap();

        assert!(matches!(
            store.delete_room("family").await,
            Err(StoreError::RoomInUse(_))
        ));
        assert!(store.room_exists("family").await.unwrap());
        assert_eq!(store.recent_messages("family", 50).await.unwrap().len(), 1);

        store.delete_room("work").await.unwrap();
        assert!(!store.room_exists("work").await.unwrap());
        assert!(matches!(
            store.delete_room("work").await,
            Err(StoreError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("data");
        std::fs::create_dir(&sub).unwrap();

        let store = MemoryStore::open(sub.join("finchat.json")).await.unwrap();
        store.ensure_rooms(["family", "work"]).await.unwrap();
        store.append_message("family", &alice(), "kept").await.unwrap();
        let before = store.list_rooms().await.unwrap();

        // Every snapshot write fails from here on
        std::fs::remove_dir_all(&sub).unwrap();

        assert!(matches!(
            store.append_message("family", &alice(), "lost").await,
            Err(StoreError::Io(_))
        ));
        let recent = store.recent_messages("family", 50).await.unwrap();
        let bodies: Vec<_> = recent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["kept"]);

        assert!(store.create_room("stocks").await.is_err());
        assert!(store.delete_room("work").await.is_err());
        assert_eq!(store.list_rooms().await.unwrap(), before);

        // Once writes work again, ids carry on where the last success left off
        std::fs::create_dir(&sub).unwrap();
        let next = store.append_message("family", &alice(), "again").await.unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finchat.json");

        {
            let store = MemoryStore::open(&path).await.unwrap();
            store.ensure_rooms(["family"]).await.unwrap();
            store.append_message("family", &alice(), "first").await.unwrap();
            store.append_message("family", &alice(), "second").await.unwrap();
        }

        let store = MemoryStore::open(&path).await.unwrap();
        assert!(store.room_exists("family").await.unwrap());

        let next = store.append_message("family", &alice(), "third").await.unwrap();
        assert_eq!(next.id, 3);

        let recent = store.recent_messages("family", 50).await.unwrap();
        let bodies: Vec<_> = recent.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["third", "second", "first"]);
    }
}

use crate::protocol::ServerMessage;
use crate::types::*;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Frames a connection may have waiting before it counts as stalled
pub const OUTBOUND_CAPACITY: usize = 256;

/// Receiving end of a connection's outbound queue. Yields `None` once the
/// connection has been closed and everything queued before has been drained.
pub type Outbound = mpsc::Receiver<ServerMessage>;

#[derive(Default)]
struct Membership {
    rooms: BTreeSet<RoomName>,
    torn_down: bool,
}

/// A live connection as seen by the registries.
///
/// Every frame for the client goes through the outbound queue, whether it is a
/// direct reply or a room broadcast, so the client sees them in the order they
/// were produced. Closing drops the queue's sender: frames already queued are
/// still delivered, nothing after that is. A client that lets the queue fill
/// up is closed as stalled and its queued frames are abandoned.
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    outbound: Mutex<Option<mpsc::Sender<ServerMessage>>>,
    membership: Mutex<Membership>,
    stalled: Notify,
}

impl ConnectionHandle {
    pub fn new(identity: Identity) -> (Arc<Self>, Outbound) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = Self {
            id: ulid::Ulid::new().to_string(),
            identity,
            outbound: Mutex::new(Some(tx)),
            membership: Mutex::new(Membership::default()),
            stalled: Notify::new(),
        };
        (Arc::new(handle), rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn username(&self) -> &str {
        &self.identity.username
    }

    /// Queue a frame. Returns false if the connection is closed, its
    /// transport already went away, or the queue was full (which closes it).
    pub fn send(&self, msg: ServerMessage) -> bool {
        let mut outbound = self.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    "Outbound queue of {} ({}) is full, closing it",
                    self.identity.username,
                    self.id
                );
                outbound.take();
                self.stalled.notify_one();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue one last frame and close. Returns false if already closed.
    pub fn close_with(&self, msg: ServerMessage) -> bool {
        let mut outbound = self.outbound.lock();
        match outbound.take() {
            Some(tx) => {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(msg) {
                    tracing::warn!("Closing stalled {} without a final frame", self.id);
                    self.stalled.notify_one();
                }
                true
            }
            None => false,
        }
    }

    /// Resolves once the queue overflowed. The socket task stops writing
    /// then instead of draining a backlog the client isn't reading.
    pub async fn stalled(&self) {
        self.stalled.notified().await
    }

    pub fn close(&self) {
        self.outbound.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.lock().is_none()
    }

    pub fn is_member(&self, room_name: &str) -> bool {
        self.membership.lock().rooms.contains(room_name)
    }

    /// Rooms this connection is in, ascending
    pub fn rooms(&self) -> Vec<RoomName> {
        self.membership.lock().rooms.iter().cloned().collect()
    }

    /// Claim membership of a room. False if already a member or torn down.
    pub(crate) fn add_room(&self, room_name: &str) -> bool {
        let mut membership = self.membership.lock();
        if membership.torn_down {
            return false;
        }
        membership.rooms.insert(room_name.to_string())
    }

    /// Release membership of a room. False if it wasn't a member.
    pub(crate) fn remove_room(&self, room_name: &str) -> bool {
        self.membership.lock().rooms.remove(room_name)
    }

    /// Mark the connection as torn down and hand back the rooms it still held.
    /// Only the first caller gets `Some`.
    pub(crate) fn begin_teardown(&self) -> Option<Vec<RoomName>> {
        let mut membership = self.membership.lock();
        if membership.torn_down {
            return None;
        }
        membership.torn_down = true;
        Some(std::mem::take(&mut membership.rooms).into_iter().collect())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user", &self.identity.username)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_with_is_last_frame() {
        let (conn, mut rx) = ConnectionHandle::new(Identity::new("1", "alice"));

        assert!(conn.send(ServerMessage::help()));
        assert!(conn.close_with(ServerMessage::logged_out()));
        assert!(!conn.send(ServerMessage::help()));
        assert!(!conn.close_with(ServerMessage::logged_out()));
        assert!(conn.is_closed());

        assert_eq!(rx.try_recv().unwrap(), ServerMessage::help());
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::logged_out());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_full_queue_closes_connection() {
        let (conn, mut rx) = ConnectionHandle::new(Identity::new("1", "alice"));

        for _ in 0..OUTBOUND_CAPACITY {
            assert!(conn.send(ServerMessage::help()));
        }
        assert!(!conn.send(ServerMessage::help()));
        assert!(conn.is_closed());
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.stalled())
            .await
            .expect("overflow should be signalled");

        let mut queued = 0;
        while let Ok(msg) = rx.try_recv() {
            assert_eq!(msg, ServerMessage::help());
            queued += 1;
        }
        assert_eq!(queued, OUTBOUND_CAPACITY);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_not_fatal() {
        let (conn, rx) = ConnectionHandle::new(Identity::new("1", "alice"));
        drop(rx);
        assert!(!conn.send(ServerMessage::help()));
    }

    #[test]
    fn test_membership_and_teardown() {
        let (conn, _rx) = ConnectionHandle::new(Identity::new("1", "alice"));

        assert!(conn.add_room("family"));
        assert!(!conn.add_room("family"));
        assert!(conn.add_room("work"));
        assert!(conn.is_member("family"));
        assert_eq!(conn.rooms(), vec!["family", "work"]);

        assert!(conn.remove_room("work"));
        assert!(!conn.remove_room("work"));

        assert_eq!(conn.begin_teardown(), Some(vec!["family".to_string()]));
        assert_eq!(conn.begin_teardown(), None);
        // No joining once torn down
        assert!(!conn.add_room("work"));
        assert!(conn.rooms().is_empty());
    }
}

mod connection;
mod room;
mod session;

pub use connection::{ConnectionHandle, Outbound, OUTBOUND_CAPACITY};
pub use room::RoomRegistry;
pub use session::{AlreadyActive, SessionDirectory};

use crate::auth::TokenAuthority;
use crate::broadcast::send_to_room;
use crate::protocol::{ErrorNotice, Presence, RoomNotification, ServerMessage};
use crate::store::MessageStore;
use crate::types::*;
use std::sync::Arc;

/// Why a connection never became active
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectError {
    #[error("connection is not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    AlreadyActive(#[from] AlreadyActive),
}

impl ConnectError {
    /// The single frame sent before the socket is closed
    pub fn notice(&self) -> ServerMessage {
        match self {
            ConnectError::NotAuthenticated => ServerMessage::Error(ErrorNotice::NotAuthenticated),
            ConnectError::AlreadyActive(_) => ServerMessage::Error(ErrorNotice::AlreadyChatting),
        }
    }
}

/// Shared application state, constructed once at startup and handed to every
/// connection.
pub struct AppState {
    pub sessions: SessionDirectory,
    pub rooms: RoomRegistry,
    pub store: Arc<dyn MessageStore>,
    pub auth: Arc<dyn TokenAuthority>,
    /// How many messages a join replays
    pub history_limit: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn MessageStore>, auth: Arc<dyn TokenAuthority>) -> Self {
        Self {
            sessions: SessionDirectory::new(),
            rooms: RoomRegistry::new(store.clone()),
            store,
            auth,
            history_limit: HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Admit a new connection for `identity` (`None` = anonymous).
    ///
    /// On success the connection is registered and the welcome frame is
    /// already queued on the returned outbound queue.
    pub async fn connect(
        &self,
        identity: Option<Identity>,
    ) -> Result<(Arc<ConnectionHandle>, Outbound), ConnectError> {
        let Some(identity) = identity else {
            tracing::warn!("Rejecting unauthenticated connection");
            return Err(ConnectError::NotAuthenticated);
        };

        let (conn, outbound) = ConnectionHandle::new(identity);
        if let Err(e) = self.sessions.register(conn.clone()).await {
            tracing::warn!("Rejecting connection of {}: {}", conn.username(), e);
            return Err(e.into());
        }

        tracing::info!("User {} connected as {}", conn.username(), conn.id());
        conn.send(ServerMessage::motd());
        Ok((conn, outbound))
    }

    /// Admit a connection presenting `token`. The token is checked again once
    /// the session is registered, so a logout that landed during the
    /// handshake still closes the new session with `logged-out`.
    pub async fn connect_token(
        &self,
        token: Option<&str>,
    ) -> Result<(Arc<ConnectionHandle>, Outbound), ConnectError> {
        let identity = match token {
            Some(token) => self.auth.resolve(token).await,
            None => None,
        };
        let (conn, outbound) = self.connect(identity).await?;

        if let Some(token) = token {
            if self.auth.resolve(token).await.is_none() {
                tracing::info!("Token of {} was revoked during the handshake", conn.username());
                self.revoke(&conn.identity().id).await;
            }
        }
        Ok((conn, outbound))
    }

    /// Tear a connection down: part every room it is still in, then release
    /// its session. Safe to call more than once and doesn't need a working
    /// transport.
    pub async fn disconnect(&self, conn: &Arc<ConnectionHandle>) {
        conn.close();
        let Some(rooms) = conn.begin_teardown() else {
            return;
        };

        for room_name in rooms {
            self.announce_part(conn, &room_name).await;
        }
        self.sessions
            .unregister(&conn.identity().id, conn.id())
            .await;
        tracing::info!("User {} disconnected ({})", conn.username(), conn.id());
    }

    /// Force-close the user's live connection after telling it why.
    /// Returns false if the user had no live connection.
    pub async fn revoke(&self, user_id: &str) -> bool {
        let Some(conn) = self.sessions.lookup(user_id).await else {
            return false;
        };

        conn.close_with(ServerMessage::logged_out());
        self.disconnect(&conn).await;
        true
    }

    /// Make `conn` a member of `room_name` and announce it to the room
    /// (the newcomer included). False if it was already a member or is
    /// being torn down.
    pub async fn enter_room(&self, conn: &Arc<ConnectionHandle>, room_name: &str) -> bool {
        if !conn.add_room(room_name) {
            return false;
        }
        self.rooms.add(room_name, conn.clone()).await;

        // Teardown may have drained the room set in between
        if !conn.is_member(room_name) {
            self.rooms.remove(room_name, conn.id()).await;
            return false;
        }

        let user = conn.username().to_string();
        let stamp = stamp_now();
        send_to_room(self, room_name, conn.id(), |you| {
            ServerMessage::Room(RoomNotification::Joined(Presence {
                you,
                user: user.clone(),
                room_name: room_name.to_string(),
                stamp: stamp.clone(),
            }))
        })
        .await;
        true
    }

    /// Announce `conn` leaving `room_name` (to the room, itself included) and
    /// drop the membership. False if it wasn't a member.
    pub async fn leave_room(&self, conn: &Arc<ConnectionHandle>, room_name: &str) -> bool {
        if !conn.remove_room(room_name) {
            return false;
        }
        self.announce_part(conn, room_name).await;
        true
    }

    async fn announce_part(&self, conn: &Arc<ConnectionHandle>, room_name: &str) {
        let user = conn.username().to_string();
        let stamp = stamp_now();
        send_to_room(self, room_name, conn.id(), |you| {
            ServerMessage::Room(RoomNotification::Parted(Presence {
                you,
                user: user.clone(),
                room_name: room_name.to_string(),
                stamp: stamp.clone(),
            }))
        })
        .await;
        self.rooms.remove(room_name, conn.id()).await;
    }

    /// Part every member out of a room that no longer exists.
    /// Returns how many connections were parted.
    pub async fn close_room(&self, room_name: &str) -> usize {
        let mut parted = 0;
        for conn in self.rooms.members(room_name).await {
            if self.leave_room(&conn, room_name).await {
                parted += 1;
            }
        }
        if parted > 0 {
            tracing::info!("Parted {} connections out of deleted room {}", parted, room_name);
        }
        parted
    }
}

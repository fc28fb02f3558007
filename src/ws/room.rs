//! Room command handlers
//!
//! Handlers for join, part, message and custom commands. Replies go back as
//! the return value; room events go out through `broadcast::send_to_room` and
//! land in every member's outbound queue, the author's included.

use crate::broadcast::send_to_room;
use crate::protocol::{ErrorNotice, HistoryEntry, RoomNotification, ServerMessage};
use crate::state::{AppState, ConnectionHandle};
use crate::store::StoreError;
use crate::types::*;
use std::sync::Arc;

fn store_failure(room_name: RoomName, e: StoreError) -> Option<ServerMessage> {
    tracing::error!("Store call for room {} failed: {}", room_name, e);
    Some(ServerMessage::Error(ErrorNotice::StoreUnavailable {
        name: room_name,
    }))
}

pub async fn handle_join(
    state: &Arc<AppState>,
    conn: &Arc<ConnectionHandle>,
    room_name: RoomName,
) -> Option<ServerMessage> {
    if conn.is_member(&room_name) {
        return Some(ServerMessage::Error(ErrorNotice::AlreadyJoined {
            name: room_name,
        }));
    }

    match state.rooms.exists(&room_name).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!("{} tried to join unknown room {}", conn.username(), room_name);
            return Some(ServerMessage::Error(ErrorNotice::RoomInvalid { name: room_name }));
        }
        Err(e) => return store_failure(room_name, e),
    }

    if !state.enter_room(conn, &room_name).await {
        // Either torn down meanwhile or raced with itself; nothing to report
        // to a closing connection.
        if conn.is_member(&room_name) {
            return Some(ServerMessage::Error(ErrorNotice::AlreadyJoined {
                name: room_name,
            }));
        }
        return None;
    }

    // A deletion between the existence check and registering would have
    // missed us when parting the room's members
    match state.rooms.exists(&room_name).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!("Room {} was deleted while {} joined", room_name, conn.username());
            state.leave_room(conn, &room_name).await;
            return Some(ServerMessage::Error(ErrorNotice::RoomInvalid { name: room_name }));
        }
        Err(e) => {
            state.leave_room(conn, &room_name).await;
            return store_failure(room_name, e);
        }
    }
    tracing::info!("{} joined {}", conn.username(), room_name);

    conn.send(ServerMessage::Room(RoomNotification::Users {
        room_name: room_name.clone(),
        users: state.rooms.usernames(&room_name).await,
    }));

    let recent = match state
        .store
        .recent_messages(&room_name, state.history_limit)
        .await
    {
        Ok(recent) => recent,
        Err(e) => return store_failure(room_name, e),
    };

    // The store hands them over newest first
    let messages = recent
        .iter()
        .rev()
        .map(|message| HistoryEntry::from_stored(message, conn.identity()))
        .collect();

    Some(ServerMessage::Room(RoomNotification::Messages {
        room_name,
        messages,
    }))
}

pub async fn handle_part(
    state: &Arc<AppState>,
    conn: &Arc<ConnectionHandle>,
    room_name: RoomName,
) -> Option<ServerMessage> {
    if state.leave_room(conn, &room_name).await {
        tracing::info!("{} parted {}", conn.username(), room_name);
        None
    } else {
        Some(ServerMessage::Error(ErrorNotice::NotJoined { name: room_name }))
    }
}

pub async fn handle_message(
    state: &Arc<AppState>,
    conn: &Arc<ConnectionHandle>,
    room_name: RoomName,
    body: String,
) -> Option<ServerMessage> {
    if !conn.is_member(&room_name) {
        return Some(ServerMessage::Error(ErrorNotice::NotJoined { name: room_name }));
    }

    let body = body.trim();
    if body.is_empty() {
        return Some(ServerMessage::Error(ErrorNotice::EmptyMessage {
            name: room_name,
        }));
    }

    let stored = match state
        .store
        .append_message(&room_name, conn.identity(), &bound_message(body))
        .await
    {
        Ok(stored) => stored,
        Err(e) => return store_failure(room_name, e),
    };

    let user = conn.username().to_string();
    let stamp = format_stamp(stored.created_on);
    send_to_room(state, &room_name, conn.id(), |you| {
        ServerMessage::Room(RoomNotification::Message {
            you,
            user: user.clone(),
            room_name: room_name.clone(),
            body: stored.body.clone(),
            stamp: stamp.clone(),
        })
    })
    .await;
    None
}

pub async fn handle_custom(
    state: &Arc<AppState>,
    conn: &Arc<ConnectionHandle>,
    room_name: RoomName,
    command: String,
    payload: String,
) -> Option<ServerMessage> {
    if !conn.is_member(&room_name) {
        return Some(ServerMessage::Error(ErrorNotice::NotJoined { name: room_name }));
    }

    let command = command.trim();
    if command.is_empty() {
        return Some(ServerMessage::Error(ErrorNotice::EmptyCustom {
            name: room_name,
        }));
    }

    tracing::debug!("{} sent custom {} to {}", conn.username(), command, room_name);
    let user = conn.username().to_string();
    let stamp = stamp_now();
    send_to_room(state, &room_name, conn.id(), |you| {
        ServerMessage::Room(RoomNotification::Custom {
            you,
            user: user.clone(),
            room_name: room_name.clone(),
            command: command.to_string(),
            payload: payload.clone(),
            stamp: stamp.clone(),
        })
    })
    .await;
    None
}

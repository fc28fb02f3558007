//! WebSocket message dispatch
//!
//! One command per connection is handled at a time, in arrival order. Every
//! client frame maps onto exactly one `ClientMessage` variant; anything else
//! was already turned into an error by `ClientMessage::parse`.

use crate::protocol::{ClientMessage, ErrorNotice, Notification, ServerMessage};
use crate::state::{AppState, ConnectionHandle};
use std::sync::Arc;

use super::room;

/// Decode a text frame and handle it. Returns the direct reply, if any.
pub async fn handle_text(
    text: &str,
    conn: &Arc<ConnectionHandle>,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match ClientMessage::parse(text) {
        Ok(msg) => handle_message(msg, conn, state).await,
        Err(e) => {
            tracing::warn!("Bad frame from {}: {}", conn.username(), e);
            Some(e.notice())
        }
    }
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &Arc<ConnectionHandle>,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Help => Some(ServerMessage::help()),

        ClientMessage::List => handle_list(conn, state).await,

        ClientMessage::Join { room_name } => room::handle_join(state, conn, room_name).await,

        ClientMessage::Part { room_name } => room::handle_part(state, conn, room_name).await,

        ClientMessage::Message { room_name, body } => {
            room::handle_message(state, conn, room_name, body).await
        }

        ClientMessage::Custom {
            room_name,
            command,
            payload,
        } => room::handle_custom(state, conn, room_name, command, payload).await,
    }
}

async fn handle_list(conn: &Arc<ConnectionHandle>, state: &Arc<AppState>) -> Option<ServerMessage> {
    match state.rooms.all_rooms(conn).await {
        Ok(list) => Some(ServerMessage::Notification(Notification::List { list })),
        Err(e) => {
            tracing::error!("Listing rooms for {} failed: {}", conn.username(), e);
            Some(ServerMessage::Error(ErrorNotice::StoreUnavailable {
                name: String::new(),
            }))
        }
    }
}

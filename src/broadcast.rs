use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::*;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Deliver one event to every connection registered in `room_name`.
///
/// `build` gets `you = true` only for the connection that caused the event.
/// Delivery is fire-and-forget: a member whose transport is gone is skipped.
/// Returns how many members the event was queued for.
pub async fn send_to_room<F>(state: &AppState, room_name: &str, author: &str, build: F) -> usize
where
    F: Fn(bool) -> ServerMessage,
{
    let mut delivered = 0;
    state
        .rooms
        .for_each_member(room_name, |conn| {
            if conn.send(build(conn.id() == author)) {
                delivered += 1;
            } else {
                tracing::debug!("Skipping closed member {} of {}", conn.username(), room_name);
            }
        })
        .await;
    delivered
}

/// Signal from the auth collaborator that a user's credential was revoked
#[derive(Debug, Clone, PartialEq)]
pub struct Revocation {
    pub user_id: UserId,
}

/// Spawn the session revocation listener: each revocation force-closes the
/// user's live connection, if any.
pub fn spawn_revocation_listener(
    state: Arc<AppState>,
    mut revocations: mpsc::Receiver<Revocation>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(Revocation { user_id }) = revocations.recv().await {
            if state.revoke(&user_id).await {
                tracing::info!("Revoked live session of user {}", user_id);
            } else {
                tracing::debug!("Revocation for user {} without live session", user_id);
            }
        }
        tracing::info!("Revocation channel closed, listener stopping");
    })
}

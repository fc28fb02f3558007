//! HTTP API endpoints next to the websocket.
//!
//! Logout drives session revocation; the room endpoints manage what can be
//! joined. Everything except listing wants a valid `Authorization: Token <key>`
//! header.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::header_token;
use crate::state::AppState;
use crate::store::StoreError;
use crate::types::{Identity, RoomName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomName>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
struct ApiError {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            error: error.into(),
        }),
    )
        .into_response()
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, Response> {
    let Some(token) = header_token(headers) else {
        return Err(error_response(StatusCode::UNAUTHORIZED, "missing token"));
    };
    state
        .auth
        .resolve(&token)
        .await
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "invalid token"))
}

/// Revoke the caller's token; its live chat connection is closed.
///
/// POST /api/logout
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(token) = header_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing token");
    };

    match state.auth.revoke(&token).await {
        Some(identity) => {
            tracing::info!("User {} logged out", identity.username);
            StatusCode::NO_CONTENT.into_response()
        }
        None => error_response(StatusCode::UNAUTHORIZED, "invalid token"),
    }
}

/// GET /api/rooms
pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_rooms().await {
        Ok(rooms) => Json(RoomsResponse { rooms }).into_response(),
        Err(e) => {
            tracing::error!("Failed to list rooms: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /api/rooms
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateRoomRequest>,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match state.store.create_room(&request.name).await {
        Ok(room) => {
            tracing::info!("{} created room {}", identity.username, room.name);
            (StatusCode::CREATED, Json(room)).into_response()
        }
        Err(e @ StoreError::InvalidRoomName(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e @ StoreError::RoomExists(_)) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e) => {
            tracing::error!("Failed to create room {}: {}", request.name, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Delete a room that has no message history; everyone in it is parted.
///
/// DELETE /api/rooms/{name}
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match state.store.delete_room(&name).await {
        Ok(()) => {
            tracing::info!("{} deleted room {}", identity.username, name);
            state.close_room(&name).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e @ StoreError::RoomNotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ StoreError::RoomInUse(_)) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e) => {
            tracing::error!("Failed to delete room {}: {}", name, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

// Public API for the server binary, the bot and integration tests

pub mod api;
pub mod auth;
pub mod bot;
pub mod config;
pub mod protocol;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;

// Room fanout and revocation listener
pub mod broadcast;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use state::AppState;

/// Build the HTTP router: the chat websocket plus the REST endpoints.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/logout", post(api::logout))
        .route("/api/rooms", get(api::list_rooms).post(api::create_room))
        .route("/api/rooms/{name}", delete(api::delete_room))
        .route("/health", get(api::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

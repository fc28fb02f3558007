pub mod handlers;
mod room;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth;
use crate::protocol::ServerMessage;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let token = auth::extract_token(&headers, params.token.as_deref());

    tracing::info!(
        "WebSocket connection request: token presented={}",
        token.is_some()
    );

    ws.on_upgrade(move |socket| handle_socket(socket, token, state))
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!("Failed to encode {:?}: {}", msg, e);
            None
        }
    }
}

/// Drive one client connection from handshake to teardown
async fn handle_socket(socket: WebSocket, token: Option<String>, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (conn, mut outbound) = match state.connect_token(token.as_deref()).await {
        Ok(accepted) => accepted,
        Err(rejection) => {
            if let Some(frame) = encode(&rejection.notice()) {
                let _ = sender.send(frame).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            // Everything for this client, replies and room events alike
            queued = outbound.recv() => {
                match queued {
                    Some(msg) => {
                        if let Some(frame) = encode(&msg) {
                            tokio::select! {
                                sent = sender.send(frame) => {
                                    if sent.is_err() {
                                        tracing::debug!("Transport of {} went away", conn.username());
                                        break;
                                    }
                                }
                                _ = conn.stalled() => {
                                    tracing::warn!("Dropping stalled client {}", conn.username());
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        // Closed from the server side, e.g. revocation
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = conn.stalled() => {
                tracing::warn!("Dropping stalled client {}", conn.username());
                break;
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                let text = match ws_msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            conn.send(crate::protocol::ProtocolError::InvalidFormat.notice());
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed by {}", conn.username());
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error for {}: {}", conn.username(), e);
                        break;
                    }
                    None => break,
                };

                tracing::debug!("Received from {}: {}", conn.username(), text);
                if let Some(reply) = handlers::handle_text(&text, &conn, &state).await {
                    conn.send(reply);
                }
            }
        }
    }

    state.disconnect(&conn).await;
}

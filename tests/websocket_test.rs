//! End-to-end tests against a real listener, talking the wire protocol.

use finchat::auth::TokenRegistry;
use finchat::broadcast::spawn_revocation_listener;
use finchat::protocol::{ErrorNotice, Notification, RoomNotification, ServerMessage};
use finchat::state::AppState;
use finchat::store::MemoryStore;
use finchat::types::Identity;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let store = MemoryStore::new();
    store.ensure_rooms(["family", "work"]).await.unwrap();

    let (tx, rx) = mpsc::channel(8);
    let tokens = TokenRegistry::new(tx);
    tokens.insert("alice-token", Identity::new("1", "alice")).await;
    tokens.insert("bob-token", Identity::new("2", "bob")).await;

    let state = Arc::new(AppState::new(Arc::new(store), Arc::new(tokens)));
    spawn_revocation_listener(state.clone(), rx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = finchat::app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn open(addr: SocketAddr, token: Option<&str>) -> Client {
    let url = match token {
        Some(token) => format!("ws://{}/ws?token={}", addr, token),
        None => format!("ws://{}/ws", addr),
    };
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Next server event, or `None` once the server closed the socket
async fn next(ws: &mut Client) -> Option<ServerMessage> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("server should answer in time");
        match frame {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_welcome_then_chat() {
    let addr = spawn_server().await;
    let mut alice = open(addr, Some("alice-token")).await;
    assert_eq!(next(&mut alice).await, Some(ServerMessage::motd()));

    send(&mut alice, json!({"type": "join", "room_name": "family"})).await;
    assert!(matches!(
        next(&mut alice).await,
        Some(ServerMessage::Room(RoomNotification::Joined(_)))
    ));
    assert!(matches!(
        next(&mut alice).await,
        Some(ServerMessage::Room(RoomNotification::Users { .. }))
    ));
    assert!(matches!(
        next(&mut alice).await,
        Some(ServerMessage::Room(RoomNotification::Messages { .. }))
    ));

    send(
        &mut alice,
        json!({"type": "message", "room_name": "family", "body": "hi all"}),
    )
    .await;
    match next(&mut alice).await {
        Some(ServerMessage::Room(RoomNotification::Message { you, body, .. })) => {
            assert!(you);
            assert_eq!(body, "hi all");
        }
        other => panic!("Expected message event, got {:?}", other),
    }

    // Malformed and unknown frames are reported and the connection survives
    ws_send_raw(&mut alice, "[1, 2, 3]").await;
    assert_eq!(
        next(&mut alice).await,
        Some(ServerMessage::Error(ErrorNotice::InvalidFormat))
    );
    send(&mut alice, json!({"type": "dance"})).await;
    assert_eq!(
        next(&mut alice).await,
        Some(ServerMessage::Error(ErrorNotice::UnsupportedCommand {
            details: json!("dance")
        }))
    );
    send(&mut alice, json!({"type": "help"})).await;
    assert!(matches!(
        next(&mut alice).await,
        Some(ServerMessage::Notification(Notification::Help { .. }))
    ));
}

async fn ws_send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_anonymous_connection_is_rejected() {
    let addr = spawn_server().await;

    let mut anonymous = open(addr, None).await;
    assert_eq!(
        next(&mut anonymous).await,
        Some(ServerMessage::Error(ErrorNotice::NotAuthenticated))
    );
    assert_eq!(next(&mut anonymous).await, None);

    let mut forged = open(addr, Some("forged")).await;
    assert_eq!(
        next(&mut forged).await,
        Some(ServerMessage::Error(ErrorNotice::NotAuthenticated))
    );
    assert_eq!(next(&mut forged).await, None);
}

#[tokio::test]
async fn test_second_session_is_rejected() {
    let addr = spawn_server().await;
    let mut first = open(addr, Some("alice-token")).await;
    assert_eq!(next(&mut first).await, Some(ServerMessage::motd()));

    let mut second = open(addr, Some("alice-token")).await;
    assert_eq!(
        next(&mut second).await,
        Some(ServerMessage::Error(ErrorNotice::AlreadyChatting))
    );
    assert_eq!(next(&mut second).await, None);

    // The first session is untouched
    send(&mut first, json!({"type": "list"})).await;
    assert!(matches!(
        next(&mut first).await,
        Some(ServerMessage::Notification(Notification::List { .. }))
    ));
}

#[tokio::test]
async fn test_logout_closes_live_session() {
    let addr = spawn_server().await;
    let mut alice = open(addr, Some("alice-token")).await;
    let mut bob = open(addr, Some("bob-token")).await;
    assert_eq!(next(&mut alice).await, Some(ServerMessage::motd()));
    assert_eq!(next(&mut bob).await, Some(ServerMessage::motd()));

    send(&mut alice, json!({"type": "join", "room_name": "family"})).await;
    for _ in 0..3 {
        next(&mut alice).await;
    }
    send(&mut bob, json!({"type": "join", "room_name": "family"})).await;
    for _ in 0..3 {
        next(&mut bob).await;
    }
    // Bob's arrival
    next(&mut alice).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/logout", addr))
        .header("Authorization", "Token alice-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    assert_eq!(next(&mut alice).await, Some(ServerMessage::logged_out()));
    assert_eq!(next(&mut alice).await, None);

    match next(&mut bob).await {
        Some(ServerMessage::Room(RoomNotification::Parted(presence))) => {
            assert_eq!(presence.user, "alice");
            assert!(!presence.you);
        }
        other => panic!("Expected alice's parted event, got {:?}", other),
    }

    // The revoked token no longer opens a session
    let mut again = open(addr, Some("alice-token")).await;
    assert_eq!(
        next(&mut again).await,
        Some(ServerMessage::Error(ErrorNotice::NotAuthenticated))
    );
}

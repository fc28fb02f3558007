//! finbot: an automated chat participant answering stock quote requests.
//!
//! The bot is an ordinary client of the websocket protocol. It watches for
//! `custom` events with the `stock` command, looks the payload up as a ticker
//! symbol and posts the closing price back into the room.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::config::parse_room_list;
use crate::protocol::{ClientMessage, Notification, RoomNotification, ServerMessage};
use crate::types::RoomName;

const DEFAULT_HOST: &str = "localhost:8000";
const DEFAULT_QUOTE_URL: &str = "https://stooq.com/q/l/";

/// The custom command the bot answers to
pub const STOCK_COMMAND: &str = "stock";

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("FINBOT_TOKEN is required")]
    MissingToken,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("expected the api-motd greeting, got {0}")]
    UnexpectedGreeting(String),

    #[error("expected a non-empty room list, got {0}")]
    UnexpectedRoomList(String),

    #[error("connection closed by the server")]
    Closed,

    #[error("quote lookup failed: {0}")]
    Quote(#[from] reqwest::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// `host:port` of the chat server
    pub host: String,
    pub token: String,
    /// Rooms to join; empty means every room the server lists
    pub rooms: Vec<RoomName>,
    pub quote_url: String,
}

impl BotConfig {
    /// Load config from FINBOT_* environment variables
    pub fn from_env() -> Result<Self, BotError> {
        let token = std::env::var("FINBOT_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(BotError::MissingToken)?;

        let host = std::env::var("FINBOT_HOST")
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let rooms = std::env::var("FINBOT_ROOMS")
            .map(|raw| parse_room_list(&raw))
            .unwrap_or_default();

        let quote_url = std::env::var("FINBOT_QUOTE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUOTE_URL.to_string());

        Ok(Self {
            host,
            token,
            rooms,
            quote_url,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws?token={}", self.host, self.token)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub close: String,
}

/// Where stock quotes come from
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest quote for `symbol`, `None` if the source doesn't know it
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, BotError>;
}

/// Quotes from stooq's CSV endpoint
pub struct StooqQuotes {
    client: reqwest::Client,
    url: String,
}

impl StooqQuotes {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl QuoteSource for StooqQuotes {
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, BotError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("s", symbol.to_lowercase().as_str()),
                ("f", "sd2t2ohlcv"),
                ("h", ""),
                ("e", "csv"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(
                "Unexpected HTTP status {} for symbol {}",
                response.status(),
                symbol
            );
            return Ok(None);
        }

        let body = response.text().await?;
        let quote = parse_stooq_csv(&body);
        if quote.is_none() {
            tracing::warn!("Bad or unavailable stock symbol {}", symbol);
        }
        Ok(quote)
    }
}

/// Pick Symbol and Close out of the first data row of a stooq CSV answer.
/// Stooq reports unknown symbols with a close of `N/D`.
pub fn parse_stooq_csv(body: &str) -> Option<Quote> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
    let header: Vec<&str> = lines.next()?.split(',').map(str::trim).collect();
    let row: Vec<&str> = lines.next()?.split(',').map(str::trim).collect();

    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .and_then(|i| row.get(i))
            .copied()
    };

    let symbol = column("Symbol")?;
    let close = column("Close")?;
    if close.is_empty() || close == "N/D" {
        return None;
    }

    Some(Quote {
        symbol: symbol.to_string(),
        close: close.to_string(),
    })
}

pub struct StockBot<Q> {
    quotes: Q,
}

impl<Q: QuoteSource> StockBot<Q> {
    pub fn new(quotes: Q) -> Self {
        Self { quotes }
    }

    /// What to send in reaction to a server event, if anything
    pub async fn react(&self, event: &ServerMessage) -> Option<ClientMessage> {
        let ServerMessage::Room(RoomNotification::Custom {
            room_name,
            command,
            payload,
            ..
        }) = event
        else {
            return None;
        };

        if command != STOCK_COMMAND {
            tracing::info!("Unknown command {:?} in {}, ignoring", command, room_name);
            return None;
        }

        let symbol = payload.trim();
        if symbol.is_empty() {
            return None;
        }

        let body = match self.quotes.quote(symbol).await {
            Ok(Some(quote)) => {
                tracing::debug!("Quote for {}: {:?}", symbol, quote);
                format!("{} quote is ${} per share", quote.symbol, quote.close)
            }
            Ok(None) => format!("I could not find stock data for {}", payload),
            Err(e) => {
                tracing::warn!("Quote lookup for {} failed: {}", symbol, e);
                format!("I could not find stock data for {}", payload)
            }
        };

        Some(ClientMessage::Message {
            room_name: room_name.clone(),
            body,
        })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Next decodable server event; `None` once the server closed the socket.
async fn next_event(ws: &mut WsStream) -> Result<Option<ServerMessage>, BotError> {
    while let Some(frame) = ws.next().await {
        let decoded = match frame? {
            tungstenite::Message::Text(text) => serde_json::from_str(text.as_str()),
            tungstenite::Message::Binary(data) => serde_json::from_slice(&data),
            tungstenite::Message::Close(_) => return Ok(None),
            _ => continue,
        };
        match decoded {
            Ok(event) => return Ok(Some(event)),
            Err(e) => tracing::warn!("Ignoring undecodable frame: {}", e),
        }
    }
    Ok(None)
}

async fn send(ws: &mut WsStream, msg: &ClientMessage) -> Result<(), BotError> {
    let json = serde_json::to_string(msg)?;
    ws.send(tungstenite::Message::Text(json.into())).await?;
    Ok(())
}

/// Connect, join rooms and answer stock requests until the server hangs up.
pub async fn run<Q: QuoteSource>(config: &BotConfig, bot: StockBot<Q>) -> Result<(), BotError> {
    tracing::info!("Connecting to {}", config.host);
    let (mut ws, _) = tokio_tungstenite::connect_async(config.ws_url()).await?;

    match next_event(&mut ws).await? {
        Some(ServerMessage::Notification(Notification::ApiMotd { .. })) => {
            tracing::info!("Connected, greeting received");
        }
        Some(other) => return Err(BotError::UnexpectedGreeting(format!("{:?}", other))),
        None => return Err(BotError::Closed),
    }

    let rooms = if config.rooms.is_empty() {
        send(&mut ws, &ClientMessage::List).await?;
        match next_event(&mut ws).await? {
            Some(ServerMessage::Notification(Notification::List { list })) if !list.is_empty() => {
                list.into_iter().map(|room| room.name).collect()
            }
            Some(other) => return Err(BotError::UnexpectedRoomList(format!("{:?}", other))),
            None => return Err(BotError::Closed),
        }
    } else {
        config.rooms.clone()
    };

    // A failed join only means the bot is already in there
    for room_name in rooms {
        tracing::info!("Joining room {}", room_name);
        send(&mut ws, &ClientMessage::Join { room_name }).await?;
    }

    while let Some(event) = next_event(&mut ws).await? {
        if let Some(reply) = bot.react(&event).await {
            send(&mut ws, &reply).await?;
        }
    }

    tracing::info!("Server closed the connection");
    Ok(())
}

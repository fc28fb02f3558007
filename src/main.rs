use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finchat::{
    auth::TokenRegistry, broadcast, config::ServerConfig, state::AppState, store::MemoryStore,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finchat=debug,tower_http=debug,axum=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting finchat...");

    let config = ServerConfig::from_env();

    let store = match &config.store_path {
        Some(path) => match MemoryStore::open(path).await {
            Ok(store) => {
                tracing::info!("Message store backed by {}", path.display());
                store
            }
            Err(e) => {
                tracing::error!("Failed to open store at {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("FINCHAT_STORE_PATH not set, messages are kept in memory only");
            MemoryStore::new()
        }
    };
    if let Err(e) = store.ensure_rooms(config.rooms.iter().map(String::as_str)).await {
        tracing::error!("Failed to create configured rooms: {}", e);
        std::process::exit(1);
    }

    // Logout on the HTTP side becomes a revocation event for the chat side
    let (revocations_tx, revocations_rx) = mpsc::channel(64);
    let tokens = TokenRegistry::new(revocations_tx);
    tokens.seed(&config.tokens).await;

    let state = Arc::new(
        AppState::new(Arc::new(store), Arc::new(tokens)).with_history_limit(config.history_limit),
    );

    broadcast::spawn_revocation_listener(state.clone(), revocations_rx);

    let app = finchat::app(state);

    tracing::info!("Listening on http://{}", config.bind);

    let listener = match tokio::net::TcpListener::bind(config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.bind, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}

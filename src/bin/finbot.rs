use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finchat::bot::{self, BotConfig, StockBot, StooqQuotes};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finbot=debug,finchat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting finbot...");

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Misconfigured: {}", e);
            std::process::exit(1);
        }
    };

    let quotes = StooqQuotes::new(config.quote_url.clone());
    if let Err(e) = bot::run(&config, StockBot::new(quotes)).await {
        tracing::error!("Aborting: {}", e);
        std::process::exit(1);
    }
}

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verge_feed::config::Config;
use verge_feed::fetcher::Fetcher;
use verge_feed::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verge_feed=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("VERGE_FEED_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load_or_default(&config_path)?;
    info!(
        "Serving '{}' from {} ({} allowed feed URLs)",
        config.feed.label,
        config.feed.default_url,
        config.feed.allowed_urls.len()
    );

    let fetcher = Arc::new(Fetcher::new(config.feed.clone())?);
    let state = Arc::new(AppState { fetcher });
    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

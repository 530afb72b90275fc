mod aggregator;
mod cache;
mod config;
mod error;
mod fetcher;
mod image;
mod limiter;
mod model;
mod normalizer;
mod routes;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::aggregator::Aggregator;
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::image::ImageResolver;
use crate::limiter::RateLimiter;
use crate::normalizer::Normalizer;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedhub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; a missing file means defaults
    let config_path =
        std::env::var("FEEDHUB_CONFIG").unwrap_or_else(|_| "feedhub.toml".to_string());
    let config = Config::load_or_default(&config_path)?;
    info!(
        window_secs = config.rate_limit.window_secs,
        max_requests = config.rate_limit.max_requests,
        "Loaded configuration"
    );

    // Build the engine: one rate limiter and one fetcher shared by every
    // network call site, aggregator and image resolver on top
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.to_rate_limit()));
    let fetcher = Arc::new(Fetcher::new(limiter, config.fetch.to_fetch()));
    let aggregator = Arc::new(Aggregator::new(
        fetcher.clone(),
        Normalizer::new(),
        config.aggregator(),
    ));
    let images = Arc::new(ImageResolver::new(fetcher, config.image()));

    let state = Arc::new(AppState { aggregator, images });
    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("Server starting on http://{}", config.server.bind);

    axum::serve(listener, app).await?;

    Ok(())
}

mod config;
mod consumer;
mod dispatcher;
mod limiter;
mod messages;
mod platform;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::consumer::Consumer;
use crate::dispatcher::Dispatcher;
use crate::limiter::RateLimiter;
use crate::platform::telegram::TelegramClient;
use crate::storage::sqlite::SqliteStore;
use crate::storage::title::{HttpTitleResolver, NoTitles, TitleResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,randlink=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Database: {}", config.storage.database_path.display());
    info!("  Batch size: {}", config.consumer.batch_size);
    info!(
        "  Rate limit: {}ms burst window, {}s cooldown, links limited: {}",
        config.rate_limit.burst_window_ms,
        config.rate_limit.cooldown_secs,
        config.rate_limit.limit_links
    );

    let titles: Arc<dyn TitleResolver> = if config.storage.resolve_titles {
        Arc::new(HttpTitleResolver::new(Duration::from_secs(
            config.storage.title_timeout_secs,
        ))?)
    } else {
        Arc::new(NoTitles)
    };

    let store = Arc::new(SqliteStore::open(&config.storage.database_path, titles)?);
    let telegram = Arc::new(TelegramClient::new(&config.telegram)?);

    let dispatcher = Dispatcher::new(
        store,
        telegram.clone(),
        RateLimiter::from_config(&config.rate_limit),
        config.rate_limit.limit_links,
    );
    let mut consumer = Consumer::new(telegram, dispatcher, &config.consumer);

    info!("Service started, polling from offset {}", consumer.offset());

    tokio::select! {
        _ = consumer.run() => {}
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            info!("Received Ctrl-C, shutting down");
        }
    }

    Ok(())
}

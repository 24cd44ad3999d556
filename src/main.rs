use std::sync::Arc;

use tracing::{error, info};

use feedloop::{Config, HttpFeedFetcher, RefreshScheduler, SqliteFeedStore};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = feedloop::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedloop::logging::init_console_only(&config.logging.level);
    }

    info!("feedloop - feed refresh engine");

    let store = match SqliteFeedStore::open(&config.database.path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open database {}: {e}", config.database.path);
            std::process::exit(1);
        }
    };

    let fetcher = match HttpFeedFetcher::new(&config.fetch) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    let scheduler = RefreshScheduler::new(
        config.scheduler.clone(),
        config.fetch.clone(),
        store,
        fetcher,
    );
    scheduler.start();

    match scheduler.initialize_all(None).await {
        Ok(scheduled) => info!(scheduled, "feeds scheduled at startup"),
        Err(e) => error!("Startup scheduling failed: {e}"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
    scheduler.shutdown();
}

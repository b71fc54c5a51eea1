//! Warrant board feed
//!
//! Main entry point: scraper pool, aggregator and WebSocket broadcaster

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warrant_core::{BoardConfig, ReferenceMap, Shutdown, SnapshotStore};
use warrant_feed_server::{load_reference, FeedService, SnapshotBroadcaster};
use warrant_reference::SqliteReferenceSource;
use warrant_scraper::webdriver::WebDriverOptions;
use warrant_scraper::WebDriverFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting warrant board feed v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = env::var("WARRANT_CONFIG").ok().map(PathBuf::from);
    let config = BoardConfig::load(config_path.as_deref())?;
    info!(
        sessions = config.scraper.total_sessions,
        source = %config.scraper.source_url,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    // Subscribers may connect before the first cycle; they receive `[]`
    let store = Arc::new(SnapshotStore::new());
    let broadcaster = Arc::new(SnapshotBroadcaster::new(config.server.clone(), Arc::clone(&store)));
    let listener = broadcaster.bind().await?;
    let server_handle = tokio::spawn(Arc::clone(&broadcaster).serve(listener, shutdown.clone()));

    // Reference data is loaded once; failure means every row enriches to 0
    let reference = match SqliteReferenceSource::new(&config.reference) {
        Ok(source) => load_reference(Arc::new(source)).await,
        Err(e) => {
            warn!("Reference source unusable, exercise prices default to 0: {}", e);
            Arc::new(ReferenceMap::new())
        }
    };
    info!("Loaded {} reference prices", reference.len());

    let factory = WebDriverFactory::new(WebDriverOptions::from_config(&config.scraper))?;
    let mut service = FeedService::start(
        &config,
        factory,
        reference,
        Arc::clone(&store),
        shutdown.clone(),
    )
    .await;

    info!("Press Ctrl+C to shutdown");
    shutdown.wait().await;

    service.stop().await;

    match server_handle.await {
        Ok(Err(e)) => error!("Broadcaster error: {}", e),
        Err(e) => error!("Broadcaster task failed: {}", e),
        Ok(Ok(())) => {}
    }

    let stats = broadcaster.stats().snapshot();
    info!(
        accepted = stats.connections_accepted,
        messages = stats.messages_sent,
        "Shutdown complete"
    );
    Ok(())
}

fn spawn_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C");
            }
            _ = terminate => {
                info!("Received termination signal");
            }
        }

        shutdown.trigger();
    });
}

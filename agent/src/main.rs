//! Feedsync Agent - keeps a local post cache in sync with the remote API.
//!
//! Opens the local store, probes the API for reachability and runs the sync
//! engine until interrupted.

use feedsync_agent::{
    Config, HttpProbe, HttpRemoteSource, LocalStore, StaticToken, SyncEngine, SyncStatus,
    SystemClock,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedsync_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Feedsync Agent against {}", config.api_url);

    let store = Arc::new(LocalStore::new(&config.database_url));
    store.open().await?;
    tracing::info!("Local store ready at {}", config.database_url);

    let remote = Arc::new(HttpRemoteSource::new(
        &config.api_url,
        config.request_timeout,
        Arc::new(StaticToken::new(config.api_token.clone())),
    )?);

    let probe = HttpProbe::new(&config.api_url, config.probe_interval, config.request_timeout)?;
    let connectivity = probe.observer();
    probe.probe().await;
    let probe_task = probe.spawn();

    let engine = SyncEngine::new(
        store.clone(),
        remote,
        connectivity,
        Arc::new(SystemClock),
        config.sync.clone(),
    );

    let mut transitions = engine.subscribe_status();
    let status_task = tokio::spawn(async move {
        loop {
            match transitions.recv().await {
                Ok(SyncStatus::Error) => tracing::warn!("Sync status: error"),
                Ok(status) => tracing::debug!("Sync status: {}", status),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Missed {} status updates", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.initialize()?;
    engine.sync_pending_changes().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    // Let a running pass finish before cleaning up.
    engine.stop_auto_sync();
    engine
        .watch_status()
        .wait_for(|status| *status != SyncStatus::Syncing)
        .await?;

    if let Some(report) = engine.cleanup_cache().await? {
        tracing::info!(
            "Cleanup removed {} expired entries and {} orphaned comment lists",
            report.evicted,
            report.orphaned_comments
        );
    }

    engine.shutdown();
    probe_task.abort();
    status_task.abort();
    store.close().await;

    Ok(())
}

//! givpower-engine server entry point.
//!
//! Wires the store, balance source and notifier, starts the periodic
//! engine tasks and serves the REST and WebSocket endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use givpower_engine::api;
use givpower_engine::app_state::AppState;
use givpower_engine::clients::{
    BalanceSource, HttpBalanceSource, HttpNotifier, LogNotifier, RankChangeNotifier,
};
use givpower_engine::config::EngineConfig;
use givpower_engine::persistence::{MemoryStore, PostgresStore, PowerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {e}"))?;
    tracing::info!(addr = %config.listen_addr, "starting givpower-engine");

    let store = build_store(&config).await?;
    let source: Arc<dyn BalanceSource> = Arc::new(
        HttpBalanceSource::new(
            &config.balance_source_url,
            &config.balance_source_network,
            Duration::from_millis(config.balance_source_timeout_ms),
        )
        .context("balance source client")?,
    );
    let notifier: Arc<dyn RankChangeNotifier> = match &config.notification_url {
        Some(url) => Arc::new(
            HttpNotifier::new(url, Duration::from_millis(config.balance_source_timeout_ms))
                .context("notification client")?,
        ),
        None => Arc::new(LogNotifier),
    };

    let app_state =
        AppState::new(&config, store, source, notifier).context("application state")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = app_state.spawn_tasks(&config, &shutdown_rx);

    let app = api::build_app(app_state);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "periodic task ended abnormally");
        }
    }
    tracing::info!("shutdown complete");

    Ok(())
}

/// Initializes tracing from `RUST_LOG`; `LOG_FORMAT=json` selects JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_store(config: &EngineConfig) -> anyhow::Result<Arc<dyn PowerStore>> {
    if !config.persistence_enabled {
        tracing::warn!("persistence disabled, using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = PostgresStore::connect(config)
        .await
        .context("connecting to postgres")?;
    store.migrate().await.context("running migrations")?;
    tracing::info!("postgres store ready");
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}

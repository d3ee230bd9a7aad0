//! Shared application state injected into all Axum handlers, plus the
//! wiring of the engine's periodic tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clients::{BalanceSource, RankChangeNotifier};
use crate::config::EngineConfig;
use crate::domain::{EventBus, ViewKind};
use crate::error::EngineError;
use crate::persistence::PowerStore;
use crate::service::{
    BalanceSyncService, PropagationWait, RankingEngine, RolloverDeps, RolloverOrchestrator,
    SnapshotWriter, spawn_periodic,
};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Snapshot tables and singletons.
    pub store: Arc<dyn PowerStore>,
    /// Cached ranking views.
    pub ranking: Arc<RankingEngine>,
    /// Balance sync client.
    pub sync: Arc<BalanceSyncService>,
    /// Round rollover orchestrator (owns the round clock).
    pub rollover: Arc<RolloverOrchestrator>,
    /// Event bus for WebSocket subscriptions.
    pub event_bus: EventBus,
}

impl AppState {
    /// Wires the engine components around a store, a balance source and a
    /// notifier.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the round clock cannot be
    /// built from the configuration.
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn PowerStore>,
        source: Arc<dyn BalanceSource>,
        notifier: Arc<dyn RankChangeNotifier>,
    ) -> Result<Self, EngineError> {
        let clock = config.round_clock()?;
        let event_bus = EventBus::new(config.event_bus_capacity);

        let writer = Arc::new(SnapshotWriter::new(
            Arc::clone(&store),
            event_bus.clone(),
            config.eligibility_filter_enabled,
        ));
        let sync = Arc::new(BalanceSyncService::new(
            Arc::clone(&store),
            source,
            event_bus.clone(),
            config.balance_source_page_size,
            config.snapshot_sync_retry_budget,
        ));
        let ranking = Arc::new(RankingEngine::new(
            Arc::clone(&store),
            event_bus.clone(),
            config.eligibility_filter_enabled,
        ));
        let rollover = Arc::new(RolloverOrchestrator::new(
            RolloverDeps {
                store: Arc::clone(&store),
                writer,
                sync: Arc::clone(&sync),
                ranking: Arc::clone(&ranking),
                notifier,
                event_bus: event_bus.clone(),
            },
            clock,
            PropagationWait {
                max_delay: config.propagation_delay(),
                poll: config.propagation_poll(),
            },
        ));

        Ok(Self {
            store,
            ranking,
            sync,
            rollover,
            event_bus,
        })
    }

    /// Spawns the rollover check, balance sync, instant refresh and (when
    /// enabled) preview snapshot tasks. They stop once `shutdown` flips to
    /// `true`.
    #[must_use]
    pub fn spawn_tasks(
        &self,
        config: &EngineConfig,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(4);

        let rollover = Arc::clone(&self.rollover);
        handles.push(spawn_periodic(
            "rollover",
            Duration::from_secs(config.rollover_check_interval_secs),
            shutdown.clone(),
            move || {
                let rollover = Arc::clone(&rollover);
                async move {
                    let outcome = rollover.check_and_roll().await?;
                    tracing::debug!(?outcome, "rollover tick");
                    Ok(())
                }
            },
        ));

        let sync = Arc::clone(&self.sync);
        let ranking = Arc::clone(&self.ranking);
        handles.push(spawn_periodic(
            "balance_sync",
            Duration::from_secs(config.balance_sync_interval_secs),
            shutdown.clone(),
            move || {
                let sync = Arc::clone(&sync);
                let ranking = Arc::clone(&ranking);
                async move {
                    let Some(result) = sync.sync_balances().await? else {
                        return Ok(());
                    };
                    if result.filled > 0 || !result.synced_snapshots.is_empty() {
                        ranking.refresh_snapshot_views().await?;
                    }
                    Ok(())
                }
            },
        ));

        let ranking = Arc::clone(&self.ranking);
        handles.push(spawn_periodic(
            "instant_refresh",
            Duration::from_secs(config.instant_refresh_interval_secs),
            shutdown.clone(),
            move || {
                let ranking = Arc::clone(&ranking);
                async move {
                    ranking.refresh(ViewKind::Instant).await?;
                    Ok(())
                }
            },
        ));

        if config.preview_snapshot_interval_secs > 0 {
            let rollover = Arc::clone(&self.rollover);
            handles.push(spawn_periodic(
                "preview_snapshot",
                Duration::from_secs(config.preview_snapshot_interval_secs),
                shutdown.clone(),
                move || {
                    let rollover = Arc::clone(&rollover);
                    async move {
                        if let Some(snapshot_id) = rollover.take_preview_snapshot().await? {
                            tracing::debug!(snapshot_id = %snapshot_id, "preview snapshot taken");
                        }
                        Ok(())
                    }
                },
            ));
        }

        handles
    }
}

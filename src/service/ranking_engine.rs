//! Cached ranking views recomputed on demand.
//!
//! Each view is an immutable [`RankingView`] behind an `Arc`. Readers get
//! the cached value; [`RankingEngine::refresh`] recomputes one view from the
//! store and swaps it in. Views are refreshed after balance syncs and
//! rollovers, and the instant view on its own cadence.
//!
//! Every refresh takes a generation number before reading the store. A
//! result is only cached if no refresh that started later has already been
//! cached, so a slow computation cannot replace a newer view.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::snapshot::Snapshot;
use crate::domain::{EngineEvent, EventBus, RankingView, ViewKind};
use crate::error::EngineError;
use crate::persistence::PowerStore;

/// Views derived from snapshot tables, as opposed to live data.
pub const SNAPSHOT_VIEWS: [ViewKind; 3] =
    [ViewKind::Current, ViewKind::Future, ViewKind::LastSnapshot];

/// Ranking engine holding the four cached views.
#[derive(Debug)]
pub struct RankingEngine {
    store: Arc<dyn PowerStore>,
    event_bus: EventBus,
    eligibility_filter: bool,
    generation: AtomicU64,
    views: RwLock<HashMap<ViewKind, (u64, Arc<RankingView>)>>,
}

impl RankingEngine {
    /// Creates an engine with an empty cache.
    #[must_use]
    pub fn new(store: Arc<dyn PowerStore>, event_bus: EventBus, eligibility_filter: bool) -> Self {
        Self {
            store,
            event_bus,
            eligibility_filter,
            generation: AtomicU64::new(0),
            views: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached view, computing it first if absent.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PersistenceError`] if the view has to be
    /// computed and the store fails.
    pub async fn view(&self, kind: ViewKind) -> Result<Arc<RankingView>, EngineError> {
        if let Some((_, view)) = self.views.read().await.get(&kind) {
            return Ok(Arc::clone(view));
        }
        self.refresh(kind).await
    }

    /// Recomputes one view and replaces the cached copy.
    ///
    /// If a refresh of the same view that started later finished first, its
    /// result stays cached and is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PersistenceError`] if the store fails; the
    /// previous cached copy is kept in that case.
    pub async fn refresh(&self, kind: ViewKind) -> Result<Arc<RankingView>, EngineError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let view = Arc::new(self.compute(kind).await?);
        Ok(self.install(kind, generation, view).await)
    }

    async fn install(
        &self,
        kind: ViewKind,
        generation: u64,
        view: Arc<RankingView>,
    ) -> Arc<RankingView> {
        {
            let mut views = self.views.write().await;
            if let Some((cached_generation, cached)) = views.get(&kind)
                && *cached_generation > generation
            {
                tracing::debug!(view = %kind, "discarding stale ranking view");
                return Arc::clone(cached);
            }
            views.insert(kind, (generation, Arc::clone(&view)));
        }

        tracing::debug!(
            view = %kind,
            snapshot_id = ?view.snapshot_id,
            projects = view.entries.len(),
            "ranking view refreshed"
        );
        let _ = self.event_bus.publish(EngineEvent::RankingRefreshed {
            view: kind,
            snapshot_id: view.snapshot_id,
            project_count: view.entries.len(),
            timestamp: view.computed_at,
        });

        view
    }

    /// Refreshes the current, future and last-snapshot views.
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub async fn refresh_snapshot_views(&self) -> Result<(), EngineError> {
        for kind in SNAPSHOT_VIEWS {
            self.refresh(kind).await?;
        }
        Ok(())
    }

    /// Drops every cached view so the next read recomputes it.
    pub async fn invalidate_all(&self) {
        self.views.write().await.clear();
    }

    /// Computes a view without touching the cache.
    ///
    /// Snapshot views use the newest synced snapshot that qualifies; when
    /// none exists the view has no entries.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PersistenceError`] if the store fails.
    pub async fn compute(&self, kind: ViewKind) -> Result<RankingView, EngineError> {
        let (round_number, snapshot, inputs) = match kind {
            ViewKind::Instant => (None, None, self.store.instant_power_inputs().await?),
            _ => {
                let (round_number, snapshot) = self.source_snapshot(kind).await?;
                let Some(snapshot) = snapshot else {
                    return Ok(RankingView {
                        kind,
                        round_number,
                        snapshot_id: None,
                        computed_at: Utc::now(),
                        entries: Vec::new(),
                    });
                };
                let inputs = self.store.snapshot_power_inputs(snapshot.id).await?;
                (Some(snapshot.round_number), Some(snapshot.id), inputs)
            }
        };

        let projects = self.store.projects().await?;
        Ok(RankingView::compute(
            kind,
            round_number,
            snapshot,
            &inputs,
            &projects,
            self.eligibility_filter,
        ))
    }

    /// Picks the snapshot a snapshot view is computed from, along with the
    /// round the view refers to.
    async fn source_snapshot(
        &self,
        kind: ViewKind,
    ) -> Result<(Option<i64>, Option<Snapshot>), EngineError> {
        let round = match kind {
            ViewKind::Instant => return Ok((None, None)),
            ViewKind::LastSnapshot => {
                let snapshot = self.store.latest_snapshot(None, true).await?;
                return Ok((snapshot.as_ref().map(|s| s.round_number), snapshot));
            }
            ViewKind::Current => self.store.current_round().await?,
            ViewKind::Future => self.store.current_round().await?.map(|r| r + 1),
        };
        let Some(round) = round else {
            return Ok((None, None));
        };
        let snapshot = self.store.latest_snapshot(Some(round), true).await?;
        Ok((Some(round), snapshot))
    }
}

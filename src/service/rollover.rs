//! Round rollover state machine.
//!
//! A rollover tick compares the clock's round with the persisted one. When
//! the clock is ahead it saves the current ranking as the previous-round
//! ranking, advances the round by compare-and-set, snapshots the new round,
//! waits for the snapshot's balances, recomputes the views and sends the
//! rank diff to the notifier.
//!
//! A crash between advancing the round and notifying loses that round's
//! notice: the next tick sees the round already advanced and does nothing
//! beyond repairing a missing snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use utoipa::ToSchema;

use super::balance_sync::BalanceSyncService;
use super::ranking_engine::RankingEngine;
use super::snapshot_writer::SnapshotWriter;
use crate::clients::RankChangeNotifier;
use crate::domain::{
    EngineEvent, EventBus, RankChangeNotice, RoundClock, SnapshotId, ViewKind,
};
use crate::error::EngineError;
use crate::persistence::PowerStore;

/// Whether a rollover is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RolloverPhase {
    /// Waiting for the next tick.
    Idle,
    /// Between saving the previous ranks and notifying.
    Rolling,
}

/// What a rollover tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum RolloverOutcome {
    /// Another tick or preview snapshot was still running.
    Skipped,
    /// The persisted round is already current.
    NoChange {
        /// Persisted round.
        round: i64,
    },
    /// First tick: the round singleton was initialised.
    Initialized {
        /// Initial round.
        round: i64,
        /// Snapshot taken for it.
        snapshot_id: SnapshotId,
    },
    /// The persisted round had no snapshot and one was taken.
    Repaired {
        /// Persisted round.
        round: i64,
        /// Snapshot taken for it.
        snapshot_id: SnapshotId,
    },
    /// The round advanced.
    Rolled {
        /// Round before the tick.
        from: i64,
        /// Round after the tick.
        to: i64,
        /// Boundary snapshot of the new round.
        snapshot_id: SnapshotId,
        /// Diff sent to the notifier.
        notice: RankChangeNotice,
        /// Whether the notifier accepted the diff.
        notified: bool,
    },
}

/// Timing of the wait between snapshotting and recomputing.
#[derive(Debug, Clone, Copy)]
pub struct PropagationWait {
    /// Upper bound on the wait.
    pub max_delay: Duration,
    /// How often the snapshot's synced flag is polled.
    pub poll: Duration,
}

/// Everything the orchestrator drives.
#[derive(Debug, Clone)]
pub struct RolloverDeps {
    /// Shared store.
    pub store: Arc<dyn PowerStore>,
    /// Snapshot writer.
    pub writer: Arc<SnapshotWriter>,
    /// Balance sync, triggered right after the boundary snapshot.
    pub sync: Arc<BalanceSyncService>,
    /// Ranking views.
    pub ranking: Arc<RankingEngine>,
    /// Rank-change sink.
    pub notifier: Arc<dyn RankChangeNotifier>,
    /// Event bus.
    pub event_bus: EventBus,
}

/// Round rollover orchestrator.
#[derive(Debug)]
pub struct RolloverOrchestrator {
    deps: RolloverDeps,
    clock: RoundClock,
    wait: PropagationWait,
    running: Mutex<()>,
    phase: watch::Sender<RolloverPhase>,
}

/// Resets the phase to idle however the rollover ends.
struct PhaseGuard<'a>(&'a watch::Sender<RolloverPhase>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(RolloverPhase::Idle);
    }
}

impl RolloverOrchestrator {
    /// Creates an idle orchestrator.
    #[must_use]
    pub fn new(deps: RolloverDeps, clock: RoundClock, wait: PropagationWait) -> Self {
        let (phase, _) = watch::channel(RolloverPhase::Idle);
        Self {
            deps,
            clock,
            wait,
            running: Mutex::new(()),
            phase,
        }
    }

    /// The round clock in use.
    #[must_use]
    pub const fn clock(&self) -> &RoundClock {
        &self.clock
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> RolloverPhase {
        *self.phase.borrow()
    }

    /// Receiver notified on every phase change.
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<RolloverPhase> {
        self.phase.subscribe()
    }

    /// Runs one rollover tick against the wall clock.
    ///
    /// # Errors
    ///
    /// Returns the first store or writer failure. Nothing is retried here;
    /// the next tick picks up from the persisted state.
    pub async fn check_and_roll(&self) -> Result<RolloverOutcome, EngineError> {
        self.check_and_roll_at(Utc::now()).await
    }

    /// Runs one rollover tick as if the time were `now`.
    ///
    /// # Errors
    ///
    /// See [`Self::check_and_roll`].
    pub async fn check_and_roll_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<RolloverOutcome, EngineError> {
        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!("rollover already running, skipping");
            return Ok(RolloverOutcome::Skipped);
        };

        let target = self.clock.round_for_time(now).number;
        match self.deps.store.current_round().await? {
            None => self.initialize(target).await,
            Some(current) if target > current => self.roll(current, target).await,
            Some(current) => {
                if target < current {
                    tracing::warn!(current, clock = target, "clock is behind persisted round");
                }
                self.repair(current).await
            }
        }
    }

    /// Snapshots live boosting for the round after the persisted one.
    ///
    /// Returns `None` before the first rollover tick or while a rollover is
    /// running.
    ///
    /// # Errors
    ///
    /// Returns the store or writer failure.
    pub async fn take_preview_snapshot(&self) -> Result<Option<SnapshotId>, EngineError> {
        let Ok(_running) = self.running.try_lock() else {
            return Ok(None);
        };
        let Some(current) = self.deps.store.current_round().await? else {
            return Ok(None);
        };
        let receipt = self.deps.writer.take_snapshot(current + 1).await?;
        Ok(Some(receipt.snapshot.id))
    }

    async fn initialize(&self, round: i64) -> Result<RolloverOutcome, EngineError> {
        if !self.deps.store.compare_and_set_round(None, round).await? {
            tracing::info!(round, "round initialised concurrently");
            return Ok(RolloverOutcome::NoChange { round });
        }
        tracing::info!(round, "round initialised");
        let _ = self.deps.event_bus.publish(EngineEvent::RoundRolledOver {
            from_round: None,
            to_round: round,
            timestamp: Utc::now(),
        });

        let snapshot_id = self.snapshot_and_settle(round).await?;
        Ok(RolloverOutcome::Initialized { round, snapshot_id })
    }

    async fn repair(&self, round: i64) -> Result<RolloverOutcome, EngineError> {
        if self.deps.store.latest_snapshot(Some(round), false).await?.is_some() {
            return Ok(RolloverOutcome::NoChange { round });
        }
        tracing::warn!(round, "persisted round has no snapshot, retaking it");
        let snapshot_id = self.snapshot_and_settle(round).await?;
        Ok(RolloverOutcome::Repaired { round, snapshot_id })
    }

    async fn roll(&self, from: i64, to: i64) -> Result<RolloverOutcome, EngineError> {
        self.phase.send_replace(RolloverPhase::Rolling);
        let _phase = PhaseGuard(&self.phase);
        tracing::info!(from, to, "round rollover started");

        let previous_view = self.deps.ranking.refresh(ViewKind::Current).await?;
        let previous_ranks: Vec<_> = previous_view.ranks().into_iter().collect();
        self.deps
            .store
            .replace_previous_round_ranks(from, &previous_ranks)
            .await?;

        if !self.deps.store.compare_and_set_round(Some(from), to).await? {
            tracing::warn!(from, to, "round advanced concurrently, abandoning rollover");
            let round = self.deps.store.current_round().await?.unwrap_or(from);
            return Ok(RolloverOutcome::NoChange { round });
        }
        let _ = self.deps.event_bus.publish(EngineEvent::RoundRolledOver {
            from_round: Some(from),
            to_round: to,
            timestamp: Utc::now(),
        });

        let snapshot_id = self.snapshot_and_settle(to).await?;

        let current_view = self.deps.ranking.view(ViewKind::Current).await?;
        let saved = self
            .deps
            .store
            .previous_round_ranks()
            .await?
            .unwrap_or_default();
        let notice = RankChangeNotice::between(
            to,
            &saved.ranks,
            previous_view.bottom_rank(),
            &current_view,
        );

        let notified = match self.deps.notifier.notify(&notice).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    notifier = self.deps.notifier.name(),
                    error = %err,
                    "rank change notification failed"
                );
                false
            }
        };
        let _ = self.deps.event_bus.publish(EngineEvent::RanksChanged {
            notice: notice.clone(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            from,
            to,
            snapshot_id = %snapshot_id,
            changes = notice.project_rank_changes.len(),
            notified,
            "round rollover finished"
        );
        Ok(RolloverOutcome::Rolled {
            from,
            to,
            snapshot_id,
            notice,
            notified,
        })
    }

    /// Snapshots `round`, waits for the snapshot to settle and refreshes the
    /// snapshot views.
    async fn snapshot_and_settle(&self, round: i64) -> Result<SnapshotId, EngineError> {
        let receipt = self.deps.writer.take_snapshot(round).await?;
        let snapshot_id = receipt.snapshot.id;
        if !self.wait_for_sync(snapshot_id).await? {
            tracing::warn!(
                snapshot_id = %snapshot_id,
                waited_ms = u64::try_from(self.wait.max_delay.as_millis()).unwrap_or(u64::MAX),
                "snapshot not synced before recompute"
            );
        }
        self.deps.ranking.refresh_snapshot_views().await?;
        Ok(snapshot_id)
    }

    /// Triggers a balance sync, then polls until the snapshot is synced or
    /// the propagation delay has elapsed. Returns whether it synced.
    async fn wait_for_sync(&self, snapshot_id: SnapshotId) -> Result<bool, EngineError> {
        let deadline = Instant::now() + self.wait.max_delay;

        if let Err(err) = self.deps.sync.sync_balances().await {
            tracing::warn!(error = %err, "balance sync after snapshot failed");
        }

        loop {
            let synced = self
                .deps
                .store
                .snapshot(snapshot_id)
                .await?
                .is_some_and(|s| s.synced);
            if synced {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.wait.poll.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::clients::BalanceSource;
    use crate::domain::snapshot::Boosting;
    use crate::domain::{ProjectId, ProjectRankChange, UserId};
    use crate::persistence::MemoryStore;
    use crate::service::test_support::{FakeBalanceSource, RecordingNotifier};

    struct Harness {
        store: Arc<MemoryStore>,
        source: Arc<FakeBalanceSource>,
        notifier: Arc<RecordingNotifier>,
        orchestrator: RolloverOrchestrator,
        clock: RoundClock,
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        for project in 1..=3 {
            store.upsert_project(ProjectId::new(project), true).await;
        }
        for (user, address) in [(1, "0x01"), (2, "0x02"), (3, "0x03")] {
            store.register_user(UserId::new(user), address).await;
            store
                .set_boosting(Boosting {
                    user_id: UserId::new(user),
                    project_id: ProjectId::new(user),
                    percentage: 100.0,
                })
                .await;
        }

        let source = Arc::new(FakeBalanceSource::default());
        source.set_latest_indexed((Utc::now() + TimeDelta::hours(1)).timestamp_millis());
        let notifier = Arc::new(RecordingNotifier::default());
        let bus = EventBus::new(64);
        let store_dyn: Arc<dyn PowerStore> = Arc::clone(&store) as Arc<dyn PowerStore>;
        let deps = RolloverDeps {
            store: Arc::clone(&store_dyn),
            writer: Arc::new(SnapshotWriter::new(Arc::clone(&store_dyn), bus.clone(), true)),
            sync: Arc::new(
                BalanceSyncService::new(
                    Arc::clone(&store_dyn),
                    Arc::clone(&source) as Arc<dyn BalanceSource>,
                    bus.clone(),
                    100,
                    0,
                )
                .with_retry_backoff(Vec::new()),
            ),
            ranking: Arc::new(RankingEngine::new(Arc::clone(&store_dyn), bus.clone(), true)),
            notifier: Arc::clone(&notifier) as Arc<dyn RankChangeNotifier>,
            event_bus: bus,
        };
        let Ok(clock) = RoundClock::new(epoch(), TimeDelta::days(14)) else {
            panic!("clock should build");
        };
        let wait = PropagationWait {
            max_delay: Duration::from_millis(50),
            poll: Duration::from_millis(5),
        };
        Harness {
            store,
            source,
            notifier,
            orchestrator: RolloverOrchestrator::new(deps, clock, wait),
            clock,
        }
    }

    fn in_round(clock: &RoundClock, round: i64) -> DateTime<Utc> {
        clock.window(round).starts_at + TimeDelta::hours(1)
    }

    #[tokio::test]
    async fn first_tick_initialises_round() {
        let h = harness().await;
        h.source.push("0x01", 10.0, 1);
        h.source.push("0x02", 20.0, 2);
        h.source.push("0x03", 30.0, 3);

        let Ok(outcome) = h.orchestrator.check_and_roll_at(in_round(&h.clock, 3)).await else {
            panic!("tick should succeed");
        };
        assert!(matches!(outcome, RolloverOutcome::Initialized { round: 3, .. }));
        assert!(matches!(h.store.current_round().await, Ok(Some(3))));
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn same_round_is_a_no_op() {
        let h = harness().await;
        let now = in_round(&h.clock, 2);
        assert!(h.orchestrator.check_and_roll_at(now).await.is_ok());

        let Ok(outcome) = h.orchestrator.check_and_roll_at(now).await else {
            panic!("tick should succeed");
        };
        assert_eq!(outcome, RolloverOutcome::NoChange { round: 2 });
    }

    #[tokio::test]
    async fn missing_snapshot_is_retaken() {
        let h = harness().await;
        assert!(matches!(h.store.compare_and_set_round(None, 5).await, Ok(true)));

        let Ok(outcome) = h.orchestrator.check_and_roll_at(in_round(&h.clock, 5)).await else {
            panic!("tick should succeed");
        };
        assert!(matches!(outcome, RolloverOutcome::Repaired { round: 5, .. }));
        assert!(matches!(h.store.latest_snapshot(Some(5), false).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn rollover_diffs_ranks_and_notifies() {
        let h = harness().await;
        h.source.push("0x01", 30.0, 1);
        h.source.push("0x02", 20.0, 2);
        h.source.push("0x03", 10.0, 3);
        assert!(h.orchestrator.check_and_roll_at(in_round(&h.clock, 1)).await.is_ok());

        // Project 3 overtakes project 1 before the next boundary.
        h.source.push("0x03", 50.0, 4);
        let Ok(outcome) = h.orchestrator.check_and_roll_at(in_round(&h.clock, 2)).await else {
            panic!("tick should succeed");
        };

        let RolloverOutcome::Rolled { from, to, notice, notified, .. } = outcome else {
            panic!("expected a rollover");
        };
        assert_eq!((from, to), (1, 2));
        assert!(notified);
        assert_eq!(notice.old_bottom_rank, Some(3));
        assert_eq!(notice.new_bottom_rank, Some(3));
        assert_eq!(
            notice.project_rank_changes,
            vec![
                ProjectRankChange {
                    project_id: ProjectId::new(1),
                    old_rank: Some(1),
                    new_rank: Some(2),
                },
                ProjectRankChange {
                    project_id: ProjectId::new(2),
                    old_rank: Some(2),
                    new_rank: Some(3),
                },
                ProjectRankChange {
                    project_id: ProjectId::new(3),
                    old_rank: Some(3),
                    new_rank: Some(1),
                },
            ]
        );
        assert_eq!(h.notifier.notices(), vec![notice]);
        assert_eq!(h.orchestrator.phase(), RolloverPhase::Idle);

        let Ok(Some(saved)) = h.store.previous_round_ranks().await else {
            panic!("previous ranks should be saved");
        };
        assert_eq!(saved.round_number, 1);
        assert_eq!(saved.ranks.get(&ProjectId::new(1)), Some(&1));
    }

    #[tokio::test]
    async fn skipped_rounds_roll_straight_to_the_clock() {
        let h = harness().await;
        assert!(h.orchestrator.check_and_roll_at(in_round(&h.clock, 1)).await.is_ok());

        let Ok(outcome) = h.orchestrator.check_and_roll_at(in_round(&h.clock, 4)).await else {
            panic!("tick should succeed");
        };
        assert!(matches!(outcome, RolloverOutcome::Rolled { from: 1, to: 4, .. }));
    }

    #[tokio::test]
    async fn unsynced_snapshot_bounds_the_wait() {
        let h = harness().await;
        // No balances at all: the snapshot never syncs.
        let started = std::time::Instant::now();
        let Ok(outcome) = h.orchestrator.check_and_roll_at(in_round(&h.clock, 1)).await else {
            panic!("tick should succeed");
        };
        assert!(matches!(outcome, RolloverOutcome::Initialized { .. }));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn concurrent_tick_is_skipped() {
        let h = harness().await;
        let _held = h.orchestrator.running.lock().await;
        assert!(matches!(
            h.orchestrator.check_and_roll_at(in_round(&h.clock, 1)).await,
            Ok(RolloverOutcome::Skipped)
        ));
        assert!(matches!(h.orchestrator.take_preview_snapshot().await, Ok(None)));
    }

    #[tokio::test]
    async fn preview_snapshot_targets_next_round() {
        let h = harness().await;
        assert!(matches!(h.orchestrator.take_preview_snapshot().await, Ok(None)));
        assert!(h.orchestrator.check_and_roll_at(in_round(&h.clock, 6)).await.is_ok());

        let Ok(Some(id)) = h.orchestrator.take_preview_snapshot().await else {
            panic!("preview should be taken");
        };
        let Ok(Some(snapshot)) = h.store.snapshot(id).await else {
            panic!("snapshot should exist");
        };
        assert_eq!(snapshot.round_number, 7);
    }
}

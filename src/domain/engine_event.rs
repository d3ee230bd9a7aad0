//! Domain events emitted by the engine's periodic steps.
//!
//! Every step publishes an [`EngineEvent`] through the [`super::EventBus`].
//! Events are broadcast to WebSocket subscribers filtered by
//! [`EventTopic`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SnapshotId;
use super::rank_diff::RankChangeNotice;
use super::ranking::ViewKind;

/// Coarse event category used for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    /// Snapshot creation.
    Snapshots,
    /// Balance sync passes.
    Balances,
    /// Ranking view refreshes and rank changes.
    Rankings,
    /// Round rollovers.
    Rounds,
}

impl EventTopic {
    /// Parses a topic name as sent by WebSocket clients.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "snapshots" => Some(Self::Snapshots),
            "balances" => Some(Self::Balances),
            "rankings" => Some(Self::Rankings),
            "rounds" => Some(Self::Rounds),
            _ => None,
        }
    }
}

/// Event emitted after an engine step completes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A snapshot transaction committed.
    SnapshotTaken {
        /// New snapshot.
        snapshot_id: SnapshotId,
        /// Round the snapshot counts for.
        round_number: i64,
        /// Boosting rows frozen.
        boosting_rows: u64,
        /// Placeholder balance rows created.
        balance_rows: u64,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// A balance sync pass finished.
    BalancesSynced {
        /// Balance rows filled during the pass.
        filled: u64,
        /// Fetch cursor after the pass (ms since the Unix epoch).
        cursor_ms: i64,
        /// Snapshots that became fully synced.
        synced_snapshots: Vec<SnapshotId>,
        /// Completion time.
        timestamp: DateTime<Utc>,
    },

    /// A ranking view was recomputed.
    RankingRefreshed {
        /// Refreshed view.
        view: ViewKind,
        /// Snapshot backing the view, if any.
        snapshot_id: Option<SnapshotId>,
        /// Number of ranked projects.
        project_count: usize,
        /// Computation time.
        timestamp: DateTime<Utc>,
    },

    /// The persisted round advanced.
    RoundRolledOver {
        /// Previous round, `None` on first initialisation.
        from_round: Option<i64>,
        /// New round.
        to_round: i64,
        /// Rollover time.
        timestamp: DateTime<Utc>,
    },

    /// Ranks moved between two rounds.
    RanksChanged {
        /// Diff handed to the notification emitter.
        notice: RankChangeNotice,
        /// Diff time.
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Returns the topic this event belongs to.
    #[must_use]
    pub const fn topic(&self) -> EventTopic {
        match self {
            Self::SnapshotTaken { .. } => EventTopic::Snapshots,
            Self::BalancesSynced { .. } => EventTopic::Balances,
            Self::RankingRefreshed { .. } | Self::RanksChanged { .. } => EventTopic::Rankings,
            Self::RoundRolledOver { .. } => EventTopic::Rounds,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::SnapshotTaken { .. } => "snapshot_taken",
            Self::BalancesSynced { .. } => "balances_synced",
            Self::RankingRefreshed { .. } => "ranking_refreshed",
            Self::RoundRolledOver { .. } => "round_rolled_over",
            Self::RanksChanged { .. } => "ranks_changed",
        }
    }
}

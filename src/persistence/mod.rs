//! Persistence layer: snapshot tables, singletons and live inputs.
//!
//! [`PowerStore`] is the single seam between the engine and storage. Two
//! implementations ship with the crate: [`memory::MemoryStore`] for tests
//! and local runs, and [`postgres::PostgresStore`] backed by `sqlx::PgPool`.
//!
//! The only multi-table atomic write is [`PowerStore::create_snapshot`].
//! Every other write is idempotent or guarded by compare-and-set, so
//! concurrent periodic tasks can share one store without extra locking.

pub mod memory;
pub mod models;
pub mod postgres;

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::snapshot::{
    BalanceSnapshot, BoostingSnapshot, InstantBalance, PowerInput, ProjectRecord, Snapshot,
    SnapshotReceipt,
};
use crate::domain::rank_diff::PreviousRoundRanks;
use crate::domain::{ProjectId, SnapshotId, UserId};
use crate::error::EngineError;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Storage contract of the snapshot and ranking engine.
#[async_trait]
pub trait PowerStore: Send + Sync + Debug {
    /// Returns the persisted current round, `None` before initialisation.
    async fn current_round(&self) -> Result<Option<i64>, EngineError>;

    /// Advances the round singleton from `expected` to `new`.
    ///
    /// Returns `false` without writing if the stored value is not
    /// `expected` or `new` would not increase it.
    async fn compare_and_set_round(
        &self,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool, EngineError>;

    /// Atomically creates a snapshot, freezes live boosting rows into it and
    /// adds one null balance row per distinct booster.
    ///
    /// With `eligible_only`, boosts of ineligible projects are left out.
    /// Nothing is visible if the call fails.
    async fn create_snapshot(
        &self,
        round_number: i64,
        time: DateTime<Utc>,
        eligible_only: bool,
    ) -> Result<SnapshotReceipt, EngineError>;

    /// Loads one snapshot.
    async fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, EngineError>;

    /// Most recent snapshots, newest first.
    async fn recent_snapshots(&self, limit: u32) -> Result<Vec<Snapshot>, EngineError>;

    /// Newest snapshot, optionally restricted to one round and to synced
    /// snapshots.
    async fn latest_snapshot(
        &self,
        round_number: Option<i64>,
        synced_only: bool,
    ) -> Result<Option<Snapshot>, EngineError>;

    /// Frozen boosting rows of a snapshot.
    async fn boosting_snapshots(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<BoostingSnapshot>, EngineError>;

    /// Balance rows of a snapshot.
    async fn balance_snapshots(&self, id: SnapshotId)
    -> Result<Vec<BalanceSnapshot>, EngineError>;

    /// Current fetch cursor in milliseconds; `0` before the first sync.
    async fn fetch_cursor(&self) -> Result<i64, EngineError>;

    /// Moves the fetch cursor from `expected` to `new` if `new >= expected`
    /// and the stored value still equals `expected`.
    async fn compare_and_set_fetch_cursor(
        &self,
        expected: i64,
        new: i64,
    ) -> Result<bool, EngineError>;

    /// Maps wallet addresses to user ids, case-insensitively. Unknown
    /// addresses are absent from the result; keys are lower-cased.
    async fn resolve_addresses(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, UserId>, EngineError>;

    /// Upserts a user's instant balance, keeping the newest source update.
    async fn upsert_instant_balance(&self, balance: InstantBalance) -> Result<(), EngineError>;

    /// Sets every null balance row of `user_id` to `balance`. Returns the
    /// number of rows filled.
    async fn fill_null_balances(&self, user_id: UserId, balance: f64)
    -> Result<u64, EngineError>;

    /// Fills the null balance rows of one snapshot from instant balances
    /// last updated at or before `as_of_ms`. Returns the number of rows
    /// filled.
    async fn carry_forward_balances(
        &self,
        snapshot_id: SnapshotId,
        as_of_ms: i64,
    ) -> Result<u64, EngineError>;

    /// Marks every unsynced snapshot without null balances as synced.
    async fn mark_complete_snapshots_synced(&self) -> Result<Vec<SnapshotId>, EngineError>;

    /// Snapshots not yet marked synced, oldest first.
    async fn unsynced_snapshots(&self) -> Result<Vec<Snapshot>, EngineError>;

    /// Increments a snapshot's failed sync attempt counter and returns it.
    async fn record_sync_attempt(&self, id: SnapshotId) -> Result<u32, EngineError>;

    /// Marks a snapshot synced even if balances are still null. Returns
    /// `false` if it was already synced.
    async fn force_mark_synced(&self, id: SnapshotId) -> Result<bool, EngineError>;

    /// Allocations and balances of one snapshot.
    async fn snapshot_power_inputs(&self, id: SnapshotId)
    -> Result<Vec<PowerInput>, EngineError>;

    /// Live boosting joined with instant balances.
    async fn instant_power_inputs(&self) -> Result<Vec<PowerInput>, EngineError>;

    /// All known projects with their current eligibility.
    async fn projects(&self) -> Result<Vec<ProjectRecord>, EngineError>;

    /// Replaces the saved previous-round ranks wholesale.
    async fn replace_previous_round_ranks(
        &self,
        round_number: i64,
        ranks: &[(ProjectId, u32)],
    ) -> Result<(), EngineError>;

    /// Ranks saved at the last rollover, `None` before the first one.
    async fn previous_round_ranks(&self) -> Result<Option<PreviousRoundRanks>, EngineError>;
}

//! In-process [`PowerStore`] behind a single async lock.
//!
//! All tables live in one [`MemoryState`] guarded by a
//! [`tokio::sync::RwLock`]. A snapshot write builds every row first and
//! commits them under one write guard, which gives the same all-or-nothing
//! visibility as a database transaction.
//!
//! Besides the [`PowerStore`] contract the store exposes the live-table
//! mutators (users, projects, boosts) that the surrounding platform owns in
//! production.

use std::collections::{BTreeMap, BTreeSet, HashMap};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::PowerStore;
use crate::domain::snapshot::{
    BalanceSnapshot, Boosting, BoostingSnapshot, InstantBalance, PowerInput, ProjectRecord,
    Snapshot, SnapshotReceipt,
};
use crate::domain::rank_diff::PreviousRoundRanks;
use crate::domain::{ProjectId, SnapshotId, UserId};
use crate::error::EngineError;

#[derive(Debug)]
struct StoredSnapshot {
    snapshot: Snapshot,
    sync_attempts: u32,
}

#[derive(Debug, Default)]
struct MemoryState {
    round: Option<i64>,
    fetch_cursor: i64,
    addresses: HashMap<String, UserId>,
    projects: BTreeMap<ProjectId, bool>,
    boosting: BTreeMap<(UserId, ProjectId), f64>,
    snapshots: BTreeMap<SnapshotId, StoredSnapshot>,
    boosting_snapshots: Vec<BoostingSnapshot>,
    balance_snapshots: Vec<BalanceSnapshot>,
    instant: HashMap<UserId, InstantBalance>,
    previous_ranks: Option<PreviousRoundRanks>,
    next_snapshot_id: i64,
    next_row_id: i64,
}

impl MemoryState {
    fn next_row_id(&mut self) -> i64 {
        self.next_row_id = self.next_row_id.saturating_add(1);
        self.next_row_id
    }
}

/// In-memory implementation of [`PowerStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    #[cfg(test)]
    fail_next_snapshot: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user and their wallet address.
    pub async fn register_user(&self, user_id: UserId, address: &str) {
        let mut state = self.state.write().await;
        state.addresses.insert(address.to_lowercase(), user_id);
    }

    /// Inserts or updates a project's eligibility.
    pub async fn upsert_project(&self, project_id: ProjectId, eligible: bool) {
        self.state
            .write()
            .await
            .projects
            .insert(project_id, eligible);
    }

    /// Sets a live allocation. A zero or negative percentage removes it.
    pub async fn set_boosting(&self, boosting: Boosting) {
        let mut state = self.state.write().await;
        let key = (boosting.user_id, boosting.project_id);
        if boosting.percentage > 0.0 {
            state.boosting.insert(key, boosting.percentage);
        } else {
            state.boosting.remove(&key);
        }
    }

    /// Returns every live allocation.
    pub async fn live_boostings(&self) -> Vec<Boosting> {
        self.state
            .read()
            .await
            .boosting
            .iter()
            .map(|(&(user_id, project_id), &percentage)| Boosting {
                user_id,
                project_id,
                percentage,
            })
            .collect()
    }

    /// Returns a user's instant balance, if any.
    pub async fn instant_balance(&self, user_id: UserId) -> Option<InstantBalance> {
        self.state.read().await.instant.get(&user_id).copied()
    }

    /// Makes the next [`PowerStore::create_snapshot`] fail after its rows
    /// were staged.
    #[cfg(test)]
    pub(crate) fn fail_next_snapshot(&self) {
        self.fail_next_snapshot.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PowerStore for MemoryStore {
    async fn current_round(&self) -> Result<Option<i64>, EngineError> {
        Ok(self.state.read().await.round)
    }

    async fn compare_and_set_round(
        &self,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        if state.round != expected || expected.is_some_and(|current| new <= current) {
            return Ok(false);
        }
        state.round = Some(new);
        Ok(true)
    }

    async fn create_snapshot(
        &self,
        round_number: i64,
        time: DateTime<Utc>,
        eligible_only: bool,
    ) -> Result<SnapshotReceipt, EngineError> {
        let mut state = self.state.write().await;

        let snapshot_id = SnapshotId::new(state.next_snapshot_id.saturating_add(1));
        let frozen: Vec<(UserId, ProjectId, f64)> = state
            .boosting
            .iter()
            .filter(|&(&(_, project_id), &percentage)| {
                percentage > 0.0
                    && (!eligible_only
                        || state.projects.get(&project_id).copied().unwrap_or(false))
            })
            .map(|(&(user_id, project_id), &percentage)| (user_id, project_id, percentage))
            .collect();

        let mut boosting_rows = Vec::with_capacity(frozen.len());
        let mut boosters: BTreeSet<UserId> = BTreeSet::new();
        for (user_id, project_id, percentage) in frozen {
            boosting_rows.push(BoostingSnapshot {
                id: state.next_row_id(),
                snapshot_id,
                user_id,
                project_id,
                percentage,
            });
            boosters.insert(user_id);
        }
        let balance_rows: Vec<BalanceSnapshot> = boosters
            .into_iter()
            .map(|user_id| BalanceSnapshot {
                id: state.next_row_id(),
                snapshot_id,
                user_id,
                balance: None,
            })
            .collect();

        #[cfg(test)]
        if self.fail_next_snapshot.swap(false, Ordering::SeqCst) {
            return Err(EngineError::PersistenceError(
                "injected snapshot failure".to_string(),
            ));
        }

        let snapshot = Snapshot {
            id: snapshot_id,
            time,
            block_number: None,
            round_number,
            synced: false,
        };
        let receipt = SnapshotReceipt {
            snapshot: snapshot.clone(),
            boosting_rows: boosting_rows.len() as u64,
            balance_rows: balance_rows.len() as u64,
        };

        state.next_snapshot_id = snapshot_id.get();
        state.snapshots.insert(
            snapshot_id,
            StoredSnapshot {
                snapshot,
                sync_attempts: 0,
            },
        );
        state.boosting_snapshots.extend(boosting_rows);
        state.balance_snapshots.extend(balance_rows);
        Ok(receipt)
    }

    async fn snapshot(&self, id: SnapshotId) -> Result<Option<Snapshot>, EngineError> {
        let state = self.state.read().await;
        Ok(state.snapshots.get(&id).map(|s| s.snapshot.clone()))
    }

    async fn recent_snapshots(&self, limit: u32) -> Result<Vec<Snapshot>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .values()
            .rev()
            .take(limit as usize)
            .map(|s| s.snapshot.clone())
            .collect())
    }

    async fn latest_snapshot(
        &self,
        round_number: Option<i64>,
        synced_only: bool,
    ) -> Result<Option<Snapshot>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .values()
            .rev()
            .map(|s| &s.snapshot)
            .find(|s| {
                round_number.is_none_or(|round| s.round_number == round)
                    && (!synced_only || s.synced)
            })
            .cloned())
    }

    async fn boosting_snapshots(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<BoostingSnapshot>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .boosting_snapshots
            .iter()
            .filter(|row| row.snapshot_id == id)
            .copied()
            .collect())
    }

    async fn balance_snapshots(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<BalanceSnapshot>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .balance_snapshots
            .iter()
            .filter(|row| row.snapshot_id == id)
            .copied()
            .collect())
    }

    async fn fetch_cursor(&self) -> Result<i64, EngineError> {
        Ok(self.state.read().await.fetch_cursor)
    }

    async fn compare_and_set_fetch_cursor(
        &self,
        expected: i64,
        new: i64,
    ) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        if state.fetch_cursor != expected || new < expected {
            return Ok(false);
        }
        state.fetch_cursor = new;
        Ok(true)
    }

    async fn resolve_addresses(
        &self,
        addresses: &[String],
    ) -> Result<HashMap<String, UserId>, EngineError> {
        let state = self.state.read().await;
        Ok(addresses
            .iter()
            .map(|address| address.to_lowercase())
            .filter_map(|address| {
                state
                    .addresses
                    .get(&address)
                    .map(|&user_id| (address, user_id))
            })
            .collect())
    }

    async fn upsert_instant_balance(&self, balance: InstantBalance) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let newer = state
            .instant
            .get(&balance.user_id)
            .is_none_or(|existing| existing.source_updated_at_ms <= balance.source_updated_at_ms);
        if newer {
            state.instant.insert(balance.user_id, balance);
        }
        Ok(())
    }

    async fn fill_null_balances(
        &self,
        user_id: UserId,
        balance: f64,
    ) -> Result<u64, EngineError> {
        let mut state = self.state.write().await;
        let mut filled = 0_u64;
        for row in state
            .balance_snapshots
            .iter_mut()
            .filter(|row| row.user_id == user_id && row.balance.is_none())
        {
            row.balance = Some(balance);
            filled = filled.saturating_add(1);
        }
        Ok(filled)
    }

    async fn carry_forward_balances(
        &self,
        snapshot_id: SnapshotId,
        as_of_ms: i64,
    ) -> Result<u64, EngineError> {
        let mut state = self.state.write().await;
        let MemoryState {
            balance_snapshots,
            instant,
            ..
        } = &mut *state;
        let mut filled = 0_u64;
        for row in balance_snapshots
            .iter_mut()
            .filter(|row| row.snapshot_id == snapshot_id && row.balance.is_none())
        {
            let known = instant
                .get(&row.user_id)
                .filter(|b| b.source_updated_at_ms <= as_of_ms);
            if let Some(known) = known {
                row.balance = Some(known.balance);
                filled = filled.saturating_add(1);
            }
        }
        Ok(filled)
    }

    async fn mark_complete_snapshots_synced(&self) -> Result<Vec<SnapshotId>, EngineError> {
        let mut state = self.state.write().await;
        let MemoryState {
            snapshots,
            balance_snapshots,
            ..
        } = &mut *state;

        let mut synced = Vec::new();
        for stored in snapshots.values_mut().filter(|s| !s.snapshot.synced) {
            let id = stored.snapshot.id;
            let complete = balance_snapshots
                .iter()
                .filter(|row| row.snapshot_id == id)
                .all(|row| row.balance.is_some());
            if complete {
                stored.snapshot.synced = true;
                synced.push(id);
            }
        }
        Ok(synced)
    }

    async fn unsynced_snapshots(&self) -> Result<Vec<Snapshot>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .values()
            .filter(|s| !s.snapshot.synced)
            .map(|s| s.snapshot.clone())
            .collect())
    }

    async fn record_sync_attempt(&self, id: SnapshotId) -> Result<u32, EngineError> {
        let mut state = self.state.write().await;
        let stored = state
            .snapshots
            .get_mut(&id)
            .ok_or(EngineError::SnapshotNotFound(id))?;
        stored.sync_attempts = stored.sync_attempts.saturating_add(1);
        Ok(stored.sync_attempts)
    }

    async fn force_mark_synced(&self, id: SnapshotId) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        let stored = state
            .snapshots
            .get_mut(&id)
            .ok_or(EngineError::SnapshotNotFound(id))?;
        if stored.snapshot.synced {
            return Ok(false);
        }
        stored.snapshot.synced = true;
        Ok(true)
    }

    async fn snapshot_power_inputs(
        &self,
        id: SnapshotId,
    ) -> Result<Vec<PowerInput>, EngineError> {
        let state = self.state.read().await;
        let balances: HashMap<UserId, Option<f64>> = state
            .balance_snapshots
            .iter()
            .filter(|row| row.snapshot_id == id)
            .map(|row| (row.user_id, row.balance))
            .collect();
        Ok(state
            .boosting_snapshots
            .iter()
            .filter(|row| row.snapshot_id == id)
            .map(|row| PowerInput {
                project_id: row.project_id,
                percentage: row.percentage,
                balance: balances.get(&row.user_id).copied().flatten(),
            })
            .collect())
    }

    async fn instant_power_inputs(&self) -> Result<Vec<PowerInput>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .boosting
            .iter()
            .map(|(&(user_id, project_id), &percentage)| PowerInput {
                project_id,
                percentage,
                balance: state.instant.get(&user_id).map(|b| b.balance),
            })
            .collect())
    }

    async fn projects(&self) -> Result<Vec<ProjectRecord>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .projects
            .iter()
            .map(|(&id, &eligible)| ProjectRecord { id, eligible })
            .collect())
    }

    async fn replace_previous_round_ranks(
        &self,
        round_number: i64,
        ranks: &[(ProjectId, u32)],
    ) -> Result<(), EngineError> {
        self.state.write().await.previous_ranks = Some(PreviousRoundRanks {
            round_number,
            ranks: ranks.iter().copied().collect(),
        });
        Ok(())
    }

    async fn previous_round_ranks(&self) -> Result<Option<PreviousRoundRanks>, EngineError> {
        Ok(self.state.read().await.previous_ranks.clone())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn boost(user: i64, project: i64, percentage: f64) -> Boosting {
        Boosting {
            user_id: UserId::new(user),
            project_id: ProjectId::new(project),
            percentage,
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.upsert_project(ProjectId::new(1), true).await;
        store.upsert_project(ProjectId::new(2), true).await;
        store.upsert_project(ProjectId::new(3), false).await;
        store.set_boosting(boost(10, 1, 50.0)).await;
        store.set_boosting(boost(10, 2, 50.0)).await;
        store.set_boosting(boost(11, 1, 100.0)).await;
        store.set_boosting(boost(12, 3, 100.0)).await;
        store
    }

    async fn take(store: &MemoryStore, eligible_only: bool) -> SnapshotReceipt {
        let Ok(receipt) = store.create_snapshot(1, Utc::now(), eligible_only).await else {
            panic!("snapshot failed");
        };
        receipt
    }

    #[tokio::test]
    async fn balance_rows_match_distinct_boosters() {
        let store = seeded().await;
        let receipt = take(&store, false).await;
        let id = receipt.snapshot.id;

        let boosters: BTreeSet<UserId> = store
            .boosting_snapshots(id)
            .await
            .unwrap_or_default()
            .iter()
            .map(|row| row.user_id)
            .collect();
        let balances = store.balance_snapshots(id).await.unwrap_or_default();
        let holders: BTreeSet<UserId> = balances.iter().map(|row| row.user_id).collect();

        assert_eq!(receipt.boosting_rows, 4);
        assert_eq!(balances.len(), 3);
        assert_eq!(boosters, holders);
        assert!(balances.iter().all(|row| row.balance.is_none()));
    }

    #[tokio::test]
    async fn many_boosters_get_one_balance_row_each() {
        let store = MemoryStore::new();
        for project in 1..=5 {
            store.upsert_project(ProjectId::new(project), true).await;
        }
        for user in 1..=500 {
            for project in 1..=5 {
                store.set_boosting(boost(user, project, 20.0)).await;
            }
        }

        let receipt = take(&store, true).await;
        assert_eq!(receipt.boosting_rows, 2_500);
        assert_eq!(receipt.balance_rows, 500);

        let balances = store
            .balance_snapshots(receipt.snapshot.id)
            .await
            .unwrap_or_default();
        let holders: BTreeSet<UserId> = balances.iter().map(|row| row.user_id).collect();
        assert_eq!(holders.len(), 500);
    }

    #[tokio::test]
    async fn eligible_only_skips_ineligible_projects() {
        let store = seeded().await;
        let receipt = take(&store, true).await;
        assert_eq!(receipt.boosting_rows, 3);
        assert_eq!(receipt.balance_rows, 2);
    }

    #[tokio::test]
    async fn snapshot_is_frozen_against_live_changes() {
        let store = seeded().await;
        let receipt = take(&store, false).await;
        let before = store
            .boosting_snapshots(receipt.snapshot.id)
            .await
            .unwrap_or_default();

        store.set_boosting(boost(10, 1, 5.0)).await;
        store.set_boosting(boost(11, 1, 0.0)).await;
        let after = store
            .boosting_snapshots(receipt.snapshot.id)
            .await
            .unwrap_or_default();

        assert_eq!(before, after);
        assert_eq!(store.live_boostings().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_snapshot_leaves_no_rows() {
        let store = seeded().await;
        store.fail_next_snapshot();
        let failed = store.create_snapshot(1, Utc::now(), false).await;
        assert!(failed.is_err());
        assert!(store.recent_snapshots(10).await.unwrap_or_default().is_empty());

        let receipt = take(&store, false).await;
        assert_eq!(receipt.snapshot.id, SnapshotId::new(1));
        assert_eq!(
            store
                .balance_snapshots(receipt.snapshot.id)
                .await
                .unwrap_or_default()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn second_snapshot_does_not_touch_first() {
        let store = seeded().await;
        let first = take(&store, false).await;
        let _ = store.fill_null_balances(UserId::new(10), 40.0).await;
        let rows_before = store
            .balance_snapshots(first.snapshot.id)
            .await
            .unwrap_or_default();

        let second = take(&store, false).await;
        assert_ne!(first.snapshot.id, second.snapshot.id);
        assert_eq!(
            store
                .balance_snapshots(first.snapshot.id)
                .await
                .unwrap_or_default(),
            rows_before
        );
    }

    #[tokio::test]
    async fn round_cas_only_moves_forward() {
        let store = MemoryStore::new();
        assert_eq!(store.compare_and_set_round(Some(1), 2).await.ok(), Some(false));
        assert_eq!(store.compare_and_set_round(None, 5).await.ok(), Some(true));
        assert_eq!(store.compare_and_set_round(None, 6).await.ok(), Some(false));
        assert_eq!(store.compare_and_set_round(Some(5), 4).await.ok(), Some(false));
        assert_eq!(store.compare_and_set_round(Some(5), 6).await.ok(), Some(true));
        assert_eq!(store.current_round().await.ok().flatten(), Some(6));
    }

    #[tokio::test]
    async fn cursor_cas_rejects_stale_and_backward_moves() {
        let store = MemoryStore::new();
        assert_eq!(store.compare_and_set_fetch_cursor(0, 100).await.ok(), Some(true));
        assert_eq!(store.compare_and_set_fetch_cursor(0, 200).await.ok(), Some(false));
        assert_eq!(store.compare_and_set_fetch_cursor(100, 50).await.ok(), Some(false));
        assert_eq!(store.fetch_cursor().await.ok(), Some(100));
    }

    #[tokio::test]
    async fn filled_balances_are_never_overwritten() {
        let store = seeded().await;
        let receipt = take(&store, false).await;
        assert_eq!(store.fill_null_balances(UserId::new(10), 1.0).await.ok(), Some(1));
        assert_eq!(store.fill_null_balances(UserId::new(10), 2.0).await.ok(), Some(0));

        let rows = store
            .balance_snapshots(receipt.snapshot.id)
            .await
            .unwrap_or_default();
        let Some(row) = rows.iter().find(|r| r.user_id == UserId::new(10)) else {
            panic!("missing balance row");
        };
        assert_eq!(row.balance, Some(1.0));
    }

    #[tokio::test]
    async fn marks_snapshot_synced_once_complete() {
        let store = seeded().await;
        let receipt = take(&store, true).await;
        let _ = store.fill_null_balances(UserId::new(10), 1.0).await;
        assert_eq!(
            store.mark_complete_snapshots_synced().await.unwrap_or_default(),
            Vec::<SnapshotId>::new()
        );

        let _ = store.fill_null_balances(UserId::new(11), 1.0).await;
        assert_eq!(
            store.mark_complete_snapshots_synced().await.unwrap_or_default(),
            vec![receipt.snapshot.id]
        );
        assert!(store
            .mark_complete_snapshots_synced()
            .await
            .unwrap_or_default()
            .is_empty());
    }

    #[tokio::test]
    async fn instant_balance_keeps_newest_update() {
        let store = MemoryStore::new();
        let user = UserId::new(1);
        let _ = store
            .upsert_instant_balance(InstantBalance {
                user_id: user,
                balance: 10.0,
                source_updated_at_ms: 200,
            })
            .await;
        let _ = store
            .upsert_instant_balance(InstantBalance {
                user_id: user,
                balance: 5.0,
                source_updated_at_ms: 100,
            })
            .await;
        assert_eq!(store.instant_balance(user).await.map(|b| b.balance), Some(10.0));
    }

    #[tokio::test]
    async fn previous_ranks_are_replaced_wholesale() {
        let store = MemoryStore::new();
        let _ = store
            .replace_previous_round_ranks(3, &[(ProjectId::new(1), 1), (ProjectId::new(2), 2)])
            .await;
        let _ = store
            .replace_previous_round_ranks(4, &[(ProjectId::new(7), 1)])
            .await;
        let Ok(Some(saved)) = store.previous_round_ranks().await else {
            panic!("expected saved ranks");
        };
        assert_eq!(saved.round_number, 4);
        assert_eq!(saved.ranks.len(), 1);
        assert_eq!(saved.ranks.get(&ProjectId::new(7)), Some(&1));
    }

    #[tokio::test]
    async fn resolves_addresses_case_insensitively() {
        let store = MemoryStore::new();
        store.register_user(UserId::new(4), "0xAbC").await;
        let resolved = store
            .resolve_addresses(&["0xABC".to_string(), "0xdead".to_string()])
            .await
            .unwrap_or_default();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.get("0xabc"), Some(&UserId::new(4)));
    }

    #[tokio::test]
    async fn carry_forward_only_uses_balances_known_at_snapshot_time() {
        let store = seeded().await;
        let receipt = take(&store, false).await;
        let as_of = receipt.snapshot.time.timestamp_millis();
        for (user, balance, updated_at) in [(10, 8.0, as_of - 1), (11, 9.0, as_of + 1)] {
            let _ = store
                .upsert_instant_balance(InstantBalance {
                    user_id: UserId::new(user),
                    balance,
                    source_updated_at_ms: updated_at,
                })
                .await;
        }

        let filled = store
            .carry_forward_balances(receipt.snapshot.id, as_of)
            .await
            .unwrap_or_default();
        assert_eq!(filled, 1);

        let rows = store
            .balance_snapshots(receipt.snapshot.id)
            .await
            .unwrap_or_default();
        let balance_of = |user: i64| {
            rows.iter()
                .find(|r| r.user_id == UserId::new(user))
                .and_then(|r| r.balance)
        };
        assert_eq!(balance_of(10), Some(8.0));
        assert_eq!(balance_of(11), None);
        assert_eq!(balance_of(12), None);
    }
}

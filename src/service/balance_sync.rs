//! Reconciles snapshot balances against the external balance source.
//!
//! One pass reads the fetch cursor, pages through every update newer than
//! it, writes instant balances, fills null snapshot balances and finally
//! marks complete snapshots synced. The cursor moves forward by compare-and-
//! set after each fully processed page, so a failed page is re-fetched by
//! the next pass and no update is ever skipped.
//!
//! Users whose balance did not change since the cursor never show up in a
//! page. Once the source has indexed past a snapshot's time and the pages
//! are drained, their null rows are filled from the instant balance they
//! had at snapshot time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::clients::BalanceSource;
use crate::domain::snapshot::{BalanceUpdate, InstantBalance};
use crate::domain::{EngineEvent, EventBus, SnapshotId};
use crate::error::EngineError;
use crate::persistence::PowerStore;

/// Backoff between in-pass retries of a transient balance source failure.
pub const DEFAULT_RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_secs(1),
    Duration::from_secs(4),
];

/// Outcome of one completed sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Null balance rows filled during the pass.
    pub filled: u64,
    /// Whether the fetch cursor moved.
    pub cursor_advanced: bool,
    /// Fetch cursor after the pass, in milliseconds.
    pub cursor_ms: i64,
    /// Non-empty pages processed.
    pub pages: u32,
    /// Snapshots marked synced by this pass, including forced ones.
    pub synced_snapshots: Vec<SnapshotId>,
}

/// Balance sync client.
#[derive(Debug)]
pub struct BalanceSyncService {
    store: Arc<dyn PowerStore>,
    source: Arc<dyn BalanceSource>,
    event_bus: EventBus,
    page_size: u32,
    retry_budget: u32,
    retry_backoff: Vec<Duration>,
    running: Mutex<()>,
}

impl BalanceSyncService {
    /// Creates a sync service using [`DEFAULT_RETRY_BACKOFF`].
    ///
    /// `retry_budget` is the number of caught-up passes after which an
    /// incomplete snapshot is force-marked synced; `0` disables forcing.
    #[must_use]
    pub fn new(
        store: Arc<dyn PowerStore>,
        source: Arc<dyn BalanceSource>,
        event_bus: EventBus,
        page_size: u32,
        retry_budget: u32,
    ) -> Self {
        Self {
            store,
            source,
            event_bus,
            page_size: page_size.max(1),
            retry_budget,
            retry_backoff: DEFAULT_RETRY_BACKOFF.to_vec(),
            running: Mutex::new(()),
        }
    }

    /// Replaces the in-pass retry backoff schedule.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Runs one sync pass.
    ///
    /// Returns `Ok(None)` without doing anything when another pass is
    /// still running.
    ///
    /// # Errors
    ///
    /// Returns the balance source or persistence error that ended the
    /// pass. Pages processed before the failure stay applied and the cursor
    /// reflects them.
    pub async fn sync_balances(&self) -> Result<Option<SyncResult>, EngineError> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("balance sync already running, skipping");
            return Ok(None);
        };

        let start_cursor = self.store.fetch_cursor().await?;
        // Read before paging: once the pages are drained, every update up to
        // this point has been applied.
        let indexed_before = if self.store.unsynced_snapshots().await?.is_empty() {
            None
        } else {
            match self.source.latest_indexed_timestamp().await {
                Ok(indexed) => Some(indexed),
                Err(err) => {
                    tracing::warn!(error = %err, "latest indexed timestamp unavailable");
                    None
                }
            }
        };
        let mut drained = false;
        let mut result = SyncResult {
            cursor_ms: start_cursor,
            ..SyncResult::default()
        };

        let mut skip: u32 = 0;
        loop {
            let page = self
                .fetch_page_with_retry(start_cursor, skip, self.page_size)
                .await?;
            let Some(page_max) = page.iter().map(|b| b.updated_at).max() else {
                drained = true;
                break;
            };
            let full_page = page.len() >= self.page_size as usize;

            result.filled += self.apply_page(page).await?;
            result.pages += 1;

            if page_max > result.cursor_ms {
                let advanced = self
                    .store
                    .compare_and_set_fetch_cursor(result.cursor_ms, page_max)
                    .await?;
                if !advanced {
                    tracing::warn!(
                        expected = result.cursor_ms,
                        new = page_max,
                        "fetch cursor moved concurrently, ending pass"
                    );
                    break;
                }
                result.cursor_ms = page_max;
                result.cursor_advanced = true;
            }

            if !full_page {
                drained = true;
                break;
            }
            skip = skip.saturating_add(self.page_size);
        }

        let indexed_through = indexed_before
            .filter(|_| drained)
            .map(|indexed| indexed.max(result.cursor_ms));
        if let Some(indexed_through) = indexed_through {
            result.filled += self.carry_forward(indexed_through).await?;
        }

        result.synced_snapshots = self.store.mark_complete_snapshots_synced().await?;
        if let Some(indexed_through) = indexed_through.filter(|_| self.retry_budget > 0) {
            let forced = self.spend_retry_budget(indexed_through).await?;
            result.synced_snapshots.extend(forced);
        }

        tracing::info!(
            filled = result.filled,
            pages = result.pages,
            cursor_ms = result.cursor_ms,
            synced = result.synced_snapshots.len(),
            "balance sync pass finished"
        );

        let _ = self.event_bus.publish(EngineEvent::BalancesSynced {
            filled: result.filled,
            cursor_ms: result.cursor_ms,
            synced_snapshots: result.synced_snapshots.clone(),
            timestamp: Utc::now(),
        });

        Ok(Some(result))
    }

    async fn fetch_page_with_retry(
        &self,
        after_ms: i64,
        skip: u32,
        take: u32,
    ) -> Result<Vec<BalanceUpdate>, EngineError> {
        let mut attempt = 0;
        loop {
            match self.source.fetch_balances(after_ms, skip, take).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() => {
                    let Some(&delay) = self.retry_backoff.get(attempt) else {
                        return Err(err);
                    };
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "balance source failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Writes one page. Returns the number of snapshot balance rows filled.
    async fn apply_page(&self, page: Vec<BalanceUpdate>) -> Result<u64, EngineError> {
        // Keep only the newest update per address.
        let mut newest: HashMap<String, BalanceUpdate> = HashMap::new();
        for update in page {
            if !update.balance.is_finite() {
                tracing::warn!(address = %update.address, "ignoring non-finite balance");
                continue;
            }
            let key = update.address.to_lowercase();
            match newest.get(&key) {
                Some(existing) if existing.updated_at > update.updated_at => {}
                _ => {
                    newest.insert(key, update);
                }
            }
        }

        let addresses: Vec<String> = newest.keys().cloned().collect();
        let users = self.store.resolve_addresses(&addresses).await?;

        let mut filled = 0;
        for (address, update) in newest {
            let Some(&user_id) = users.get(&address) else {
                tracing::debug!(%address, "balance update for unknown address");
                continue;
            };
            self.store
                .upsert_instant_balance(InstantBalance {
                    user_id,
                    balance: update.balance,
                    source_updated_at_ms: update.updated_at,
                })
                .await?;
            filled += self.store.fill_null_balances(user_id, update.balance).await?;
        }
        Ok(filled)
    }

    /// Fills the remaining null balances of every snapshot the source has
    /// covered with the balance each user had at snapshot time.
    async fn carry_forward(&self, indexed_through: i64) -> Result<u64, EngineError> {
        let mut filled = 0;
        for snapshot in self.store.unsynced_snapshots().await? {
            let as_of = snapshot.time.timestamp_millis();
            if as_of <= indexed_through {
                filled += self.store.carry_forward_balances(snapshot.id, as_of).await?;
            }
        }
        Ok(filled)
    }

    /// Counts a failed attempt against every unsynced snapshot the source
    /// has already covered, forcing those past the budget.
    async fn spend_retry_budget(
        &self,
        indexed_through: i64,
    ) -> Result<Vec<SnapshotId>, EngineError> {
        let mut forced = Vec::new();
        for snapshot in self.store.unsynced_snapshots().await? {
            if snapshot.time.timestamp_millis() > indexed_through {
                continue;
            }
            let attempts = self.store.record_sync_attempt(snapshot.id).await?;
            if attempts < self.retry_budget {
                continue;
            }
            if self.store.force_mark_synced(snapshot.id).await? {
                tracing::warn!(
                    snapshot_id = %snapshot.id,
                    attempts,
                    "snapshot marked synced with unresolved balances"
                );
                forced.push(snapshot.id);
            }
        }
        Ok(forced)
    }
}

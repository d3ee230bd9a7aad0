//! Freezes live boosting into a snapshot for a round.

use std::sync::Arc;

use chrono::Utc;

use crate::domain::snapshot::SnapshotReceipt;
use crate::domain::{EngineEvent, EventBus};
use crate::error::EngineError;
use crate::persistence::PowerStore;

/// Takes snapshots and announces them on the event bus.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn PowerStore>,
    event_bus: EventBus,
    eligible_only: bool,
}

impl SnapshotWriter {
    /// Creates a writer. With `eligible_only`, boosts of projects that are
    /// not eligible at snapshot time are left out of the snapshot.
    #[must_use]
    pub fn new(store: Arc<dyn PowerStore>, event_bus: EventBus, eligible_only: bool) -> Self {
        Self {
            store,
            event_bus,
            eligible_only,
        }
    }

    /// Snapshots the live boosting table for `round_number`.
    ///
    /// The write is all-or-nothing; on error no snapshot, boosting or
    /// balance row is visible and the call can simply be repeated.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PersistenceError`] if the transaction fails.
    pub async fn take_snapshot(&self, round_number: i64) -> Result<SnapshotReceipt, EngineError> {
        let receipt = self
            .store
            .create_snapshot(round_number, Utc::now(), self.eligible_only)
            .await?;

        tracing::info!(
            snapshot_id = %receipt.snapshot.id,
            round = round_number,
            boosting_rows = receipt.boosting_rows,
            balance_rows = receipt.balance_rows,
            "snapshot taken"
        );

        let _ = self.event_bus.publish(EngineEvent::SnapshotTaken {
            snapshot_id: receipt.snapshot.id,
            round_number,
            boosting_rows: receipt.boosting_rows,
            balance_rows: receipt.balance_rows,
            timestamp: receipt.snapshot.time,
        });

        Ok(receipt)
    }
}

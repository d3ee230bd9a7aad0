//! Service layer: the engine's periodic steps.
//!
//! [`SnapshotWriter`] freezes live boosting, [`BalanceSyncService`] fills
//! snapshot balances from the balance source, [`RankingEngine`] serves the
//! cached ranking views and [`RolloverOrchestrator`] advances rounds. Each
//! step publishes its outcome on the [`super::domain::EventBus`].

pub mod balance_sync;
pub mod ranking_engine;
pub mod rollover;
pub mod scheduler;
pub mod snapshot_writer;
#[cfg(test)]
pub(crate) mod test_support;

pub use balance_sync::{BalanceSyncService, SyncResult};
pub use ranking_engine::RankingEngine;
pub use rollover::{
    PropagationWait, RolloverDeps, RolloverOrchestrator, RolloverOutcome, RolloverPhase,
};
pub use scheduler::spawn_periodic;
pub use snapshot_writer::SnapshotWriter;

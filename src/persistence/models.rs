//! Database row shapes and their conversion into domain records.

use chrono::{DateTime, Utc};

use crate::domain::snapshot::{BalanceSnapshot, BoostingSnapshot, PowerInput, Snapshot};
use crate::domain::{ProjectId, SnapshotId, UserId};

/// `power_snapshot` columns: id, time, block_number, round_number, synced.
pub type SnapshotRow = (i64, DateTime<Utc>, Option<i64>, i64, bool);

/// `power_boosting_snapshot` columns: id, snapshot_id, user_id, project_id,
/// percentage.
pub type BoostingSnapshotRow = (i64, i64, i64, i64, f64);

/// `power_balance_snapshot` columns: id, snapshot_id, user_id, balance.
pub type BalanceSnapshotRow = (i64, i64, i64, Option<f64>);

/// Joined (project_id, percentage, balance) row feeding a ranking view.
pub type PowerInputRow = (i64, f64, Option<f64>);

/// Column list matching [`SnapshotRow`].
pub const SNAPSHOT_COLUMNS: &str = "id, time, block_number, round_number, synced";

/// Converts a `power_snapshot` row.
#[must_use]
pub fn snapshot_from_row(
    (id, time, block_number, round_number, synced): SnapshotRow,
) -> Snapshot {
    Snapshot {
        id: SnapshotId::new(id),
        time,
        block_number,
        round_number,
        synced,
    }
}

/// Converts a `power_boosting_snapshot` row.
#[must_use]
pub fn boosting_snapshot_from_row(
    (id, snapshot_id, user_id, project_id, percentage): BoostingSnapshotRow,
) -> BoostingSnapshot {
    BoostingSnapshot {
        id,
        snapshot_id: SnapshotId::new(snapshot_id),
        user_id: UserId::new(user_id),
        project_id: ProjectId::new(project_id),
        percentage,
    }
}

/// Converts a `power_balance_snapshot` row.
#[must_use]
pub fn balance_snapshot_from_row(
    (id, snapshot_id, user_id, balance): BalanceSnapshotRow,
) -> BalanceSnapshot {
    BalanceSnapshot {
        id,
        snapshot_id: SnapshotId::new(snapshot_id),
        user_id: UserId::new(user_id),
        balance,
    }
}

/// Converts a joined power input row.
#[must_use]
pub fn power_input_from_row((project_id, percentage, balance): PowerInputRow) -> PowerInput {
    PowerInput {
        project_id: ProjectId::new(project_id),
        percentage,
        balance,
    }
}

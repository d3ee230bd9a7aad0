//! Snapshot-side records: live boosts, frozen copies and balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ProjectId, SnapshotId, UserId};

/// A live allocation: `user` gives `percentage` of their power to `project`.
///
/// One row per (user, project). Percentages of one user need not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boosting {
    /// Booster.
    pub user_id: UserId,
    /// Boosted project.
    pub project_id: ProjectId,
    /// Share of the user's voting power, 0 to 100.
    pub percentage: f64,
}

/// A frozen point-in-time copy of the boosting table tied to a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Snapshot {
    /// Snapshot id.
    pub id: SnapshotId,
    /// When the snapshot was taken.
    pub time: DateTime<Utc>,
    /// Chain block the balances correspond to, when known.
    pub block_number: Option<i64>,
    /// Round the snapshot counts for.
    pub round_number: i64,
    /// `true` once every balance row has been resolved.
    pub synced: bool,
}

/// Result of a successful snapshot write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReceipt {
    /// The created snapshot row.
    pub snapshot: Snapshot,
    /// Number of boosting rows copied.
    pub boosting_rows: u64,
    /// Number of placeholder balance rows created.
    pub balance_rows: u64,
}

/// One frozen boosting row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoostingSnapshot {
    /// Row id.
    pub id: i64,
    /// Owning snapshot.
    pub snapshot_id: SnapshotId,
    /// Booster.
    pub user_id: UserId,
    /// Boosted project.
    pub project_id: ProjectId,
    /// Allocation at snapshot time.
    pub percentage: f64,
}

/// A user's voting-power balance for one snapshot.
///
/// Created with `balance = None`; filled exactly once by the balance sync.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    /// Row id.
    pub id: i64,
    /// Owning snapshot.
    pub snapshot_id: SnapshotId,
    /// Balance holder.
    pub user_id: UserId,
    /// Resolved balance, `None` while unknown.
    pub balance: Option<f64>,
}

/// Latest known balance of a user, independent of rounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InstantBalance {
    /// Balance holder.
    pub user_id: UserId,
    /// Latest balance reported by the source.
    pub balance: f64,
    /// Source-side update time in milliseconds since the Unix epoch.
    pub source_updated_at_ms: i64,
}

/// One balance change reported by the external balance source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    /// Wallet address of the holder.
    pub address: String,
    /// Voting-power balance.
    pub balance: f64,
    /// Source-side update time in milliseconds since the Unix epoch.
    pub updated_at: i64,
}

/// A project as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectRecord {
    /// Project id.
    pub id: ProjectId,
    /// Whether the project may earn boosted power (verified and listed).
    pub eligible: bool,
}

/// A (project, percentage, balance) triple feeding a ranking view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerInput {
    /// Boosted project.
    pub project_id: ProjectId,
    /// Allocation percentage.
    pub percentage: f64,
    /// Booster balance, `None` when not yet known.
    pub balance: Option<f64>,
}

impl PowerInput {
    /// Power contributed by this allocation. Unknown balances count as zero.
    #[must_use]
    pub fn power(&self) -> f64 {
        self.balance.unwrap_or(0.0) * self.percentage / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_of_one_hundred_is_fifty() {
        let input = PowerInput {
            project_id: ProjectId::new(1),
            percentage: 50.0,
            balance: Some(100.0),
        };
        assert!((input.power() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_balance_contributes_nothing() {
        let input = PowerInput {
            project_id: ProjectId::new(1),
            percentage: 80.0,
            balance: None,
        };
        assert!(input.power().abs() < f64::EPSILON);
    }

    #[test]
    fn balance_update_uses_camel_case() {
        let json = r#"{"address":"0xabc","balance":12.5,"updatedAt":1700000000000}"#;
        let parsed = serde_json::from_str::<BalanceUpdate>(json).ok();
        assert_eq!(
            parsed,
            Some(BalanceUpdate {
                address: "0xabc".to_string(),
                balance: 12.5,
                updated_at: 1_700_000_000_000,
            })
        );
    }
}

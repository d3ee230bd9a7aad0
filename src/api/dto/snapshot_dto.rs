//! Snapshot DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::snapshot::Snapshot;

/// Query parameters for `GET /api/v1/snapshots`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SnapshotListParams {
    /// Number of snapshots to return, newest first (max 100). Defaults to 20.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// Response body for `GET /api/v1/snapshots`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SnapshotListResponse {
    /// Snapshots, newest first.
    pub data: Vec<Snapshot>,
}

/// Response body for `GET /api/v1/snapshots/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SnapshotDetailResponse {
    /// The snapshot row.
    #[serde(flatten)]
    pub snapshot: Snapshot,
    /// Frozen boosting rows.
    pub boosting_rows: usize,
    /// Balance rows, one per distinct booster.
    pub balance_rows: usize,
    /// Balance rows still waiting for the balance sync.
    pub pending_balances: usize,
}

//! Ranking view DTOs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::PaginationMeta;
use crate::domain::{RankEntry, RankingView, SnapshotId, ViewKind};

/// Metadata of the view a response was cut from.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ViewMetaDto {
    /// View name.
    pub view: ViewKind,
    /// Round of the underlying snapshot, if any.
    pub round_number: Option<i64>,
    /// Snapshot the view was computed from.
    pub snapshot_id: Option<SnapshotId>,
    /// When the view was computed.
    pub computed_at: DateTime<Utc>,
}

impl From<&RankingView> for ViewMetaDto {
    fn from(view: &RankingView) -> Self {
        Self {
            view: view.kind,
            round_number: view.round_number,
            snapshot_id: view.snapshot_id,
            computed_at: view.computed_at,
        }
    }
}

/// Response body for `GET /api/v1/rankings/{view}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct RankingPageResponse {
    /// View metadata.
    #[serde(flatten)]
    pub meta: ViewMetaDto,
    /// Entries of the requested page, ordered by rank.
    pub data: Vec<RankEntry>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Response body for `GET /api/v1/rankings/{view}/projects/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectRankResponse {
    /// View metadata.
    #[serde(flatten)]
    pub meta: ViewMetaDto,
    /// The project's entry.
    pub entry: RankEntry,
}

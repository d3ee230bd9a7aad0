//! Snapshot inspection handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{SnapshotDetailResponse, SnapshotListParams, SnapshotListResponse};
use crate::app_state::AppState;
use crate::domain::SnapshotId;
use crate::error::{EngineError, ErrorResponse};

/// `GET /snapshots` — Most recent snapshots.
///
/// # Errors
///
/// Returns [`EngineError::PersistenceError`] if the store cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/snapshots",
    tag = "Snapshots",
    summary = "List snapshots",
    description = "Returns the most recent snapshots, newest first.",
    params(SnapshotListParams),
    responses(
        (status = 200, description = "Snapshots", body = SnapshotListResponse),
    )
)]
pub async fn list_snapshots(
    State(state): State<AppState>,
    Query(params): Query<SnapshotListParams>,
) -> Result<impl IntoResponse, EngineError> {
    let data = state
        .store
        .recent_snapshots(params.limit.clamp(1, 100))
        .await?;
    Ok(Json(SnapshotListResponse { data }))
}

/// `GET /snapshots/{id}` — One snapshot with its row counts.
///
/// # Errors
///
/// Returns [`EngineError::SnapshotNotFound`] for an unknown id.
#[utoipa::path(
    get,
    path = "/api/v1/snapshots/{id}",
    tag = "Snapshots",
    summary = "Get a snapshot",
    description = "Returns one snapshot with the number of frozen boosting rows and of balances still pending.",
    params(("id" = i64, Path, description = "Snapshot id")),
    responses(
        (status = 200, description = "Snapshot detail", body = SnapshotDetailResponse),
        (status = 404, description = "Snapshot not found", body = ErrorResponse),
    )
)]
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, EngineError> {
    let id = SnapshotId::new(id);
    let snapshot = state
        .store
        .snapshot(id)
        .await?
        .ok_or(EngineError::SnapshotNotFound(id))?;
    let boostings = state.store.boosting_snapshots(id).await?;
    let balances = state.store.balance_snapshots(id).await?;

    Ok(Json(SnapshotDetailResponse {
        snapshot,
        boosting_rows: boostings.len(),
        balance_rows: balances.len(),
        pending_balances: balances.iter().filter(|b| b.balance.is_none()).count(),
    }))
}

/// Snapshot routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/snapshots", get(list_snapshots))
        .route("/snapshots/{id}", get(get_snapshot))
}

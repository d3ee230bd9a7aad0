//! Ranking view handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{PaginationParams, ProjectRankResponse, RankingPageResponse, ViewMetaDto};
use crate::app_state::AppState;
use crate::domain::{ProjectId, ViewKind};
use crate::error::{EngineError, ErrorResponse};

/// `GET /rankings/{view}` — One page of a ranking view.
///
/// # Errors
///
/// Returns [`EngineError::UnknownView`] for an unknown view name and
/// [`EngineError::PersistenceError`] if the view cannot be computed.
#[utoipa::path(
    get,
    path = "/api/v1/rankings/{view}",
    tag = "Rankings",
    summary = "Get a ranking view",
    description = "Returns projects ordered by rank in one of the views `current`, `future`, `last-snapshot` or `instant`.",
    params(
        ("view" = String, Path, description = "View name"),
        PaginationParams,
    ),
    responses(
        (status = 200, description = "Ranked projects", body = RankingPageResponse),
        (status = 400, description = "Unknown view", body = ErrorResponse),
    )
)]
pub async fn get_ranking(
    State(state): State<AppState>,
    Path(view): Path<String>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, EngineError> {
    let kind: ViewKind = view.parse()?;
    let ranking = state.ranking.view(kind).await?;
    let (data, pagination) = params.paginate(&ranking.entries);

    Ok(Json(RankingPageResponse {
        meta: ViewMetaDto::from(ranking.as_ref()),
        data,
        pagination,
    }))
}

/// `GET /rankings/{view}/projects/{id}` — One project's rank in a view.
///
/// # Errors
///
/// Returns [`EngineError::ProjectNotRanked`] if the view has no entry for
/// the project.
#[utoipa::path(
    get,
    path = "/api/v1/rankings/{view}/projects/{id}",
    tag = "Rankings",
    summary = "Get a project's rank",
    description = "Returns the boosted power and rank of one project in the given view.",
    params(
        ("view" = String, Path, description = "View name"),
        ("id" = i64, Path, description = "Project id"),
    ),
    responses(
        (status = 200, description = "Project rank", body = ProjectRankResponse),
        (status = 400, description = "Unknown view", body = ErrorResponse),
        (status = 404, description = "Project not ranked", body = ErrorResponse),
    )
)]
pub async fn get_project_rank(
    State(state): State<AppState>,
    Path((view, id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, EngineError> {
    let kind: ViewKind = view.parse()?;
    let project_id = ProjectId::new(id);
    let ranking = state.ranking.view(kind).await?;
    let entry = ranking
        .entry(project_id)
        .copied()
        .ok_or(EngineError::ProjectNotRanked {
            view: kind,
            project_id,
        })?;

    Ok(Json(ProjectRankResponse {
        meta: ViewMetaDto::from(ranking.as_ref()),
        entry,
    }))
}

/// Ranking routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rankings/{view}", get(get_ranking))
        .route("/rankings/{view}/projects/{id}", get(get_project_rank))
}

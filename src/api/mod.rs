//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and `/ws`
//! live at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "givpower-engine", description = "GIVpower snapshots and project rankings"),
    paths(
        handlers::system::health_handler,
        handlers::rounds::get_current_round,
        handlers::rankings::get_ranking,
        handlers::rankings::get_project_rank,
        handlers::snapshots::list_snapshots,
        handlers::snapshots::get_snapshot,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        dto::CurrentRoundResponse,
        dto::RankingPageResponse,
        dto::ProjectRankResponse,
        dto::SnapshotListResponse,
        dto::SnapshotDetailResponse,
        crate::error::ErrorResponse,
    )),
    tags(
        (name = "System", description = "Health"),
        (name = "Rounds", description = "Round clock and rollover state"),
        (name = "Rankings", description = "Boosted power ranking views"),
        (name = "Snapshots", description = "Frozen boosting snapshots"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());
    with_swagger_ui(router)
}

#[cfg(feature = "swagger-ui")]
fn with_swagger_ui(router: Router<AppState>) -> Router<AppState> {
    router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
}

#[cfg(not(feature = "swagger-ui"))]
fn with_swagger_ui(router: Router<AppState>) -> Router<AppState> {
    router
}

/// Builds the full application: REST routes, `/ws`, tracing and CORS.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

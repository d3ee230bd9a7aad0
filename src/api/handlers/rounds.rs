//! Round status handler.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::CurrentRoundResponse;
use crate::app_state::AppState;
use crate::error::{EngineError, ErrorResponse};

/// `GET /rounds/current` — Persisted round, clock round and rollover phase.
///
/// # Errors
///
/// Returns [`EngineError::PersistenceError`] if the store cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/rounds/current",
    tag = "Rounds",
    summary = "Current round",
    description = "Returns the round persisted by the last rollover next to the round derived from the clock.",
    responses(
        (status = 200, description = "Round status", body = CurrentRoundResponse),
        (status = 500, description = "Store failure", body = ErrorResponse),
    )
)]
pub async fn get_current_round(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(CurrentRoundResponse {
        persisted_round: state.store.current_round().await?,
        clock_round: state.rollover.clock().round_for_time(Utc::now()),
        phase: state.rollover.phase(),
        fetch_cursor_ms: state.store.fetch_cursor().await?,
    }))
}

/// Round routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/rounds/current", get(get_current_round))
}

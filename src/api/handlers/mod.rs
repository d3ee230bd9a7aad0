//! REST endpoint handlers organized by resource.

pub mod rankings;
pub mod rounds;
pub mod snapshots;
pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(rankings::routes())
        .merge(rounds::routes())
        .merge(snapshots::routes())
}

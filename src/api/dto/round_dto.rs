//! Round DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::RoundWindow;
use crate::service::RolloverPhase;

/// Response body for `GET /api/v1/rounds/current`.
#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentRoundResponse {
    /// Round persisted by the last rollover, `null` before the first one.
    pub persisted_round: Option<i64>,
    /// Round the clock says it is now.
    pub clock_round: RoundWindow,
    /// Whether a rollover is running.
    pub phase: RolloverPhase,
    /// Fetch cursor of the balance sync, in milliseconds.
    pub fetch_cursor_ms: i64,
}

//! Engine error types with HTTP status code mapping.
//!
//! [`EngineError`] is the central error type of the crate. Periodic tasks
//! log it and retry on their next tick; the REST layer maps each variant
//! to a status code and structured JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{ProjectId, SnapshotId, ViewKind};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "snapshot not found: 12"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`EngineError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Engine error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request             |
/// | 2000–2999 | Not Found       | 404 Not Found               |
/// | 3000–3999 | Server          | 500 Internal Server Error   |
/// | 5000–5999 | Upstream        | 502 Bad Gateway             |
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unknown ranking view name.
    #[error("unknown ranking view: {0}")]
    UnknownView(String),

    /// Configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Snapshot with the given id does not exist.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    /// Project is absent from the requested view.
    #[error("project {project_id} is not ranked in the {view} view")]
    ProjectNotRanked {
        /// View that was queried.
        view: ViewKind,
        /// Project that was looked up.
        project_id: ProjectId,
    },

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Balance source unreachable, timed out or answered 5xx.
    #[error("balance source unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Balance source answered with a client error or a malformed body.
    #[error("balance source rejected request: {0}")]
    UpstreamRejected(String),

    /// Notification emitter did not accept a rank-change notice.
    #[error("notification delivery failed: {0}")]
    NotificationFailed(String),
}

impl EngineError {
    /// Returns `true` for failures worth retrying within the same pass.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::UnknownView(_) => 1002,
            Self::InvalidConfig(_) => 3002,
            Self::SnapshotNotFound(_) => 2001,
            Self::ProjectNotRanked { .. } => 2002,
            Self::PersistenceError(_) => 3001,
            Self::UpstreamUnavailable(_) => 5001,
            Self::UpstreamRejected(_) => 5002,
            Self::NotificationFailed(_) => 5003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownView(_) => StatusCode::BAD_REQUEST,
            Self::SnapshotNotFound(_) | Self::ProjectNotRanked { .. } => StatusCode::NOT_FOUND,
            Self::InvalidConfig(_) | Self::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamUnavailable(_)
            | Self::UpstreamRejected(_)
            | Self::NotificationFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

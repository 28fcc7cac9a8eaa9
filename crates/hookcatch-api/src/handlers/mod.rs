//! HTTP request handlers for the hookcatch API.
//!
//! Handlers are grouped by functionality:
//! - `ingest` - unauthenticated webhook intake
//! - `deliveries` - admin listing, inspection and replay
//! - `dead_letters` - admin view of exhausted deliveries
//! - `health` - liveness, readiness and health probes
//!
//! # Error Handling
//!
//! Every failure renders as `{"error": {"code": "E1001", "message": ".."}}`
//! with the status from [`ApiError::status`].

pub mod dead_letters;
pub mod deliveries;
pub mod health;
pub mod ingest;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hookcatch_core::{CoreError, HookCatchError};
use serde::{Deserialize, Serialize};
use tracing::error;

pub use dead_letters::list_dead_letters;
pub use deliveries::{list_deliveries, replay_delivery, show_delivery};
pub use health::{health_check, liveness_check, readiness_check};
pub use ingest::receive_webhook;

/// Error response with code and message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error code from the taxonomy (E1001-E3002)
    pub code: String,
    /// Human-readable error description
    pub message: String,
}

/// Handler error rendered as an [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError(pub HookCatchError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            HookCatchError::InvalidSignature { .. } | HookCatchError::Unauthorized { .. } => {
                StatusCode::UNAUTHORIZED
            },
            HookCatchError::UnknownProvider { .. } | HookCatchError::NotFound { .. } => {
                StatusCode::NOT_FOUND
            },
            HookCatchError::MalformedPayload | HookCatchError::InvalidQuery { .. } => {
                StatusCode::BAD_REQUEST
            },
            HookCatchError::Database(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            HookCatchError::QueueUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HookCatchError::HandlerError(_) | HookCatchError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl From<HookCatchError> for ApiError {
    fn from(err: HookCatchError) -> Self {
        Self(err)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(HookCatchError::Database(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Storage details stay in the logs.
        let message = if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorResponse { error: ErrorDetail { code: self.0.code().to_string(), message } };
        (status, Json(body)).into_response()
    }
}

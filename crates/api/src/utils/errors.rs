//! HTTP error type and JSON error payloads

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mailpilot_domain::MailPilotError;
use serde::Serialize;
use tracing::{error, warn};

use super::logging::error_label;

/// Machine-readable code plus a human message.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Stable error code identifier.
    pub code: &'static str,
    pub message: String,
}

/// JSON error body: `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Errors returned by route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Retryable; push deliveries are redelivered on this status.
    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::BadGateway(_) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl From<MailPilotError> for ApiError {
    fn from(err: MailPilotError) -> Self {
        let label = error_label(&err);
        match err {
            MailPilotError::NotFound(msg) => Self::NotFound(msg),
            MailPilotError::InvalidInput(msg) => Self::BadRequest(msg),
            MailPilotError::Conflict(msg) => Self::Conflict(msg),
            // Credentials of a mailbox, not of the caller.
            MailPilotError::Auth(msg) | MailPilotError::Network(msg) => {
                warn!(error_type = label, error = %msg, "Provider call failed");
                Self::BadGateway(msg)
            }
            MailPilotError::Database(msg)
            | MailPilotError::Config(msg)
            | MailPilotError::Internal(msg) => {
                error!(error_type = label, error = %msg, "Request failed");
                Self::Internal(msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorResponse { error: ErrorDetail { code, message: self.to_string() } };
        (status, Json(body)).into_response()
    }
}

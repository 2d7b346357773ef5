//! Conversions from external infrastructure errors into domain errors.

use mailpilot_domain::{MailPilotError, ProviderError};
use reqwest::{Error as HttpError, StatusCode};
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub MailPilotError);

impl From<InfraError> for MailPilotError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<MailPilotError> for InfraError {
    fn from(value: MailPilotError) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for InfraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for InfraError {}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoMailPilotError {
    fn into_mailpilot(self) -> MailPilotError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → MailPilotError */
/* -------------------------------------------------------------------------- */

impl IntoMailPilotError for SqlError {
    fn into_mailpilot(self) -> MailPilotError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        MailPilotError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        MailPilotError::Database("database is locked".into())
                    }
                    // SQLITE_CONSTRAINT_PRIMARYKEY / SQLITE_CONSTRAINT_UNIQUE
                    (ErrorCode::ConstraintViolation, 1555 | 2067) => {
                        MailPilotError::Conflict(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        MailPilotError::Database("foreign key constraint violation".into())
                    }
                    _ => MailPilotError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => MailPilotError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                MailPilotError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                MailPilotError::Database(format!("invalid column type: {ty}"))
            }
            RE::Utf8Error(_) => {
                MailPilotError::Database("invalid UTF-8 returned from sqlite".into())
            }
            RE::InvalidPath(path) => MailPilotError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => MailPilotError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        Self(value.into_mailpilot())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → MailPilotError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        Self(MailPilotError::Database(format!("connection pool error: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → MailPilotError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        Self(MailPilotError::Internal(format!("json serialization failed: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* tokio::task::JoinError → MailPilotError */
/* -------------------------------------------------------------------------- */

impl From<tokio::task::JoinError> for InfraError {
    fn from(value: tokio::task::JoinError) -> Self {
        let reason = if value.is_cancelled() { "cancelled" } else { "panicked" };
        Self(MailPilotError::Internal(format!("blocking task {reason}: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → MailPilotError */
/* -------------------------------------------------------------------------- */

impl IntoMailPilotError for HttpError {
    fn into_mailpilot(self) -> MailPilotError {
        if self.is_timeout() {
            return MailPilotError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return MailPilotError::Network("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => MailPilotError::Auth(message),
                404 => MailPilotError::NotFound(message),
                409 => MailPilotError::Conflict(message),
                400..=499 if code != 429 => MailPilotError::InvalidInput(message),
                _ => MailPilotError::Network(message),
            };
        }

        MailPilotError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        Self(value.into_mailpilot())
    }
}

/* -------------------------------------------------------------------------- */
/* Provider taxonomy */
/* -------------------------------------------------------------------------- */

/// Classify a non-success provider response.
///
/// 401 and 403 mean the token was refused; 404 means the resource is gone;
/// 408, 429 and every 5xx are worth retrying. Other 4xx answers describe a
/// request the provider will never accept, so they surface as `Malformed`.
pub fn status_to_provider_error(status: StatusCode, body: &str) -> ProviderError {
    let code = status.as_u16();
    let detail = format!("HTTP {code}: {}", truncate(body, 300));
    match code {
        401 | 403 => ProviderError::Credential(detail),
        404 | 410 => ProviderError::NotFound(detail),
        408 | 429 | 500..=599 => ProviderError::Transient(detail),
        _ => ProviderError::Malformed(detail),
    }
}

impl From<InfraError> for ProviderError {
    fn from(value: InfraError) -> Self {
        match value.0 {
            MailPilotError::Auth(msg) => Self::Credential(msg),
            MailPilotError::NotFound(msg) => Self::NotFound(msg),
            MailPilotError::InvalidInput(msg) => Self::Malformed(msg),
            other => Self::Transient(other.to_string()),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

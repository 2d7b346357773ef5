//! Error types used throughout the application

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for MailPilot
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum MailPilotError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A compare-and-set write lost against a concurrent writer.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for MailPilot operations
pub type Result<T> = std::result::Result<T, MailPilotError>;

/// How a failure should be handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network or provider hiccup; retry with backoff.
    Transient,
    /// The message itself is missing or unusable; the job is skipped.
    PermanentMessage,
    /// Token revoked or expired; the whole mailbox is flagged.
    Credential,
    /// Provider history was truncated; the mailbox needs a full resync.
    CursorExpired,
}

/// Errors reported by the outbound capabilities (mail, calendar, completion).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Credential rejected: {0}")]
    Credential(String),

    #[error("History cursor expired: {0}")]
    CursorExpired(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Map the error onto the pipeline's error taxonomy.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Transient(_) | Self::Timeout(_) => ErrorClass::Transient,
            Self::NotFound(_) | Self::Malformed(_) => ErrorClass::PermanentMessage,
            Self::Credential(_) => ErrorClass::Credential,
            Self::CursorExpired(_) => ErrorClass::CursorExpired,
        }
    }

    /// Whether retrying the same call may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }
}

/// Result type alias for outbound capability calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl From<ProviderError> for MailPilotError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Credential(msg) => Self::Auth(msg),
            ProviderError::NotFound(msg) => Self::NotFound(msg),
            ProviderError::Malformed(msg) => Self::InvalidInput(msg),
            other => Self::Network(other.to_string()),
        }
    }
}

//! Google Workspace integration: Gmail, Calendar and OAuth token refresh.
//!
//! # Architecture
//!
//! - **Auth**: `GoogleTokenManager` mints and caches per-mailbox access tokens
//!   from refresh tokens held by a [`RefreshTokenStore`]
//! - **Gmail**: `GmailClient` implements `MailProvider` (messages, history,
//!   send, push watches)
//! - **Calendar**: `GoogleCalendarClient` implements `CalendarProvider`
//!   (freeBusy and tentative holds)
//!
//! Status codes are classified with
//! [`status_to_provider_error`](crate::errors::status_to_provider_error), so a
//! revoked grant surfaces as `ProviderError::Credential` and the pipeline can
//! flag the mailbox instead of retrying.

pub mod auth;
pub mod calendar;
pub mod gmail;
mod types;

use async_trait::async_trait;
use mailpilot_domain::Result;

pub use auth::GoogleTokenManager;
pub use calendar::GoogleCalendarClient;
pub use gmail::GmailClient;

/// Resolves a mailbox's token handle to its OAuth refresh token.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn refresh_token(&self, token_handle: &str) -> Result<Option<String>>;
}

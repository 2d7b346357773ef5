//! OAuth access-token refresh for connected mailboxes.
//!
//! Refresh tokens live behind a [`RefreshTokenStore`]; access tokens are
//! minted on demand from the token endpoint and cached per token handle until
//! shortly before they expire. Concurrent callers for the same handle share
//! one refresh.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use mailpilot_core::Clock;
use mailpilot_domain::{ConnectedMailbox, GoogleConfig, ProviderError, ProviderResult};
use moka::future::Cache;
use moka::Expiry;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use super::types::{TokenErrorResponse, TokenResponse};
use super::RefreshTokenStore;
use crate::errors::status_to_provider_error;
use crate::http::HttpClient;

/// Refresh this long before the provider-reported expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Upper bound on cached access tokens (one per token handle).
const TOKEN_CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
    lifetime: StdDuration,
}

/// Evicts each token once its own lifetime runs out.
struct TokenLifetime;

impl Expiry<String, CachedToken> for TokenLifetime {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedToken,
        _created_at: Instant,
    ) -> Option<StdDuration> {
        Some(value.lifetime)
    }
}

/// Mints and caches Google access tokens per mailbox.
pub struct GoogleTokenManager {
    http: HttpClient,
    store: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    client_id: String,
    client_secret: String,
    token_url: String,
    cache: Cache<String, CachedToken>,
}

impl GoogleTokenManager {
    /// Manager reading refresh tokens from `store`.
    pub fn new(
        http: HttpClient,
        store: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
        config: &GoogleConfig,
    ) -> Self {
        Self {
            http,
            store,
            clock,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_url: config.token_url.clone(),
            cache: Cache::builder()
                .max_capacity(TOKEN_CACHE_CAPACITY)
                .expire_after(TokenLifetime)
                .build(),
        }
    }

    /// Return a live access token for the mailbox, refreshing when needed.
    ///
    /// Expiry is also checked against the injected clock, since the cache's
    /// own eviction runs on wall time.
    pub async fn access_token(&self, mailbox: &ConnectedMailbox) -> ProviderResult<String> {
        let handle = mailbox.token_handle.as_str();
        if let Some(cached) = self.cache.get(handle).await {
            if cached.expires_at > self.clock.now() {
                return Ok(cached.access_token);
            }
            self.cache.invalidate(handle).await;
        }

        let token = self
            .cache
            .try_get_with(handle.to_string(), self.refresh(mailbox))
            .await
            .map_err(|err| ProviderError::clone(&err))?;
        Ok(token.access_token)
    }

    /// Drop the cached access token so the next call refreshes.
    pub async fn invalidate(&self, token_handle: &str) {
        self.cache.invalidate(token_handle).await;
    }

    /// Send a request built with a bearer token.
    ///
    /// A 401 invalidates the cached token and the request is rebuilt once with
    /// a freshly minted token; a second 401 is a credential failure. With
    /// `retry_transient` unset the request goes out through
    /// [`HttpClient::send_once`].
    pub async fn send_authorized<F>(
        &self,
        mailbox: &ConnectedMailbox,
        retry_transient: bool,
        build: F,
    ) -> ProviderResult<Response>
    where
        F: Fn(&HttpClient, &str) -> RequestBuilder + Send + Sync,
    {
        for attempt in 0..2 {
            let token = self.access_token(mailbox).await?;
            let request = build(&self.http, &token);
            let response = if retry_transient {
                self.http.send(request).await?
            } else {
                self.http.send_once(request).await?
            };

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            debug!(
                mailbox_id = %mailbox.mailbox_id,
                attempt,
                "access token rejected; invalidating cache"
            );
            self.invalidate(&mailbox.token_handle).await;
        }

        Err(ProviderError::Credential(format!(
            "access token for mailbox {} rejected after refresh",
            mailbox.mailbox_id
        )))
    }

    async fn refresh(&self, mailbox: &ConnectedMailbox) -> ProviderResult<CachedToken> {
        let refresh_token = self
            .store
            .refresh_token(&mailbox.token_handle)
            .await
            .map_err(|err| ProviderError::Transient(format!("credential store: {err}")))?
            .ok_or_else(|| {
                ProviderError::Credential(format!(
                    "no refresh token stored for mailbox {}",
                    mailbox.mailbox_id
                ))
            })?;

        let request = self.http.request(Method::POST, &self.token_url).form(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]);

        let response = self.http.send(request).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_token_error(status, &body);
            warn!(
                mailbox_id = %mailbox.mailbox_id,
                status = status.as_u16(),
                error = %err,
                "token refresh failed"
            );
            return Err(err);
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(format!("token response: {err}")))?;

        let lifetime = (token.expires_in - EXPIRY_SKEW_SECS).max(0);
        debug!(mailbox_id = %mailbox.mailbox_id, lifetime_secs = lifetime, "refreshed access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: self.clock.now() + Duration::seconds(lifetime),
            lifetime: StdDuration::from_secs(u64::try_from(lifetime).unwrap_or(0)),
        })
    }
}

/// `invalid_grant` means the refresh token was revoked or expired.
fn classify_token_error(status: StatusCode, body: &str) -> ProviderError {
    let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    match parsed.error.as_str() {
        "invalid_grant" | "unauthorized_client" | "invalid_client" => ProviderError::Credential(
            parsed.error_description.unwrap_or(parsed.error),
        ),
        _ => status_to_provider_error(status, body),
    }
}

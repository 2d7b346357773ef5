//! Shared-secret checks for the push webhook and the admin routes

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::errors::ApiError;
use crate::context::AppContext;

/// Compare two secrets through their SHA-256 digests so the comparison time
/// does not depend on where the raw values first differ.
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    let provided = hex::encode(Sha256::digest(provided.as_bytes()));
    let expected = hex::encode(Sha256::digest(expected.as_bytes()));
    provided
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Bearer token from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim()).filter(|token| !token.is_empty())
}

/// Middleware guarding `/internal` and `/admin`. Open when no admin token is
/// configured.
pub async fn require_admin(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = ctx.config.server.admin_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);

    match provided {
        Some(token) if tokens_match(token, expected) => Ok(next.run(request).await),
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected admin request with wrong token");
            Err(ApiError::Unauthorized("invalid admin token".into()))
        }
        None => Err(ApiError::Unauthorized("missing bearer token".into())),
    }
}

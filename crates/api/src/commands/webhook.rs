//! Gmail push endpoint
//!
//! Pub/Sub delivers at least once and retries on any non-2xx answer, so the
//! handler only validates, maps the mailbox and enqueues. Processing happens
//! on the notification worker.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use mailpilot_core::IntakeDecision;
use mailpilot_infra::dispatch::DispatchError;
use mailpilot_infra::observability::log_metric;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::utils::auth::tokens_match;
use crate::utils::errors::ApiError;
use crate::utils::logging::log_request_outcome;

/// Gmail push endpoint.
pub fn routes() -> Router<Arc<AppContext>> {
    Router::new().route("/webhooks/gmail", post(receive_gmail_push))
}

/// Shared secret carried in the push subscription URL.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

/// Pub/Sub push envelope.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
    #[serde(default)]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    data: String,
    #[serde(default)]
    message_id: Option<String>,
}

/// Decoded `message.data`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPushPayload {
    email_address: String,
    history_id: HistoryId,
}

/// Gmail sends the history id as a JSON number; some relays stringify it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryId {
    Number(u64),
    Text(String),
}

impl HistoryId {
    fn value(&self) -> Option<u64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Email address and history id carried by a push body.
pub fn decode_push(body: &[u8]) -> Result<(String, u64), ApiError> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|err| ApiError::BadRequest(format!("malformed push envelope: {err}")))?;

    let data = envelope.message.data.trim();
    let decoded = STANDARD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .map_err(|_| ApiError::BadRequest("push data is not base64".into()))?;

    let payload: GmailPushPayload = serde_json::from_slice(&decoded)
        .map_err(|err| ApiError::BadRequest(format!("malformed push payload: {err}")))?;
    let history_id = payload
        .history_id
        .value()
        .ok_or_else(|| ApiError::BadRequest("historyId is not a number".into()))?;
    if payload.email_address.trim().is_empty() {
        return Err(ApiError::BadRequest("emailAddress is empty".into()));
    }

    debug!(
        message_id = envelope.message.message_id.as_deref().unwrap_or_default(),
        subscription = envelope.subscription.as_deref().unwrap_or_default(),
        history_id,
        "Decoded push"
    );
    Ok((payload.email_address, history_id))
}

/// `POST /webhooks/gmail`
///
/// 204 once the notification is queued or deliberately ignored. 503 asks
/// Pub/Sub to redeliver when the intake queue cannot take more work.
pub async fn receive_gmail_push(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let started = Instant::now();
    let result = handle_push(&ctx, query, &body).await;
    log_request_outcome("webhooks.gmail", started.elapsed(), result.is_ok());
    result
}

async fn handle_push(ctx: &AppContext, query: WebhookQuery, body: &[u8]) -> Result<StatusCode, ApiError> {
    if let Some(expected) = ctx.config.server.webhook_token.as_deref() {
        let authorised = query.token.as_deref().is_some_and(|token| tokens_match(token, expected));
        if !authorised {
            warn!("Rejected push with missing or wrong token");
            return Err(ApiError::Unauthorized("invalid webhook token".into()));
        }
    }

    let (email_address, history_id) = decode_push(body)?;
    log_metric(ctx.metrics.record_notification_received(), "notifications.received");

    match ctx.intake.accept(&email_address, history_id).await? {
        IntakeDecision::Accepted(notification) => {
            let mailbox_id = notification.mailbox_id.clone();
            match ctx.queue.enqueue(notification) {
                Ok(()) => {
                    info!(mailbox_id = %mailbox_id, history_id, "Push queued");
                    Ok(StatusCode::NO_CONTENT)
                }
                Err(DispatchError::QueueFull) => {
                    Err(ApiError::ServiceUnavailable("intake queue is full".into()))
                }
                Err(err) => Err(ApiError::ServiceUnavailable(err.to_string())),
            }
        }
        IntakeDecision::Ignored(reason) => {
            log_metric(ctx.metrics.record_notification_ignored(), "notifications.ignored");
            debug!(email_address = %email_address, ?reason, "Push ignored");
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

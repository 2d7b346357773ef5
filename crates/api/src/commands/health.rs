//! Liveness and readiness

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::context::AppContext;
use crate::utils::health::HealthStatus;

/// Liveness route, open to unauthenticated callers.
pub fn routes() -> Router<Arc<AppContext>> {
    Router::new().route("/healthz", get(get_health))
}

/// `GET /healthz`
///
/// # Example Response
/// ```json
/// {
///   "is_healthy": true,
///   "score": 1.0,
///   "components": [
///     { "name": "database", "is_healthy": true, "message": null },
///     { "name": "notification_worker", "is_healthy": true, "message": null }
///   ],
///   "metrics": { "uptime_secs": 42, "notifications": { "received": 3, "ignored": 0, "rejected": 0 } },
///   "timestamp": 1741000000
/// }
/// ```
pub async fn get_health(State(ctx): State<Arc<AppContext>>) -> (StatusCode, Json<HealthStatus>) {
    let status = ctx.health_check().await;
    let code = if status.is_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(status))
}

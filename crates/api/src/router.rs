//! Router setup

use std::sync::Arc;

use axum::http::{Method, StatusCode, Uri};
use axum::{middleware, Json, Router};

use crate::commands;
use crate::context::AppContext;
use crate::utils::auth::require_admin;
use crate::utils::errors::{ApiError, ErrorDetail, ErrorResponse};

/// Build the HTTP router.
///
/// `/webhooks` checks its own query token, `/internal` and `/admin` sit
/// behind the admin bearer token, `/healthz` is open.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let protected = Router::new()
        .merge(commands::sweeps::routes())
        .merge(commands::admin::routes())
        .route_layer(middleware::from_fn_with_state(Arc::clone(&ctx), require_admin));

    Router::new()
        .merge(commands::webhook::routes())
        .merge(commands::health::routes())
        .merge(protected)
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(not_found)
        .with_state(ctx)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("not found: {}", uri.path()))
}

async fn method_not_allowed(method: Method, uri: Uri) -> (StatusCode, Json<ErrorResponse>) {
    let error = ErrorDetail {
        code: "METHOD_NOT_ALLOWED",
        message: format!("{method} is not supported on {}", uri.path()),
    };
    (StatusCode::METHOD_NOT_ALLOWED, Json(ErrorResponse { error }))
}

//! Manual triggers for the scheduled sweeps

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use mailpilot_core::{JobOutcome, MailboxRenewal};
use mailpilot_infra::observability::log_metric;
use tracing::info;

use crate::context::AppContext;
use crate::utils::errors::ApiError;
use crate::utils::logging::log_request_outcome;

/// Manual triggers for the scheduled sweeps.
pub fn routes() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/internal/renewal-sweep", post(run_renewal_sweep))
        .route("/internal/recovery-sweep", post(run_recovery_sweep))
}

/// `POST /internal/renewal-sweep`
pub async fn run_renewal_sweep(State(ctx): State<Arc<AppContext>>) -> Result<Json<Vec<MailboxRenewal>>, ApiError> {
    let started = Instant::now();
    let result = ctx.renewal.sweep().await;
    log_request_outcome("internal.renewal_sweep", started.elapsed(), result.is_ok());

    let renewals = result?;
    for renewal in &renewals {
        log_metric(ctx.metrics.record_renewal(&renewal.outcome), "renewal.outcome");
    }
    info!(mailboxes = renewals.len(), "Manual renewal sweep complete");
    Ok(Json(renewals))
}

/// `POST /internal/recovery-sweep`
pub async fn run_recovery_sweep(State(ctx): State<Arc<AppContext>>) -> Result<Json<Vec<JobOutcome>>, ApiError> {
    let started = Instant::now();
    let result = ctx.recovery.run().await;
    log_request_outcome("internal.recovery_sweep", started.elapsed(), result.is_ok());

    let outcomes = result?;
    for outcome in &outcomes {
        log_metric(ctx.metrics.record_job_outcome(outcome), "recovery.job_outcome");
    }
    info!(jobs = outcomes.len(), "Manual recovery sweep complete");
    Ok(Json(outcomes))
}

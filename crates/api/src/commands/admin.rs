//! Operator endpoints: mailbox watches and job inspection

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use mailpilot_core::MailboxDirectory;
use mailpilot_domain::{JobStatus, MailboxWatch, ProcessingJob};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::AppContext;
use crate::utils::errors::ApiError;
use crate::utils::logging::log_request_outcome;

const DEFAULT_JOB_LIMIT: usize = 50;
const MAX_JOB_LIMIT: usize = 500;

/// Mailbox watch and job administration routes.
pub fn routes() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/admin/mailboxes/{mailbox_id}/watch", put(connect_mailbox).delete(disconnect_mailbox))
        .route("/admin/jobs", get(list_jobs))
        .route("/admin/jobs/{job_id}", get(get_job))
        .route("/admin/jobs/{job_id}/reprocess", post(reprocess_job))
}

/// `PUT /admin/mailboxes/{mailbox_id}/watch`
///
/// Starts (or restarts) the provider watch and reactivates the mailbox.
pub async fn connect_mailbox(
    State(ctx): State<Arc<AppContext>>,
    Path(mailbox_id): Path<String>,
) -> Result<Json<MailboxWatch>, ApiError> {
    let started = Instant::now();
    let result = ctx.lifecycle.connect(&mailbox_id).await;
    log_request_outcome("admin.connect_mailbox", started.elapsed(), result.is_ok());
    Ok(Json(result?))
}

/// Result of removing a mailbox watch.
#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub mailbox_id: String,
    /// Whether a registered watch was removed.
    pub watch_removed: bool,
}

/// `DELETE /admin/mailboxes/{mailbox_id}/watch`
pub async fn disconnect_mailbox(
    State(ctx): State<Arc<AppContext>>,
    Path(mailbox_id): Path<String>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let started = Instant::now();
    if ctx.mailboxes.get(&mailbox_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("mailbox {mailbox_id}")));
    }

    let result = ctx.lifecycle.disconnect(&mailbox_id).await;
    log_request_outcome("admin.disconnect_mailbox", started.elapsed(), result.is_ok());
    let watch_removed = result?;
    ctx.mailboxes.mark_disconnected(&mailbox_id, ctx.clock.now()).await?;

    info!(mailbox_id = %mailbox_id, watch_removed, "Mailbox disconnected by operator");
    Ok(Json(DisconnectResponse { mailbox_id, watch_removed }))
}

/// Filters for `GET /admin/jobs`; status defaults to `failed`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub mailbox_id: Option<String>,
    pub limit: Option<usize>,
}

/// `GET /admin/jobs?status=failed&limit=50` or `?mailbox_id=...`
///
/// Without filters the failed jobs are listed.
pub async fn list_jobs(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<ProcessingJob>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_JOB_LIMIT).clamp(1, MAX_JOB_LIMIT);
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let jobs = match (query.mailbox_id.as_deref(), status) {
        (Some(mailbox_id), status) => {
            let jobs = ctx.ledger.list_for_mailbox(mailbox_id, limit).await?;
            jobs.into_iter().filter(|job| status.map_or(true, |status| job.status == status)).collect()
        }
        (None, status) => ctx.ledger.list_by_status(status.unwrap_or(JobStatus::Failed), limit).await?,
    };
    Ok(Json(jobs))
}

/// `GET /admin/jobs/{job_id}`
pub async fn get_job(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<String>,
) -> Result<Json<ProcessingJob>, ApiError> {
    ctx.ledger
        .get(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))
}

/// `POST /admin/jobs/{job_id}/reprocess`
///
/// Reopens a failed or skipped job at the stage it stopped. The next
/// recovery sweep resumes it.
pub async fn reprocess_job(
    State(ctx): State<Arc<AppContext>>,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<ProcessingJob>), ApiError> {
    let started = Instant::now();
    let result = ctx.ledger.reopen(&job_id).await;
    log_request_outcome("admin.reprocess_job", started.elapsed(), result.is_ok());
    Ok((StatusCode::ACCEPTED, Json(result?)))
}

//! SQLite-backed idempotency ledger storage.
//!
//! One row per `(mailbox_id, message_id)`. Stage outputs are stored as a JSON
//! document; every update is a compare-and-swap on the `version` column.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpilot_core::JobRepository;
use mailpilot_domain::{
    JobLease, JobOutputs, JobStatus, MailPilotError, ProcessingJob, Result, SendIntent,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::warn;

use super::manager::{map_sql_error, DbManager};
use super::sql_util::{from_millis, limit_to_sql, to_millis, with_connection};
use crate::errors::InfraError;

/// Job ledger table.
pub struct SqliteJobRepository {
    db: Arc<DbManager>,
}

impl SqliteJobRepository {
    /// Repository over `db`.
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    fn query_jobs(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ProcessingJob>> {
        let mut stmt = conn.prepare(sql).map_err(map_sql_error)?;
        let rows = stmt.query_map(params, map_job_row).map_err(map_sql_error)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(map_sql_error)?.into_job()?);
        }
        Ok(jobs)
    }

    fn query_one(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<ProcessingJob>> {
        conn.query_row(sql, params, map_job_row)
            .optional()
            .map_err(map_sql_error)?
            .map(JobRow::into_job)
            .transpose()
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert_if_absent(&self, job: &ProcessingJob) -> Result<bool> {
        let job = job.clone();
        with_connection(&self.db, move |conn| {
            let outputs = encode_outputs(&job.outputs)?;
            let inserted = conn
                .execute(
                    JOB_INSERT_SQL,
                    params![
                        job.id,
                        job.mailbox_id,
                        job.message_id,
                        job.status.as_str(),
                        job.attempt,
                        job.last_error,
                        outputs,
                        job.lease.as_ref().map(|lease| lease.owner.clone()),
                        job.lease.as_ref().map(|lease| to_millis(lease.expires_at)),
                        job.send_intent.as_ref().map(|intent| intent.rfc822_message_id.clone()),
                        job.send_intent.as_ref().map(|intent| to_millis(intent.recorded_at)),
                        job.version,
                        to_millis(job.created_at),
                        to_millis(job.updated_at),
                        job.completed_at.map(to_millis),
                    ],
                )
                .map_err(map_sql_error)?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>> {
        let job_id = job_id.to_string();
        with_connection(&self.db, move |conn| {
            Self::query_one(conn, &format!("{JOB_SELECT_SQL} WHERE id = ?1"), params![job_id])
        })
        .await
    }

    async fn find_by_message(
        &self,
        mailbox_id: &str,
        message_id: &str,
    ) -> Result<Option<ProcessingJob>> {
        let mailbox_id = mailbox_id.to_string();
        let message_id = message_id.to_string();
        with_connection(&self.db, move |conn| {
            Self::query_one(
                conn,
                &format!("{JOB_SELECT_SQL} WHERE mailbox_id = ?1 AND message_id = ?2"),
                params![mailbox_id, message_id],
            )
        })
        .await
    }

    async fn compare_and_swap(&self, job: &ProcessingJob, expected_version: i64) -> Result<bool> {
        let job = job.clone();
        with_connection(&self.db, move |conn| {
            let outputs = encode_outputs(&job.outputs)?;
            let updated = conn
                .execute(
                    JOB_CAS_SQL,
                    params![
                        job.status.as_str(),
                        job.attempt,
                        job.last_error,
                        outputs,
                        job.lease.as_ref().map(|lease| lease.owner.clone()),
                        job.lease.as_ref().map(|lease| to_millis(lease.expires_at)),
                        job.send_intent.as_ref().map(|intent| intent.rfc822_message_id.clone()),
                        job.send_intent.as_ref().map(|intent| to_millis(intent.recorded_at)),
                        job.version,
                        to_millis(job.updated_at),
                        job.completed_at.map(to_millis),
                        job.id,
                        expected_version,
                    ],
                )
                .map_err(map_sql_error)?;
            Ok(updated == 1)
        })
        .await
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<ProcessingJob>> {
        with_connection(&self.db, move |conn| {
            Self::query_jobs(
                conn,
                &format!("{JOB_SELECT_SQL} WHERE status = ?1 ORDER BY updated_at ASC LIMIT ?2"),
                params![status.as_str(), limit_to_sql(limit)],
            )
        })
        .await
    }

    async fn list_abandoned(
        &self,
        now: DateTime<Utc>,
        excluded: &[String],
        limit: usize,
    ) -> Result<Vec<ProcessingJob>> {
        let excluded = excluded.to_vec();
        with_connection(&self.db, move |conn| {
            let exclusion = if excluded.is_empty() {
                String::new()
            } else {
                let placeholders: Vec<String> =
                    (0..excluded.len()).map(|index| format!("?{}", index + 3)).collect();
                format!("AND mailbox_id NOT IN ({})", placeholders.join(", "))
            };
            let mut values = vec![Value::Integer(to_millis(now)), Value::Integer(limit_to_sql(limit))];
            values.extend(excluded.into_iter().map(Value::Text));
            Self::query_jobs(
                conn,
                &format!(
                    "{JOB_SELECT_SQL}
                     WHERE status NOT IN ('sent', 'failed', 'skipped')
                       AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)
                       {exclusion}
                     ORDER BY updated_at ASC LIMIT ?2"
                ),
                params_from_iter(values),
            )
        })
        .await
    }

    async fn list_for_mailbox(&self, mailbox_id: &str, limit: usize) -> Result<Vec<ProcessingJob>> {
        let mailbox_id = mailbox_id.to_string();
        with_connection(&self.db, move |conn| {
            Self::query_jobs(
                conn,
                &format!(
                    "{JOB_SELECT_SQL} WHERE mailbox_id = ?1 ORDER BY created_at DESC LIMIT ?2"
                ),
                params![mailbox_id, limit_to_sql(limit)],
            )
        })
        .await
    }
}

const JOB_SELECT_SQL: &str = "SELECT
        id, mailbox_id, message_id, status, attempt, last_error, outputs_json,
        lease_owner, lease_expires_at, send_message_id, send_recorded_at,
        version, created_at, updated_at, completed_at
     FROM processing_jobs";

const JOB_INSERT_SQL: &str = "INSERT OR IGNORE INTO processing_jobs (
        id, mailbox_id, message_id, status, attempt, last_error, outputs_json,
        lease_owner, lease_expires_at, send_message_id, send_recorded_at,
        version, created_at, updated_at, completed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

const JOB_CAS_SQL: &str = "UPDATE processing_jobs SET
        status = ?1, attempt = ?2, last_error = ?3, outputs_json = ?4,
        lease_owner = ?5, lease_expires_at = ?6, send_message_id = ?7, send_recorded_at = ?8,
        version = ?9, updated_at = ?10, completed_at = ?11
     WHERE id = ?12 AND version = ?13";

/// Raw row; JSON decoding happens outside the rusqlite row callback so a bad
/// document surfaces as a domain error.
struct JobRow {
    id: String,
    mailbox_id: String,
    message_id: String,
    status: String,
    attempt: u32,
    last_error: Option<String>,
    outputs_json: String,
    lease_owner: Option<String>,
    lease_expires_at: Option<i64>,
    send_message_id: Option<String>,
    send_recorded_at: Option<i64>,
    version: i64,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<ProcessingJob> {
        let outputs: JobOutputs = serde_json::from_str(&self.outputs_json)
            .map_err(|err| MailPilotError::from(InfraError::from(err)))?;
        let lease = match (self.lease_owner, self.lease_expires_at) {
            (Some(owner), Some(expires_at)) => {
                Some(JobLease { owner, expires_at: from_millis("lease_expires_at", expires_at) })
            }
            _ => None,
        };
        let send_intent = match (self.send_message_id, self.send_recorded_at) {
            (Some(rfc822_message_id), Some(recorded_at)) => Some(SendIntent {
                rfc822_message_id,
                recorded_at: from_millis("send_recorded_at", recorded_at),
            }),
            _ => None,
        };
        let status = parse_status(&self.id, &self.status, &outputs);

        Ok(ProcessingJob {
            id: self.id,
            mailbox_id: self.mailbox_id,
            message_id: self.message_id,
            status,
            attempt: self.attempt,
            last_error: self.last_error,
            outputs,
            lease,
            send_intent,
            version: self.version,
            created_at: from_millis("created_at", self.created_at),
            updated_at: from_millis("updated_at", self.updated_at),
            completed_at: self.completed_at.map(|at| from_millis("completed_at", at)),
        })
    }
}

fn map_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        mailbox_id: row.get(1)?,
        message_id: row.get(2)?,
        status: row.get(3)?,
        attempt: row.get(4)?,
        last_error: row.get(5)?,
        outputs_json: row.get(6)?,
        lease_owner: row.get(7)?,
        lease_expires_at: row.get(8)?,
        send_message_id: row.get(9)?,
        send_recorded_at: row.get(10)?,
        version: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

fn encode_outputs(outputs: &JobOutputs) -> Result<String> {
    serde_json::to_string(outputs).map_err(|err| MailPilotError::from(InfraError::from(err)))
}

/// An unreadable status falls back to the stage implied by the stored outputs.
fn parse_status(id: &str, raw: &str, outputs: &JobOutputs) -> JobStatus {
    match raw.parse::<JobStatus>() {
        Ok(status) => status,
        Err(err) => {
            let shell = ProcessingJob {
                outputs: outputs.clone(),
                ..ProcessingJob::new("", "", DateTime::UNIX_EPOCH)
            };
            let fallback = shell.resume_status();
            warn!(
                job_id = %id,
                raw_status = %raw,
                error = %err,
                fallback = %fallback,
                "invalid job status returned by sqlite"
            );
            fallback
        }
    }
}

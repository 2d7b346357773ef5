//! Ledger operations on processing jobs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mailpilot_domain::constants::MAX_ERROR_LENGTH;
use mailpilot_domain::{
    Admission, JobLease, JobStatus, MailPilotError, PipelineConfig, ProcessingJob, Result,
    SendIntent, StageOutput,
};
use tracing::{debug, info, warn};

use super::ports::JobRepository;
use crate::clock::Clock;

/// Admission attempts when racing other workers for an abandoned job.
const MAX_TAKEOVER_ATTEMPTS: u32 = 3;

/// Lease and run limits for jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// How long a lease stays live without progress.
    pub liveness_timeout: Duration,
    /// Pipeline runs allowed before a job is failed for good.
    pub max_runs: u32,
}

impl LedgerSettings {
    /// Settings from the pipeline section.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            liveness_timeout: Duration::seconds(
                i64::try_from(config.liveness_timeout_secs).unwrap_or(86_400).min(86_400 * 365),
            ),
            max_runs: config.max_job_runs.max(1),
        }
    }
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// One job per `(mailbox, message)`; every transition is a versioned write.
pub struct IdempotencyLedger {
    repository: Arc<dyn JobRepository>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
}

impl IdempotencyLedger {
    /// Ledger over `repository`.
    pub fn new(repository: Arc<dyn JobRepository>, clock: Arc<dyn Clock>, settings: LedgerSettings) -> Self {
        Self { repository, clock, settings }
    }

    /// Active lease and run limits.
    pub const fn settings(&self) -> LedgerSettings {
        self.settings
    }

    /// Admit processing of a message for `owner`.
    ///
    /// A new message gets a fresh job. An existing job short-circuits when it
    /// is terminal or leased by a live worker; otherwise its lease has lapsed
    /// and the job is taken over, keeping every stage output it already has.
    pub async fn begin_job(&self, mailbox_id: &str, message_id: &str, owner: &str) -> Result<Admission> {
        let now = self.clock.now();
        let mut fresh = ProcessingJob::new(mailbox_id, message_id, now);
        fresh.attempt = 1;
        fresh.version = 1;
        fresh.lease = Some(self.lease_for(owner, now));

        if self.repository.insert_if_absent(&fresh).await? {
            debug!(job_id = %fresh.id, mailbox_id, message_id, "Job admitted");
            return Ok(Admission::Admitted(fresh));
        }

        for _ in 0..MAX_TAKEOVER_ATTEMPTS {
            let existing = self.repository.find_by_message(mailbox_id, message_id).await?.ok_or_else(|| {
                MailPilotError::Internal(format!("job for {mailbox_id}/{message_id} vanished after insert conflict"))
            })?;

            if existing.is_terminal() {
                return Ok(Admission::AlreadyComplete(existing));
            }
            if existing.lease_is_live(now) {
                return Ok(Admission::AlreadyInFlight(existing));
            }

            if existing.attempt >= self.settings.max_runs {
                let mut failed = existing.clone();
                failed.status = JobStatus::Failed;
                failed.lease = None;
                failed.completed_at = Some(now);
                if failed.last_error.is_none() {
                    failed.last_error = Some("pipeline runs exhausted".to_string());
                }
                if let Some(failed) = self.try_write(&existing, failed, now).await? {
                    warn!(job_id = %failed.id, attempts = failed.attempt, "Job failed after exhausting runs");
                    return Ok(Admission::AlreadyComplete(failed));
                }
                continue;
            }

            let mut resumed = existing.clone();
            resumed.attempt += 1;
            resumed.lease = Some(self.lease_for(owner, now));
            if let Some(resumed) = self.try_write(&existing, resumed, now).await? {
                info!(
                    job_id = %resumed.id,
                    status = %resumed.status,
                    attempt = resumed.attempt,
                    "Took over abandoned job"
                );
                return Ok(Admission::Admitted(resumed));
            }
        }

        let latest = self.repository.find_by_message(mailbox_id, message_id).await?.ok_or_else(|| {
            MailPilotError::Internal(format!("job for {mailbox_id}/{message_id} vanished"))
        })?;
        Ok(Admission::AlreadyInFlight(latest))
    }

    /// Record a stage output and move the job forward, renewing its lease.
    pub async fn advance(&self, job: &ProcessingJob, output: StageOutput) -> Result<ProcessingJob> {
        if job.status != output.requires() {
            return Err(MailPilotError::InvalidInput(format!(
                "job {} is {} but the {} output needs {}",
                job.id,
                job.status,
                output.status(),
                output.requires()
            )));
        }
        let now = self.clock.now();
        let mut next = job.clone();
        next.apply(output);
        next.last_error = None;
        if next.is_terminal() {
            next.lease = None;
            next.completed_at = Some(now);
        } else {
            next.lease = job.lease.as_ref().map(|lease| self.lease_for(&lease.owner, now));
        }
        let next = self.write(job, next, now).await?;
        debug!(job_id = %next.id, status = %next.status, "Job advanced");
        Ok(next)
    }

    /// Note that a send is about to happen, once per job.
    pub async fn record_send_intent(&self, job: &ProcessingJob) -> Result<ProcessingJob> {
        if job.send_intent.is_some() {
            return Ok(job.clone());
        }
        let now = self.clock.now();
        let mut next = job.clone();
        next.send_intent = Some(SendIntent { rfc822_message_id: job.reply_message_id(), recorded_at: now });
        self.write(job, next, now).await
    }

    /// Record a failure.
    ///
    /// Permanent failures, and failures on the last allowed run, end the job
    /// as `Failed`. Otherwise the lease is released so the recovery sweep can
    /// resume the job later from its last completed stage.
    pub async fn fail(&self, job: &ProcessingJob, error: &str, permanent: bool) -> Result<ProcessingJob> {
        let now = self.clock.now();
        let mut next = job.clone();
        next.last_error = Some(truncate_reason(error));
        next.lease = None;
        if permanent || job.attempt >= self.settings.max_runs {
            next.status = JobStatus::Failed;
            next.completed_at = Some(now);
        }
        let next = self.write(job, next, now).await?;
        warn!(
            job_id = %next.id,
            status = %next.status,
            attempt = next.attempt,
            permanent,
            error,
            "Job failure recorded"
        );
        Ok(next)
    }

    /// End the job as `Skipped`, keeping outputs and optional raw text.
    pub async fn skip(&self, job: &ProcessingJob, reason: &str, preserved: Option<String>) -> Result<ProcessingJob> {
        let now = self.clock.now();
        let mut next = job.clone();
        next.status = JobStatus::Skipped;
        next.last_error = Some(truncate_reason(reason));
        if preserved.is_some() {
            next.outputs.preserved = preserved;
        }
        next.lease = None;
        next.completed_at = Some(now);
        let next = self.write(job, next, now).await?;
        info!(job_id = %next.id, reason, "Job skipped");
        Ok(next)
    }

    /// Give up the lease without changing status (mailbox-level problems).
    pub async fn release(&self, job: &ProcessingJob, reason: &str) -> Result<ProcessingJob> {
        let now = self.clock.now();
        let mut next = job.clone();
        next.lease = None;
        next.last_error = Some(truncate_reason(reason));
        self.write(job, next, now).await
    }

    /// Reopen a `Failed` or `Skipped` job for manual reprocessing.
    ///
    /// The job resumes after its last persisted output; a job that already has
    /// a send receipt cannot be reopened.
    pub async fn reopen(&self, job_id: &str) -> Result<ProcessingJob> {
        let job = self
            .repository
            .get(job_id)
            .await?
            .ok_or_else(|| MailPilotError::NotFound(format!("job {job_id}")))?;
        if !matches!(job.status, JobStatus::Failed | JobStatus::Skipped) {
            return Err(MailPilotError::InvalidInput(format!("job {job_id} is {} and cannot be reopened", job.status)));
        }
        let resume_at = job.resume_status();
        if resume_at == JobStatus::Sent {
            return Err(MailPilotError::InvalidInput(format!("job {job_id} was already sent")));
        }
        let now = self.clock.now();
        let mut next = job.clone();
        next.status = resume_at;
        next.attempt = 0;
        next.lease = None;
        next.completed_at = None;
        let next = self.write(&job, next, now).await?;
        info!(job_id, status = %next.status, "Job reopened for reprocessing");
        Ok(next)
    }

    /// Job by id.
    pub async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>> {
        self.repository.get(job_id).await
    }

    /// Job for a message, if one was started.
    pub async fn find(&self, mailbox_id: &str, message_id: &str) -> Result<Option<ProcessingJob>> {
        self.repository.find_by_message(mailbox_id, message_id).await
    }

    /// Jobs in `status`, oldest update first.
    pub async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<ProcessingJob>> {
        self.repository.list_by_status(status, limit).await
    }

    /// Most recent jobs of a mailbox.
    pub async fn list_for_mailbox(&self, mailbox_id: &str, limit: usize) -> Result<Vec<ProcessingJob>> {
        self.repository.list_for_mailbox(mailbox_id, limit).await
    }

    /// Jobs the recovery sweep should resume, skipping the `excluded` mailboxes.
    pub async fn list_abandoned(&self, excluded: &[String], limit: usize) -> Result<Vec<ProcessingJob>> {
        self.repository.list_abandoned(self.clock.now(), excluded, limit).await
    }

    fn lease_for(&self, owner: &str, now: DateTime<Utc>) -> JobLease {
        JobLease { owner: owner.to_string(), expires_at: now + self.settings.liveness_timeout }
    }

    async fn write(&self, current: &ProcessingJob, next: ProcessingJob, now: DateTime<Utc>) -> Result<ProcessingJob> {
        self.try_write(current, next, now).await?.ok_or_else(|| {
            MailPilotError::Conflict(format!("job {} was modified by another worker", current.id))
        })
    }

    async fn try_write(
        &self,
        current: &ProcessingJob,
        mut next: ProcessingJob,
        now: DateTime<Utc>,
    ) -> Result<Option<ProcessingJob>> {
        next.version = current.version + 1;
        next.updated_at = now;
        if self.repository.compare_and_swap(&next, current.version).await? {
            Ok(Some(next))
        } else {
            Ok(None)
        }
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_ERROR_LENGTH {
        return reason.to_string();
    }
    reason.chars().take(MAX_ERROR_LENGTH).collect()
}

//! Port interfaces for job persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpilot_domain::{JobStatus, ProcessingJob, Result};

/// Storage for processing jobs, unique on `(mailbox_id, message_id)`.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert the job unless one exists for the same message; returns whether
    /// the insert happened
    async fn insert_if_absent(&self, job: &ProcessingJob) -> Result<bool>;

    /// Get a job by id
    async fn get(&self, job_id: &str) -> Result<Option<ProcessingJob>>;

    /// Get the job for a message
    async fn find_by_message(&self, mailbox_id: &str, message_id: &str)
        -> Result<Option<ProcessingJob>>;

    /// Replace the stored job if its version still equals `expected_version`
    async fn compare_and_swap(&self, job: &ProcessingJob, expected_version: i64) -> Result<bool>;

    /// Jobs in a status, oldest update first
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> Result<Vec<ProcessingJob>>;

    /// Non-terminal jobs with no lease or a lease that expired before `now`,
    /// leaving out jobs of the `excluded` mailboxes
    async fn list_abandoned(
        &self,
        now: DateTime<Utc>,
        excluded: &[String],
        limit: usize,
    ) -> Result<Vec<ProcessingJob>>;

    /// Most recent jobs of a mailbox
    async fn list_for_mailbox(&self, mailbox_id: &str, limit: usize) -> Result<Vec<ProcessingJob>>;
}

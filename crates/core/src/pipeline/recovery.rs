//! Recovery sweep for abandoned and released jobs

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use mailpilot_domain::{MailboxStatus, ProcessingJob, Result};
use tracing::{debug, info, instrument, warn};

use super::service::{EmailPipeline, JobOutcome};
use crate::ledger::IdempotencyLedger;
use crate::mailbox_ports::MailboxDirectory;
use crate::watch::WatchRegistry;

/// Resumes jobs no live worker is holding.
pub struct RecoverySweep {
    pipeline: Arc<EmailPipeline>,
    ledger: Arc<IdempotencyLedger>,
    directory: Arc<dyn MailboxDirectory>,
    registry: Arc<WatchRegistry>,
    batch_size: usize,
    concurrency: usize,
}

impl RecoverySweep {
    /// Sweep with a batch of 50 and four jobs in flight.
    pub fn new(
        pipeline: Arc<EmailPipeline>,
        ledger: Arc<IdempotencyLedger>,
        directory: Arc<dyn MailboxDirectory>,
        registry: Arc<WatchRegistry>,
    ) -> Self {
        Self { pipeline, ledger, directory, registry, batch_size: 50, concurrency: 4 }
    }

    /// Jobs resumed per run, at least one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Jobs resumed in parallel, at least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resume non-terminal jobs whose lease lapsed or was released. Jobs of
    /// mailboxes waiting for re-authentication stay parked and do not count
    /// against the batch.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<Vec<JobOutcome>> {
        let jobs = self.collect_batch().await?;
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes: Vec<Option<JobOutcome>> = stream::iter(jobs)
            .map(|job| async move { self.recover(job).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let outcomes: Vec<JobOutcome> = outcomes.into_iter().flatten().collect();
        info!(resumed = outcomes.len(), "Recovery sweep finished");
        Ok(outcomes)
    }

    /// Query until a page holds no job of a newly found parked mailbox. The
    /// parked set only grows, so this ends after at most one extra query per
    /// parked mailbox.
    async fn collect_batch(&self) -> Result<Vec<ProcessingJob>> {
        let mut parked: Vec<String> = Vec::new();
        loop {
            let page = self.ledger.list_abandoned(&parked, self.batch_size).await?;
            let mut ready = Vec::with_capacity(page.len());
            let mut found_parked = false;
            for job in page {
                if parked.contains(&job.mailbox_id) {
                    continue;
                }
                if self.registry.mailbox_status(&job.mailbox_id).await? == MailboxStatus::NeedsReauth {
                    parked.push(job.mailbox_id);
                    found_parked = true;
                } else {
                    ready.push(job);
                }
            }
            if !found_parked {
                if !parked.is_empty() {
                    debug!(parked = parked.len(), "Skipped jobs of mailboxes awaiting re-authentication");
                }
                return Ok(ready);
            }
        }
    }

    async fn recover(&self, job: ProcessingJob) -> Option<JobOutcome> {
        match self.try_recover(&job).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Failed to resume job");
                None
            }
        }
    }

    async fn try_recover(&self, job: &ProcessingJob) -> Result<Option<JobOutcome>> {
        if self.registry.mailbox_status(&job.mailbox_id).await? == MailboxStatus::NeedsReauth {
            return Ok(None);
        }
        let Some(mailbox) = self.directory.get(&job.mailbox_id).await? else {
            let job = self.ledger.skip(job, "mailbox no longer exists", None).await?;
            return Ok(Some(JobOutcome::Finished(job)));
        };
        self.pipeline.process(&mailbox, &job.message_id).await.map(Some)
    }
}

//! Notification processing: history resolution, dispatch and resync

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use mailpilot_domain::{
    ConnectedMailbox, CursorAdvance, HistoryResolution, MailPilotError, MailboxStatus,
    Notification, Result,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::history::HistoryCursorTracker;
use crate::mailbox_ports::MailboxDirectory;
use crate::pipeline::{EmailPipeline, JobOutcome};
use crate::provider_ports::MailProvider;
use crate::retry::RetryPolicy;
use crate::watch::WatchRegistry;

/// How the history range of a notification was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionSummary {
    /// Duplicate or out-of-order notification.
    Empty { cursor: u64 },
    Range { from: u64, to: u64 },
    /// Cursor expired; a bounded full resync ran instead.
    Resynced { cursor: u64 },
    /// Nothing ran: mailbox gone, inactive or its credentials were rejected.
    Skipped { reason: String },
}

/// Pipeline result for one message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub message_id: String,
    pub outcome: std::result::Result<JobOutcome, MailPilotError>,
}

/// Everything one notification led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationReport {
    pub mailbox_id: String,
    pub resolution: ResolutionSummary,
    pub dispatched: Vec<DispatchResult>,
}

/// Resolves a queued notification and runs the pipeline for each new message.
pub struct NotificationProcessor {
    directory: Arc<dyn MailboxDirectory>,
    registry: Arc<WatchRegistry>,
    tracker: Arc<HistoryCursorTracker>,
    pipeline: Arc<EmailPipeline>,
    mail: Arc<dyn MailProvider>,
    retry: RetryPolicy,
    concurrency: usize,
    resync_limit: usize,
}

impl NotificationProcessor {
    /// Processor over the given stores and pipeline.
    pub fn new(
        directory: Arc<dyn MailboxDirectory>,
        registry: Arc<WatchRegistry>,
        tracker: Arc<HistoryCursorTracker>,
        pipeline: Arc<EmailPipeline>,
        mail: Arc<dyn MailProvider>,
    ) -> Self {
        let retry = pipeline.settings().retry;
        Self { directory, registry, tracker, pipeline, mail, retry, concurrency: 4, resync_limit: 50 }
    }

    /// Messages processed in parallel per notification
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Recent messages replayed when history has expired
    pub fn with_resync_limit(mut self, limit: usize) -> Self {
        self.resync_limit = limit.max(1);
        self
    }

    /// Resolve the notification's history range and dispatch its messages.
    ///
    /// An expired cursor triggers a full-mailbox resync.
    #[instrument(skip(self, notification), fields(mailbox_id = %notification.mailbox_id, history_id = notification.new_history_id))]
    pub async fn process(&self, notification: &Notification) -> Result<NotificationReport> {
        let mailbox_id = notification.mailbox_id.clone();
        let skipped = |reason: String| NotificationReport {
            mailbox_id: mailbox_id.clone(),
            resolution: ResolutionSummary::Skipped { reason },
            dispatched: Vec::new(),
        };

        let Some(mailbox) = self.directory.get(&mailbox_id).await?.filter(ConnectedMailbox::is_connected) else {
            return Ok(skipped("mailbox is not connected".to_string()));
        };
        let status = self.registry.mailbox_status(&mailbox_id).await?;
        if !status.accepts_work() {
            return Ok(skipped(format!("mailbox is {status}")));
        }

        let resolution = match self.tracker.resolve(&mailbox, notification).await {
            Ok(resolution) => resolution,
            Err(MailPilotError::Auth(reason)) => {
                self.registry.set_status(&mailbox_id, MailboxStatus::NeedsReauth, Some(&reason)).await?;
                return Ok(skipped(format!("credentials rejected: {reason}")));
            }
            Err(err) => return Err(err),
        };

        let (resolution, dispatched) = match resolution {
            HistoryResolution::Empty { cursor } => (ResolutionSummary::Empty { cursor }, Vec::new()),
            HistoryResolution::Range(range) => {
                let dispatched = self.dispatch(&mailbox, range.message_ids).await;
                (ResolutionSummary::Range { from: range.from_history_id, to: range.to_history_id }, dispatched)
            }
            HistoryResolution::Expired { .. } => match self.resync(&mailbox).await {
                Ok((cursor, dispatched)) => (ResolutionSummary::Resynced { cursor }, dispatched),
                Err(MailPilotError::Auth(reason)) => {
                    self.registry.set_status(&mailbox_id, MailboxStatus::NeedsReauth, Some(&reason)).await?;
                    return Ok(skipped(format!("credentials rejected: {reason}")));
                }
                Err(err) => return Err(err),
            },
        };

        Ok(NotificationReport { mailbox_id, resolution, dispatched })
    }

    /// Run the pipeline for each message id with bounded parallelism.
    pub async fn dispatch(&self, mailbox: &ConnectedMailbox, message_ids: Vec<String>) -> Vec<DispatchResult> {
        stream::iter(message_ids)
            .map(|message_id| async move {
                let outcome = self.pipeline.process(mailbox, &message_id).await;
                if let Err(err) = &outcome {
                    warn!(mailbox_id = %mailbox.mailbox_id, message_id = %message_id, error = %err, "Pipeline run failed");
                }
                DispatchResult { message_id, outcome }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Replay the most recent messages and move the cursor to the provider's
    /// current history id. The ledger drops messages already handled.
    async fn resync(&self, mailbox: &ConnectedMailbox) -> Result<(u64, Vec<DispatchResult>)> {
        let mailbox_id = mailbox.mailbox_id.as_str();
        self.registry.set_status(mailbox_id, MailboxStatus::NeedsResync, Some("history cursor expired")).await?;

        let mail = &self.mail;
        let current = self.retry.run("current_history_id", || mail.current_history_id(mailbox)).await?;
        let limit = self.resync_limit;
        let mut message_ids =
            self.retry.run("list_recent_messages", || mail.list_recent_message_ids(mailbox, limit)).await?;
        message_ids.reverse();

        info!(mailbox_id, current, messages = message_ids.len(), "Running full resync");
        let dispatched = self.dispatch(mailbox, message_ids).await;

        let cursor = match self.registry.advance_cursor(mailbox_id, current).await? {
            CursorAdvance::Advanced { to, .. } => to,
            CursorAdvance::Unchanged { cursor } => cursor,
            CursorAdvance::Stale { current } => current,
        };

        if self.registry.mailbox_status(mailbox_id).await? == MailboxStatus::NeedsResync {
            self.registry.set_status(mailbox_id, MailboxStatus::Active, None).await?;
        }
        Ok((cursor, dispatched))
    }
}

//! Watch renewal sweep
//!
//! Re-issues watches that are missing or inside the lead time. Running the
//! sweep twice in a row is cheap: the second pass finds every watch valid and
//! makes no provider calls.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use mailpilot_domain::{
    ConnectedMailbox, ErrorClass, MailboxStatus, PipelineConfig, ProviderError, RenewalConfig,
    RenewalOutcome, Result,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::registry::WatchRegistry;
use crate::clock::Clock;
use crate::mailbox_ports::MailboxDirectory;
use crate::provider_ports::MailProvider;

/// Renewal sweep knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalSettings {
    pub lead_time: chrono::Duration,
    pub max_consecutive_failures: u32,
    pub call_timeout: Duration,
    pub concurrency: usize,
}

impl RenewalSettings {
    /// Settings from the renewal and pipeline sections.
    pub fn from_config(renewal: &RenewalConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            lead_time: chrono::Duration::hours(i64::try_from(renewal.lead_time_hours).unwrap_or(24)),
            max_consecutive_failures: renewal.max_consecutive_failures.max(1),
            call_timeout: pipeline.call_timeout(),
            concurrency: pipeline.worker_concurrency.max(1),
        }
    }
}

/// Per-mailbox sweep result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailboxRenewal {
    pub mailbox_id: String,
    pub outcome: RenewalOutcome,
}

/// Keeps every connected mailbox's watch alive.
pub struct WatchRenewalService {
    registry: Arc<WatchRegistry>,
    directory: Arc<dyn MailboxDirectory>,
    mail: Arc<dyn MailProvider>,
    clock: Arc<dyn Clock>,
    settings: RenewalSettings,
}

impl WatchRenewalService {
    /// Service renewing mailboxes from `directory`.
    pub fn new(
        registry: Arc<WatchRegistry>,
        directory: Arc<dyn MailboxDirectory>,
        mail: Arc<dyn MailProvider>,
        clock: Arc<dyn Clock>,
        settings: RenewalSettings,
    ) -> Self {
        Self { registry, directory, mail, clock, settings }
    }

    /// Renew every connected mailbox that needs it.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<Vec<MailboxRenewal>> {
        let mailboxes = self.directory.list_connected().await?;
        let mut results: Vec<MailboxRenewal> = stream::iter(mailboxes)
            .map(|mailbox| async move {
                let outcome = self.renew(&mailbox).await;
                MailboxRenewal { mailbox_id: mailbox.mailbox_id, outcome }
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.mailbox_id.cmp(&b.mailbox_id));

        let count = |pred: fn(&RenewalOutcome) -> bool| {
            results.iter().filter(|r| pred(&r.outcome)).count()
        };
        info!(
            mailboxes = results.len(),
            renewed = count(|o| matches!(o, RenewalOutcome::Renewed { .. })),
            already_valid = count(|o| matches!(o, RenewalOutcome::AlreadyValid { .. })),
            failed = count(|o| matches!(o, RenewalOutcome::Failed { .. })),
            suspended = count(|o| matches!(o, RenewalOutcome::Suspended { .. })),
            "Watch renewal sweep finished"
        );
        Ok(results)
    }

    /// Renew one mailbox. Storage errors are reported as `Failed`.
    pub async fn renew(&self, mailbox: &ConnectedMailbox) -> RenewalOutcome {
        match self.try_renew(mailbox).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(mailbox_id = %mailbox.mailbox_id, error = %err, "Renewal bookkeeping failed");
                RenewalOutcome::Failed { reason: err.to_string() }
            }
        }
    }

    async fn try_renew(&self, mailbox: &ConnectedMailbox) -> Result<RenewalOutcome> {
        let mailbox_id = mailbox.mailbox_id.as_str();
        let status = self.registry.mailbox_status(mailbox_id).await?;
        if !status.accepts_work() {
            return Ok(RenewalOutcome::Suspended { status });
        }

        let now = self.clock.now();
        if let Some(watch) = self.registry.find_watch(mailbox_id).await? {
            if !watch.expires_within(now, self.settings.lead_time) {
                return Ok(RenewalOutcome::AlreadyValid { expires_at: watch.expires_at });
            }
        }

        let started = match tokio::time::timeout(self.settings.call_timeout, self.mail.start_watch(mailbox)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.settings.call_timeout)),
        };

        match started {
            Ok(registration) => {
                let watch = self.registry.upsert_watch(mailbox_id, &registration).await?;
                self.registry.record_renewal_success(mailbox_id).await?;
                Ok(RenewalOutcome::Renewed { expires_at: watch.expires_at })
            }
            Err(err) if err.class() == ErrorClass::Credential => {
                let reason = err.to_string();
                warn!(mailbox_id, error = %err, "Watch renewal rejected credentials");
                let state =
                    self.registry.set_status(mailbox_id, MailboxStatus::NeedsReauth, Some(&reason)).await?;
                Ok(RenewalOutcome::Suspended { status: state.status })
            }
            Err(err) => {
                let reason = err.to_string();
                let state = self
                    .registry
                    .record_renewal_failure(mailbox_id, &reason, self.settings.max_consecutive_failures)
                    .await?;
                warn!(
                    mailbox_id,
                    failures = state.consecutive_failures,
                    status = %state.status,
                    error = %err,
                    "Watch renewal failed"
                );
                Ok(RenewalOutcome::Failed { reason })
            }
        }
    }
}

//! Scheduled sweeps: watch renewal and abandoned-job recovery.

use std::sync::Arc;

use async_trait::async_trait;
use mailpilot_core::{RecoverySweep, WatchRenewalService};
use mailpilot_domain::RenewalOutcome;
use tracing::{info, warn};

use super::cron::ScheduledJob;
use crate::errors::InfraError;
use crate::observability::log_metric;
use crate::observability::metrics::PipelineMetrics;

/// Renews every watch inside the lead-time window.
pub struct RenewalSweepJob {
    service: Arc<WatchRenewalService>,
    metrics: Arc<PipelineMetrics>,
}

impl RenewalSweepJob {
    /// Job running `service.sweep()`.
    pub const fn new(service: Arc<WatchRenewalService>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { service, metrics }
    }
}

#[async_trait]
impl ScheduledJob for RenewalSweepJob {
    fn name(&self) -> &'static str {
        "watch-renewal"
    }

    async fn run(&self) -> Result<(), InfraError> {
        let results = self.service.sweep().await?;

        let mut renewed = 0usize;
        let mut failed = 0usize;
        for result in &results {
            log_metric(self.metrics.record_renewal(&result.outcome), "renewal.outcome");
            match &result.outcome {
                RenewalOutcome::Renewed { .. } => renewed += 1,
                RenewalOutcome::Failed { reason } => {
                    failed += 1;
                    warn!(mailbox_id = %result.mailbox_id, reason = %reason, "Watch renewal failed");
                }
                RenewalOutcome::AlreadyValid { .. } | RenewalOutcome::Suspended { .. } => {}
            }
        }

        info!(mailboxes = results.len(), renewed, failed, "Renewal sweep complete");
        Ok(())
    }
}

/// Re-runs jobs whose lease expired or was released.
pub struct RecoverySweepJob {
    sweep: Arc<RecoverySweep>,
    metrics: Arc<PipelineMetrics>,
}

impl RecoverySweepJob {
    /// Job running `sweep.run()`.
    pub const fn new(sweep: Arc<RecoverySweep>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { sweep, metrics }
    }
}

#[async_trait]
impl ScheduledJob for RecoverySweepJob {
    fn name(&self) -> &'static str {
        "job-recovery"
    }

    async fn run(&self) -> Result<(), InfraError> {
        let outcomes = self.sweep.run().await?;
        for outcome in &outcomes {
            log_metric(self.metrics.record_job_outcome(outcome), "recovery.job_outcome");
        }
        if !outcomes.is_empty() {
            info!(jobs = outcomes.len(), "Recovery sweep resumed abandoned jobs");
        }
        Ok(())
    }
}

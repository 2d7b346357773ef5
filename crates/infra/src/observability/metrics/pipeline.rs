//! Pipeline-level counters: notifications, job outcomes and renewals

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use mailpilot_core::JobOutcome;
use mailpilot_domain::{JobStatus, RenewalOutcome};
use serde::Serialize;

use super::call::{CallMetrics, CallSnapshot};
use crate::observability::MetricsResult;

/// Process-wide metrics shared by the worker, the schedulers and the HTTP
/// adapters.
#[derive(Debug)]
pub struct PipelineMetrics {
    started_at: Instant,
    notifications_received: AtomicU64,
    notifications_ignored: AtomicU64,
    notifications_rejected: AtomicU64,
    jobs_sent: AtomicU64,
    jobs_skipped: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_deferred: AtomicU64,
    duplicates: AtomicU64,
    renewals_renewed: AtomicU64,
    renewals_valid: AtomicU64,
    renewals_failed: AtomicU64,
    renewals_suspended: AtomicU64,
    /// Outbound HTTP calls
    pub calls: CallMetrics,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Push notification counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationCounts {
    pub received: u64,
    pub ignored: u64,
    /// Dropped because the intake queue was full
    pub rejected: u64,
}

/// Job outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub deferred: u64,
    pub duplicates: u64,
}

/// Renewal outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenewalCounts {
    pub renewed: u64,
    pub already_valid: u64,
    pub failed: u64,
    pub suspended: u64,
}

/// Serializable view returned by the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub notifications: NotificationCounts,
    pub jobs: JobCounts,
    pub renewals: RenewalCounts,
    pub external_calls: CallSnapshot,
}

fn bump(counter: &AtomicU64) -> MetricsResult<()> {
    counter.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl PipelineMetrics {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            notifications_received: AtomicU64::new(0),
            notifications_ignored: AtomicU64::new(0),
            notifications_rejected: AtomicU64::new(0),
            jobs_sent: AtomicU64::new(0),
            jobs_skipped: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_deferred: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            renewals_renewed: AtomicU64::new(0),
            renewals_valid: AtomicU64::new(0),
            renewals_failed: AtomicU64::new(0),
            renewals_suspended: AtomicU64::new(0),
            calls: CallMetrics::new(),
        }
    }

    /// Count a decoded push.
    pub fn record_notification_received(&self) -> MetricsResult<()> {
        bump(&self.notifications_received)
    }

    /// Count a push for an unknown or inactive mailbox.
    pub fn record_notification_ignored(&self) -> MetricsResult<()> {
        bump(&self.notifications_ignored)
    }

    /// Count a push refused by the intake queue.
    pub fn record_notification_rejected(&self) -> MetricsResult<()> {
        bump(&self.notifications_rejected)
    }

    /// Count a pipeline run by how it ended. Runs that found the job already
    /// complete or leased elsewhere count as duplicates.
    pub fn record_job_outcome(&self, outcome: &JobOutcome) -> MetricsResult<()> {
        match outcome {
            JobOutcome::Finished(job) => match job.status {
                JobStatus::Sent => bump(&self.jobs_sent),
                JobStatus::Skipped => bump(&self.jobs_skipped),
                JobStatus::Failed => bump(&self.jobs_failed),
                _ => Ok(()),
            },
            JobOutcome::Deferred(_) => bump(&self.jobs_deferred),
            JobOutcome::AlreadyComplete(_) | JobOutcome::AlreadyInFlight(_) => {
                bump(&self.duplicates)
            }
        }
    }

    /// Count one renewal outcome.
    pub fn record_renewal(&self, outcome: &RenewalOutcome) -> MetricsResult<()> {
        match outcome {
            RenewalOutcome::Renewed { .. } => bump(&self.renewals_renewed),
            RenewalOutcome::AlreadyValid { .. } => bump(&self.renewals_valid),
            RenewalOutcome::Failed { .. } => bump(&self.renewals_failed),
            RenewalOutcome::Suspended { .. } => bump(&self.renewals_suspended),
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            notifications: NotificationCounts {
                received: load(&self.notifications_received),
                ignored: load(&self.notifications_ignored),
                rejected: load(&self.notifications_rejected),
            },
            jobs: JobCounts {
                sent: load(&self.jobs_sent),
                skipped: load(&self.jobs_skipped),
                failed: load(&self.jobs_failed),
                deferred: load(&self.jobs_deferred),
                duplicates: load(&self.duplicates),
            },
            renewals: RenewalCounts {
                renewed: load(&self.renewals_renewed),
                already_valid: load(&self.renewals_valid),
                failed: load(&self.renewals_failed),
                suspended: load(&self.renewals_suspended),
            },
            external_calls: self.calls.snapshot(),
        }
    }
}

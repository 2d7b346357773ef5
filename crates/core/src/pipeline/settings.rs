//! Pipeline tunables resolved from configuration

use chrono::Duration;
use chrono_tz::Tz;
use mailpilot_domain::{MailPilotError, PipelineConfig, Result};

use super::slots::SlotPolicy;
use crate::retry::RetryPolicy;

/// Resolved pipeline configuration for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Lease owner name for this process.
    pub worker_id: String,
    pub assistant_address: String,
    pub retry: RetryPolicy,
    pub default_timezone: Tz,
    pub slots: SlotPolicy,
    pub hold_slots: bool,
    /// Longest slice of the original body sent to the model for drafting.
    pub max_body_chars: usize,
}

impl PipelineSettings {
    /// Resolve timezone names and the retry curve.
    ///
    /// Fails on an unknown default timezone.
    pub fn from_config(config: &PipelineConfig, worker_id: impl Into<String>) -> Result<Self> {
        let default_timezone = config.default_timezone.parse::<Tz>().map_err(|err| {
            MailPilotError::Config(format!("invalid default_timezone {}: {err}", config.default_timezone))
        })?;
        Ok(Self {
            worker_id: worker_id.into(),
            assistant_address: config.assistant_address.clone(),
            retry: RetryPolicy::from_config(config),
            default_timezone,
            slots: SlotPolicy {
                granularity: Duration::minutes(i64::from(config.slot_granularity_minutes.max(1))),
                max_alternatives: config.max_alternatives,
                alternative_search_days: config.alternative_search_days,
                business_start_hour: config.business_start_hour,
                business_end_hour: config.business_end_hour,
            },
            hold_slots: config.hold_slots,
            max_body_chars: 4_000,
        })
    }

    /// Zone named by the request, or the configured default.
    pub fn timezone_for(&self, requested: Option<&str>) -> Tz {
        requested.and_then(|name| name.parse::<Tz>().ok()).unwrap_or(self.default_timezone)
    }
}

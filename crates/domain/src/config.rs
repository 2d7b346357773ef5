//! Configuration structures
//!
//! Loaded by `mailpilot-infra::config`; every section has defaults except the
//! provider credentials, which [`Config::validate`] requires.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ALTERNATIVE_SEARCH_DAYS, DEFAULT_BUSINESS_END_HOUR, DEFAULT_BUSINESS_START_HOUR,
    DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_INTAKE_CAPACITY, DEFAULT_JOB_LIVENESS_SECS,
    DEFAULT_MAX_ALTERNATIVES, DEFAULT_MAX_JOB_RUNS, DEFAULT_MAX_RENEWAL_FAILURES,
    DEFAULT_RECOVERY_BATCH, DEFAULT_RECOVERY_CRON, DEFAULT_RENEWAL_CRON,
    DEFAULT_RENEWAL_LEAD_HOURS, DEFAULT_RESYNC_LIMIT, DEFAULT_SLOT_GRANULARITY_MINUTES,
    DEFAULT_STAGE_BACKOFF_FACTOR, DEFAULT_STAGE_BASE_DELAY_MS, DEFAULT_STAGE_MAX_ATTEMPTS,
    DEFAULT_STAGE_MAX_DELAY_MS, DEFAULT_WORKER_CONCURRENCY,
};
use crate::errors::{MailPilotError, Result};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub openai: OpenAiConfig,
    pub server: ServerConfig,
    pub renewal: RenewalConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Reject configurations that cannot reach the providers.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("google.client_id", &self.google.client_id),
            ("google.client_secret", &self.google.client_secret),
            ("google.pubsub_topic", &self.google.pubsub_topic),
            ("openai.api_key", &self.openai.api_key),
            ("pipeline.assistant_address", &self.pipeline.assistant_address),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(MailPilotError::Config(format!("{name} is required")));
        }
        if self.database.pool_size == 0 {
            return Err(MailPilotError::Config("database.pool_size must be positive".into()));
        }
        if self.pipeline.business_start_hour >= self.pipeline.business_end_hour
            || self.pipeline.business_end_hour > 24
        {
            return Err(MailPilotError::Config(
                "pipeline business hours must satisfy start < end <= 24".into(),
            ));
        }
        if self.pipeline.slot_granularity_minutes == 0 {
            return Err(MailPilotError::Config(
                "pipeline.slot_granularity_minutes must be positive".into(),
            ));
        }
        if self.pipeline.stage_max_attempts == 0 {
            return Err(MailPilotError::Config("pipeline.stage_max_attempts must be positive".into()));
        }
        Ok(())
    }
}

/// SQLite location and pool size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("mailpilot.db"), pool_size: 8 }
    }
}

/// Gmail, Google Calendar and Google OAuth endpoints plus client credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Pub/Sub topic Gmail publishes watch notifications to.
    pub pubsub_topic: String,
    pub watch_label_ids: Vec<String>,
    pub gmail_api_base: String,
    pub calendar_api_base: String,
    pub token_url: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            pubsub_topic: String::new(),
            watch_label_ids: vec!["INBOX".to_string()],
            gmail_api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            calendar_api_base: "https://www.googleapis.com/calendar/v3".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
        }
    }
}

/// Chat completions endpoint and model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub api_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }
}

/// HTTP listener, shared secrets and intake queue size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Shared secret expected as `?token=` on push deliveries.
    pub webhook_token: Option<String>,
    /// Bearer token guarding the internal and admin routes.
    pub admin_token: Option<String>,
    pub intake_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            webhook_token: None,
            admin_token: None,
            intake_capacity: DEFAULT_INTAKE_CAPACITY,
        }
    }
}

/// Watch renewal schedule and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenewalConfig {
    /// Six-field cron expression (seconds first).
    pub cron_expression: String,
    pub lead_time_hours: u64,
    pub max_consecutive_failures: u32,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            cron_expression: DEFAULT_RENEWAL_CRON.to_string(),
            lead_time_hours: DEFAULT_RENEWAL_LEAD_HOURS,
            max_consecutive_failures: DEFAULT_MAX_RENEWAL_FAILURES,
        }
    }
}

impl RenewalConfig {
    /// Renew watches expiring within this window.
    pub const fn lead_time(&self) -> Duration {
        Duration::from_secs(self.lead_time_hours * 3_600)
    }
}

/// Tunables for the per-message pipeline and its workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Address users CC to engage the assistant.
    pub assistant_address: String,
    pub call_timeout_secs: u64,
    pub stage_max_attempts: u32,
    pub stage_base_delay_ms: u64,
    pub stage_backoff_factor: u32,
    pub stage_max_delay_ms: u64,
    pub liveness_timeout_secs: u64,
    pub max_job_runs: u32,
    pub slot_granularity_minutes: u32,
    pub max_alternatives: usize,
    pub alternative_search_days: u32,
    pub business_start_hour: u32,
    pub business_end_hour: u32,
    /// IANA zone used when a request names none.
    pub default_timezone: String,
    pub worker_concurrency: usize,
    pub resync_limit: usize,
    pub recovery_cron_expression: String,
    pub recovery_batch_size: usize,
    pub hold_slots: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assistant_address: String::new(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            stage_max_attempts: DEFAULT_STAGE_MAX_ATTEMPTS,
            stage_base_delay_ms: DEFAULT_STAGE_BASE_DELAY_MS,
            stage_backoff_factor: DEFAULT_STAGE_BACKOFF_FACTOR,
            stage_max_delay_ms: DEFAULT_STAGE_MAX_DELAY_MS,
            liveness_timeout_secs: DEFAULT_JOB_LIVENESS_SECS,
            max_job_runs: DEFAULT_MAX_JOB_RUNS,
            slot_granularity_minutes: DEFAULT_SLOT_GRANULARITY_MINUTES,
            max_alternatives: DEFAULT_MAX_ALTERNATIVES,
            alternative_search_days: DEFAULT_ALTERNATIVE_SEARCH_DAYS,
            business_start_hour: DEFAULT_BUSINESS_START_HOUR,
            business_end_hour: DEFAULT_BUSINESS_END_HOUR,
            default_timezone: "UTC".to_string(),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            resync_limit: DEFAULT_RESYNC_LIMIT,
            recovery_cron_expression: DEFAULT_RECOVERY_CRON.to_string(),
            recovery_batch_size: DEFAULT_RECOVERY_BATCH,
            hold_slots: false,
        }
    }
}

impl PipelineConfig {
    /// Per-call timeout for provider requests.
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Lease length after which a job counts as abandoned.
    pub const fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Config {
        let mut config = Config::default();
        config.google.client_id = "client".into();
        config.google.client_secret = "secret".into();
        config.google.pubsub_topic = "projects/p/topics/gmail".into();
        config.openai.api_key = "sk-test".into();
        config.pipeline.assistant_address = "assistant@example.com".into();
        config
    }

    #[test]
    fn defaults_follow_documented_thresholds() {
        let config = Config::default();
        assert_eq!(config.renewal.lead_time(), Duration::from_secs(24 * 3_600));
        assert_eq!(config.renewal.max_consecutive_failures, 3);
        assert_eq!(config.pipeline.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.pipeline.stage_max_attempts, 5);
    }

    #[test]
    fn validate_requires_credentials() {
        let err = Config::default().validate().unwrap_err();
        assert!(matches!(err, MailPilotError::Config(msg) if msg.contains("google.client_id")));
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_business_hours() {
        let mut config = complete();
        config.pipeline.business_start_hour = 18;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_sections_fill_from_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"renewal":{"lead_time_hours":12}}"#).unwrap();
        assert_eq!(config.renewal.lead_time_hours, 12);
        assert_eq!(config.renewal.cron_expression, DEFAULT_RENEWAL_CRON);
        assert_eq!(config.database.pool_size, 8);
    }
}

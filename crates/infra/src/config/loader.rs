//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required credentials are missing, falls back to a file
//! 3. Environment variables that are set still override file values
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! Required (environment-only loading):
//! - `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET`: OAuth client credentials
//! - `OPENAI_API_KEY`: completion service key
//! - `MAILPILOT_PUBSUB_TOPIC`: Pub/Sub topic Gmail publishes to
//! - `MAILPILOT_ASSISTANT_ADDRESS`: address users CC to engage the assistant
//!
//! Optional:
//! - `MAILPILOT_DB_PATH`, `MAILPILOT_DB_POOL_SIZE`
//! - `MAILPILOT_BIND_ADDRESS`, `MAILPILOT_WEBHOOK_TOKEN`, `MAILPILOT_ADMIN_TOKEN`,
//!   `MAILPILOT_INTAKE_CAPACITY`
//! - `MAILPILOT_RENEWAL_CRON`, `MAILPILOT_RENEWAL_LEAD_HOURS`,
//!   `MAILPILOT_RENEWAL_MAX_FAILURES`
//! - `MAILPILOT_CALL_TIMEOUT_SECS`, `MAILPILOT_STAGE_MAX_ATTEMPTS`,
//!   `MAILPILOT_STAGE_BASE_DELAY_MS`, `MAILPILOT_STAGE_MAX_DELAY_MS`
//! - `MAILPILOT_LIVENESS_TIMEOUT_SECS`, `MAILPILOT_MAX_JOB_RUNS`
//! - `MAILPILOT_DEFAULT_TIMEZONE`, `MAILPILOT_WORKER_CONCURRENCY`,
//!   `MAILPILOT_RECOVERY_CRON`, `MAILPILOT_HOLD_SLOTS`
//! - `OPENAI_MODEL`
//!
//! ## File Locations
//! `MAILPILOT_CONFIG` names the file explicitly. Otherwise the loader probes
//! (in order) `./mailpilot.toml`, `./mailpilot.json` and
//! `$HOME/.config/mailpilot/config.toml`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use mailpilot_domain::{Config, MailPilotError, Result};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file. The
/// result is validated before it is returned.
///
/// # Errors
/// Returns `MailPilotError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - Required fields are missing
pub fn load() -> Result<Config> {
    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            let explicit = std::env::var("MAILPILOT_CONFIG").ok().map(PathBuf::from);
            let mut config = load_from_file(explicit)?;
            apply_env_overrides(&mut config)?;
            config
        }
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Credentials must all be present; every other value falls back to its
/// default.
///
/// # Errors
/// Returns `MailPilotError::Config` if required variables are missing
/// or have invalid values.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    config.google.client_id = env_var("GOOGLE_CLIENT_ID")?;
    config.google.client_secret = env_var("GOOGLE_CLIENT_SECRET")?;
    config.google.pubsub_topic = env_var("MAILPILOT_PUBSUB_TOPIC")?;
    config.openai.api_key = env_var("OPENAI_API_KEY")?;
    config.pipeline.assistant_address = env_var("MAILPILOT_ASSISTANT_ADDRESS")?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Overlay every environment variable that is set onto `config`.
///
/// # Errors
/// Returns `MailPilotError::Config` when a numeric variable does not parse.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    override_string("GOOGLE_CLIENT_ID", &mut config.google.client_id);
    override_string("GOOGLE_CLIENT_SECRET", &mut config.google.client_secret);
    override_string("MAILPILOT_PUBSUB_TOPIC", &mut config.google.pubsub_topic);
    override_string("OPENAI_API_KEY", &mut config.openai.api_key);
    override_string("OPENAI_MODEL", &mut config.openai.model);
    override_string("MAILPILOT_ASSISTANT_ADDRESS", &mut config.pipeline.assistant_address);

    if let Ok(path) = std::env::var("MAILPILOT_DB_PATH") {
        config.database.path = PathBuf::from(path);
    }
    override_parsed("MAILPILOT_DB_POOL_SIZE", &mut config.database.pool_size)?;

    override_string("MAILPILOT_BIND_ADDRESS", &mut config.server.bind_address);
    if let Ok(token) = std::env::var("MAILPILOT_WEBHOOK_TOKEN") {
        config.server.webhook_token = Some(token);
    }
    if let Ok(token) = std::env::var("MAILPILOT_ADMIN_TOKEN") {
        config.server.admin_token = Some(token);
    }
    override_parsed("MAILPILOT_INTAKE_CAPACITY", &mut config.server.intake_capacity)?;

    override_string("MAILPILOT_RENEWAL_CRON", &mut config.renewal.cron_expression);
    override_parsed("MAILPILOT_RENEWAL_LEAD_HOURS", &mut config.renewal.lead_time_hours)?;
    override_parsed(
        "MAILPILOT_RENEWAL_MAX_FAILURES",
        &mut config.renewal.max_consecutive_failures,
    )?;

    let pipeline = &mut config.pipeline;
    override_parsed("MAILPILOT_CALL_TIMEOUT_SECS", &mut pipeline.call_timeout_secs)?;
    override_parsed("MAILPILOT_STAGE_MAX_ATTEMPTS", &mut pipeline.stage_max_attempts)?;
    override_parsed("MAILPILOT_STAGE_BASE_DELAY_MS", &mut pipeline.stage_base_delay_ms)?;
    override_parsed("MAILPILOT_STAGE_MAX_DELAY_MS", &mut pipeline.stage_max_delay_ms)?;
    override_parsed("MAILPILOT_LIVENESS_TIMEOUT_SECS", &mut pipeline.liveness_timeout_secs)?;
    override_parsed("MAILPILOT_MAX_JOB_RUNS", &mut pipeline.max_job_runs)?;
    override_parsed("MAILPILOT_WORKER_CONCURRENCY", &mut pipeline.worker_concurrency)?;
    override_string("MAILPILOT_DEFAULT_TIMEZONE", &mut pipeline.default_timezone);
    override_string("MAILPILOT_RECOVERY_CRON", &mut pipeline.recovery_cron_expression);
    pipeline.hold_slots = env_bool("MAILPILOT_HOLD_SLOTS", pipeline.hold_slots);

    Ok(())
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `MailPilotError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(MailPilotError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            MailPilotError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| MailPilotError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| MailPilotError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| MailPilotError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(MailPilotError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("mailpilot.toml"));
        candidates.push(cwd.join("mailpilot.json"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(".config/mailpilot/config.toml"));
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| {
            MailPilotError::Config(format!("Missing required environment variable: {key}"))
        })
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        *target = value;
    }
}

fn override_parsed<T>(key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| MailPilotError::Config(format!("Invalid value for {key}: {e}")))?;
    }
    Ok(())
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

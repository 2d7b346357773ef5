use std::time::Duration;

use mailpilot_domain::MailPilotError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,mailpilot=debug";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. `MAILPILOT_LOG_FORMAT=json`
/// switches to JSON lines for log shippers.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("MAILPILOT_LOG_FORMAT").is_ok_and(|value| value.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json { builder.json().try_init() } else { builder.try_init() };
    if let Err(err) = result {
        warn!(error = %err, "tracing subscriber already installed");
    }
}

/// Log the outcome of a route handler with structured fields.
///
/// `route` should be a stable identifier without request data.
#[inline]
pub fn log_request_outcome(route: &str, elapsed: Duration, success: bool) {
    let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

    if success {
        info!(route, duration_ms, "request_success");
    } else {
        warn!(route, duration_ms, "request_failure");
    }
}

/// Convert a `MailPilotError` into a stable label suitable for logging.
#[inline]
pub const fn error_label(error: &MailPilotError) -> &'static str {
    match error {
        MailPilotError::Database(_) => "database",
        MailPilotError::Config(_) => "config",
        MailPilotError::Network(_) => "network",
        MailPilotError::Auth(_) => "auth",
        MailPilotError::NotFound(_) => "not_found",
        MailPilotError::InvalidInput(_) => "invalid_input",
        MailPilotError::Conflict(_) => "conflict",
        MailPilotError::Internal(_) => "internal",
    }
}

//! Bounded retry with exponential backoff around external calls.
//!
//! Every call is wrapped in a timeout; a timeout counts as a transient
//! failure. Only [`ProviderError::is_retryable`] errors are retried.

use std::future::Future;
use std::time::Duration;

use mailpilot_domain::{PipelineConfig, ProviderError, ProviderResult};
use tracing::warn;

/// Timeout plus capped exponential backoff around provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl RetryPolicy {
    /// Retry curve from the pipeline section.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.stage_max_attempts.max(1),
            base_delay: Duration::from_millis(config.stage_base_delay_ms),
            factor: config.stage_backoff_factor.max(1),
            max_delay: Duration::from_millis(config.stage_max_delay_ms),
            call_timeout: config.call_timeout(),
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.saturating_pow(exponent);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    /// Run `call` once under the call timeout.
    pub async fn once<T, Fut>(&self, call: Fut) -> ProviderResult<T>
    where
        Fut: Future<Output = ProviderResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.call_timeout)),
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match self.once(call()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "External call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

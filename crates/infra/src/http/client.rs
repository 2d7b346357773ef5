use std::sync::Arc;
use std::time::{Duration, Instant};

use mailpilot_domain::{MailPilotError, ProviderError, ProviderResult};
use rand::Rng;
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::errors::InfraError;
use crate::observability::log_metric;
use crate::observability::metrics::PipelineMetrics;

/// HTTP client with built-in retry, timeout and call metrics.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self, MailPilotError> {
        Self::builder().build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Execute the provided request builder with retry semantics.
    ///
    /// Server errors, 429 and transport failures are retried; the last
    /// response is returned as-is so callers can classify its status.
    pub async fn send(&self, builder: RequestBuilder) -> ProviderResult<Response> {
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            let cloned_builder = builder.try_clone().ok_or_else(|| {
                ProviderError::Malformed(
                    "request body cannot be cloned; buffer the body to enable retries".into(),
                )
            })?;
            let last_attempt = attempt + 1 >= attempts;

            match self.execute(cloned_builder, attempt + 1).await {
                Ok(response) => {
                    if is_retryable_status(response.status()) && !last_attempt {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if !last_attempt && err.is_retryable() {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(ProviderError::Transient("http client exhausted retries without producing a result".into()))
    }

    /// Execute exactly once. Used for non-idempotent calls such as sending
    /// mail, where the caller owns the recovery path.
    pub async fn send_once(&self, builder: RequestBuilder) -> ProviderResult<Response> {
        self.execute(builder, 1).await
    }

    async fn execute(&self, builder: RequestBuilder, attempt: usize) -> ProviderResult<Response> {
        let request = builder.build().map_err(|err| {
            let infra: InfraError = err.into();
            ProviderError::Malformed(infra.to_string())
        })?;

        let method = request.method().clone();
        let url = request.url().clone();
        debug!(attempt, %method, url = %redact(&url), "sending HTTP request");

        let started = Instant::now();
        let result = self.client.execute(request).await;
        self.record(|metrics| metrics.calls.record_call(started.elapsed()), "http.call");

        match result {
            Ok(response) => {
                let status = response.status();
                debug!(attempt, %method, url = %redact(&url), %status, "received HTTP response");
                if !status.is_success() {
                    self.record(|metrics| metrics.calls.record_error(), "http.error");
                }
                Ok(response)
            }
            Err(err) => {
                debug!(attempt, %method, url = %redact(&url), error = %err, "HTTP request failed");
                if err.is_timeout() {
                    self.record(|metrics| metrics.calls.record_timeout(), "http.timeout");
                    return Err(ProviderError::Timeout(self.timeout));
                }
                self.record(|metrics| metrics.calls.record_error(), "http.error");
                Err(transport_error(err))
            }
        }
    }

    fn record<F>(&self, op: F, metric: &'static str)
    where
        F: FnOnce(&PipelineMetrics) -> crate::observability::MetricsResult<()>,
    {
        if let Some(metrics) = &self.metrics {
            log_metric(op(metrics), metric);
        }
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = u32::try_from(retry_number.saturating_sub(1).min(8)).unwrap_or(8);
        let base = self.base_backoff.saturating_mul(1u32 << shift);
        let jitter_cap = u64::try_from(base.as_millis() / 4).unwrap_or(0);
        if jitter_cap == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
    user_agent: Option<String>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            user_agent: Some(concat!("mailpilot/", env!("CARGO_PKG_VERSION")).to_string()),
            metrics: None,
        }
    }
}

impl HttpClientBuilder {
    /// Per-request timeout.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configure the total number of attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// First retry delay before jitter.
    pub const fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// `User-Agent` header sent on every request.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Record call latency and errors into `metrics`.
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the client; fails if reqwest cannot.
    pub fn build(self) -> Result<HttpClient, MailPilotError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        let client = builder.build().map_err(|err| {
            let infra: InfraError = err.into();
            MailPilotError::Config(format!("failed to build HTTP client: {infra}"))
        })?;

        Ok(HttpClient {
            client,
            timeout: self.timeout,
            max_attempts: self.max_attempts.max(1),
            base_backoff: self.base_backoff,
            metrics: self.metrics,
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_request() || err.is_body() {
        return ProviderError::Transient(format!("HTTP transport failure: {err}"));
    }
    if err.is_decode() {
        return ProviderError::Malformed(format!("HTTP response could not be decoded: {err}"));
    }
    ProviderError::Transient(err.to_string())
}

/// Drop the query string; it may carry tokens.
fn redact(url: &reqwest::Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

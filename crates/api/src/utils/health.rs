//! Health report served by `GET /healthz`

use chrono::Utc;
use mailpilot_infra::observability::metrics::MetricsSnapshot;
use serde::Serialize;

/// Overall health of the service.
///
/// # Example
/// ```no_run
/// use mailpilot_api::utils::health::{ComponentHealth, HealthStatus};
///
/// let mut status = HealthStatus::new()
///     .add_component(ComponentHealth::healthy("database"))
///     .add_component(ComponentHealth::unhealthy("notification_worker", "stopped"));
/// status.calculate_score();
///
/// assert_eq!(status.score, 0.5);
/// assert!(!status.is_healthy);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,

    /// Fraction of healthy components, from 0.0 to 1.0
    pub score: f64,

    pub components: Vec<ComponentHealth>,

    /// Counters since process start
    pub metrics: Option<MetricsSnapshot>,

    /// Unix timestamp when the check ran
    pub timestamp: i64,
}

impl HealthStatus {
    /// Empty status; healthy until a component says otherwise.
    pub fn new() -> Self {
        Self {
            is_healthy: true,
            score: 1.0,
            components: Vec::new(),
            metrics: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Append a component check.
    #[must_use]
    pub fn add_component(mut self, component: ComponentHealth) -> Self {
        self.components.push(component);
        self
    }

    /// Attach a metrics snapshot.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsSnapshot) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Every component has to be healthy; the score is informational.
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate_score(&mut self) {
        if self.components.is_empty() {
            return;
        }

        let healthy_count = self.components.iter().filter(|c| c.is_healthy).count();
        self.score = healthy_count as f64 / self.components.len() as f64;
        self.is_healthy = healthy_count == self.components.len();
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Health of one component (database, worker, intake queue).
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub is_healthy: bool,
    pub message: Option<String>,
}

impl ComponentHealth {
    /// Healthy component without detail.
    pub fn healthy(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: true, message: None }
    }

    /// Unhealthy component with the reason.
    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: false, message: Some(message.into()) }
    }

    /// Healthy, with an informational note.
    pub fn healthy_with(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), is_healthy: true, message: Some(message.into()) }
    }
}

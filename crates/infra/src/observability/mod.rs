//! Observability infrastructure for in-process metrics
//!
//! Counters are plain atomics; latency samples live in a poison-safe ring
//! buffer. Everything is exposed as a serializable snapshot through the
//! health endpoint.
//!
//! ## Design Principles
//!
//! 1. **Poison Recovery**: mutex locks recover the inner data instead of
//!    panicking, logging a warning.
//! 2. **Result Returns**: record methods return `MetricsResult<()>` so callers
//!    log and continue; recording currently always succeeds.
//! 3. **Ring Buffers**: `VecDeque` for O(1) eviction of old samples.
//!
//! ```rust
//! use mailpilot_infra::observability::metrics::PipelineMetrics;
//!
//! let metrics = PipelineMetrics::new();
//! if let Err(e) = metrics.record_notification_received() {
//!     tracing::warn!("Failed to record metric: {}", e);
//! }
//! ```

pub mod metrics;

/// Metrics error type
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Empty data set - cannot calculate aggregate metric
    #[error("Empty data: cannot calculate {metric}")]
    EmptyData {
        /// Metric name that failed (e.g., "P95", "P50")
        metric: &'static str,
    },
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Log a failed metric write without interrupting the caller.
pub fn log_metric(result: MetricsResult<()>, metric: &'static str) {
    if let Err(err) = result {
        tracing::debug!(metric, error = %err, "Failed to record metric");
    }
}

//! External call metrics
//!
//! Tracks call counts, failures, timeouts and latency samples for the Gmail,
//! Calendar, OAuth and completion endpoints.
//!
//! ## Design
//! - **VecDeque ring buffer** for O(1) eviction
//! - **Poison-safe locking** with explicit match pattern (no .expect())
//! - **MetricsResult returns** (currently always Ok)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::observability::{MetricsError, MetricsResult};

const MAX_SAMPLES: usize = 1000;

/// Counters and latency samples for outbound calls.
#[derive(Debug)]
pub struct CallMetrics {
    /// Requests issued, retries included
    pub total_calls: AtomicU64,
    /// Calls that ended in a transport error or a non-success status
    pub errors: AtomicU64,
    /// Calls that hit the client timeout
    pub timeouts: AtomicU64,
    /// Latency samples in milliseconds (ring buffer, max 1000)
    pub latencies: Mutex<VecDeque<u64>>,
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of [`CallMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub total: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
}

impl CallMetrics {
    /// Empty counters.
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    /// Record one completed call and its latency.
    pub fn record_call(&self, latency: Duration) -> MetricsResult<()> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        let mut samples = match self.latencies.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "CallMetrics::latencies",
                    "Mutex poisoned during latency recording, recovering data"
                );
                poison_err.into_inner()
            }
        };
        samples.push_back(ms);
        if samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
        Ok(())
    }

    /// Count a failed call.
    pub fn record_error(&self) -> MetricsResult<()> {
        self.errors.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Count a timed-out call.
    pub fn record_timeout(&self) -> MetricsResult<()> {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// P50 latency in milliseconds.
    ///
    /// Returns `MetricsError::EmptyData` if no samples recorded.
    pub fn p50_ms(&self) -> MetricsResult<u64> {
        self.percentile(0.50, "P50")
    }

    /// P95 latency in milliseconds.
    pub fn p95_ms(&self) -> MetricsResult<u64> {
        self.percentile(0.95, "P95")
    }

    /// Counters and latency percentiles right now.
    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            total: self.total_calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            p50_ms: self.p50_ms().ok(),
            p95_ms: self.p95_ms().ok(),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn percentile(&self, percentile: f64, metric_name: &'static str) -> MetricsResult<u64> {
        let samples = match self.latencies.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "CallMetrics::latencies",
                    percentile,
                    "Mutex poisoned during percentile read, recovering"
                );
                poison_err.into_inner()
            }
        };

        if samples.is_empty() {
            return Err(MetricsError::EmptyData { metric: metric_name });
        }

        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile) as usize).min(sorted.len() - 1);
        Ok(sorted[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_calls_errors_and_timeouts() {
        let metrics = CallMetrics::new();
        metrics.record_call(Duration::from_millis(10)).unwrap();
        metrics.record_call(Duration::from_millis(20)).unwrap();
        metrics.record_error().unwrap();
        metrics.record_timeout().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.timeouts, 1);
    }

    #[test]
    fn percentiles_over_samples() {
        let metrics = CallMetrics::new();
        assert!(matches!(metrics.p50_ms(), Err(MetricsError::EmptyData { metric: "P50" })));

        for ms in [100, 200, 300, 400, 500] {
            metrics.record_call(Duration::from_millis(ms)).unwrap();
        }

        assert_eq!(metrics.p50_ms().unwrap(), 300);
        assert_eq!(metrics.p95_ms().unwrap(), 500);
    }

    #[test]
    fn ring_buffer_keeps_latest_samples() {
        let metrics = CallMetrics::new();
        for i in 0..1100 {
            metrics.record_call(Duration::from_millis(i)).unwrap();
        }

        let samples = match metrics.latencies.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        };
        assert_eq!(samples.len(), 1000);
        assert_eq!(samples[0], 100);
        assert_eq!(samples[999], 1099);
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(CallMetrics::new());
        let metrics_clone = Arc::clone(&metrics);
        let _ = thread::spawn(move || {
            let _guard = metrics_clone.latencies.lock().unwrap();
            panic!("intentional poison");
        })
        .join();

        assert!(metrics.record_call(Duration::from_millis(100)).is_ok());
        assert_eq!(metrics.p50_ms().unwrap(), 100);
    }
}

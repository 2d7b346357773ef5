//! Metrics collection modules
//!
//! Thread-safe metrics for the pipeline and its outbound calls.

pub mod call;
pub mod pipeline;

pub use call::{CallMetrics, CallSnapshot};
pub use pipeline::{MetricsSnapshot, PipelineMetrics};

//! Scheduling infrastructure for periodic sweeps
//!
//! - Watch renewal (keeps every push subscription ahead of its expiry)
//! - Job recovery (resumes jobs abandoned by a crash or a released lease)
//!
//! Both run on [`CronScheduler`], which follows the runtime rules used across
//! the crate:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support
//! - Timeout wrapping on all async operations

pub mod cron;
pub mod error;
pub mod jobs;

pub use cron::{CronScheduler, CronSchedulerConfig, ScheduledJob};
pub use error::{SchedulerError, SchedulerResult};
pub use jobs::{RecoverySweepJob, RenewalSweepJob};

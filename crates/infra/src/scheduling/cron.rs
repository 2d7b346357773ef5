//! Cron-driven trigger for periodic sweeps.
//!
//! Wraps `tokio-cron-scheduler` with explicit lifecycle management: join
//! handles are tracked, cancellation is explicit, and every asynchronous
//! operation (start, stop, each job run) is wrapped in a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use mailpilot_infra::errors::InfraError;
//! use mailpilot_infra::scheduling::{CronScheduler, CronSchedulerConfig, ScheduledJob, SchedulerResult};
//!
//! struct NoopJob;
//!
//! #[async_trait]
//! impl ScheduledJob for NoopJob {
//!     fn name(&self) -> &'static str {
//!         "noop"
//!     }
//!
//!     async fn run(&self) -> Result<(), InfraError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> SchedulerResult<()> {
//! let mut scheduler = CronScheduler::with_config(
//!     CronSchedulerConfig { cron_expression: "0 */5 * * * *".into(), ..Default::default() },
//!     Arc::new(NoopJob),
//! )
//! .await?;
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::InfraError;
use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// A unit of periodic work.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Execute the job once.
    async fn run(&self) -> Result<(), InfraError>;
}

/// Configuration for a [`CronScheduler`].
#[derive(Debug, Clone)]
pub struct CronSchedulerConfig {
    /// Cron expression (with seconds field) describing the schedule.
    pub cron_expression: String,
    /// Timeout applied to a single job execution.
    pub job_timeout: Duration,
    /// Timeout for starting the underlying scheduler.
    pub start_timeout: Duration,
    /// Timeout for stopping the scheduler.
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for CronSchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 */5 * * * *".into(),
            job_timeout: Duration::from_secs(300),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs one [`ScheduledJob`] on a cron schedule.
///
/// Overlapping runs are skipped: if the previous run is still going when the
/// next tick fires, the tick is dropped with a warning.
pub struct CronScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    config: CronSchedulerConfig,
    job_id: Uuid,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
    job: Arc<dyn ScheduledJob>,
}

impl CronScheduler {
    /// Create a scheduler with the default timeouts.
    pub async fn new(cron_expression: String, job: Arc<dyn ScheduledJob>) -> SchedulerResult<Self> {
        let config = CronSchedulerConfig { cron_expression, ..CronSchedulerConfig::default() };
        Self::with_config(config, job).await
    }

    /// Create a scheduler with a custom configuration.
    pub async fn with_config(
        config: CronSchedulerConfig,
        job: Arc<dyn ScheduledJob>,
    ) -> SchedulerResult<Self> {
        let raw_scheduler = JobScheduler::new()
            .await
            .map_err(|source| SchedulerError::CreationFailed { source })?;

        let mut scheduler = Self {
            scheduler: Arc::new(RwLock::new(raw_scheduler)),
            config,
            job_id: Uuid::nil(),
            monitor_handle: None,
            cancellation: CancellationToken::new(),
            job,
        };

        scheduler.job_id = scheduler.register_job().await?;
        Ok(scheduler)
    }

    /// Start the scheduler, spawning the monitoring task.
    #[instrument(skip(self), fields(job = self.job.name()))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler = self.scheduler.clone();
        let start_timeout = self.config.start_timeout;
        let start_result = tokio::time::timeout(start_timeout, async move {
            let guard = scheduler.write().await;
            guard.start().await
        })
        .await
        .map_err(|source| SchedulerError::Timeout { duration: start_timeout, source })?;

        start_result.map_err(|source| SchedulerError::StartFailed { source })?;

        let cancel = self.cancellation.clone();
        let name = self.job.name();
        let handle = tokio::spawn(async move {
            cancel.cancelled().await;
            debug!(job = name, "Scheduler monitor cancelled");
        });

        self.monitor_handle = Some(handle);
        info!(cron = %self.config.cron_expression, "Scheduler started");
        Ok(())
    }

    /// Stop the scheduler and wait for the monitor task to finish.
    #[instrument(skip(self), fields(job = self.job.name()))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation.cancel();

        let scheduler = self.scheduler.clone();
        let stop_timeout = self.config.stop_timeout;
        let stop_result = tokio::time::timeout(stop_timeout, async move {
            let mut guard = scheduler.write().await;
            guard.shutdown().await
        })
        .await
        .map_err(|source| SchedulerError::Timeout { duration: stop_timeout, source })?;

        stop_result.map_err(|source| SchedulerError::StopFailed { source })?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|source| SchedulerError::Timeout { duration: join_timeout, source })??;
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Returns true when the monitor task is active.
    pub fn is_running(&self) -> bool {
        self.monitor_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn register_job(&mut self) -> SchedulerResult<Uuid> {
        if self.job_id != Uuid::nil() {
            return Ok(self.job_id);
        }

        let job = self.job.clone();
        let job_timeout = self.config.job_timeout;
        let in_progress = Arc::new(tokio::sync::Mutex::new(()));

        let job_definition = Job::new_async(self.config.cron_expression.as_str(), move |_id, _lock| {
            let job = job.clone();
            let in_progress = in_progress.clone();

            Box::pin(async move {
                let Ok(_guard) = in_progress.try_lock() else {
                    warn!(job = job.name(), "Previous run still in progress; skipping tick");
                    return;
                };
                let started = Instant::now();

                match tokio::time::timeout(job_timeout, job.run()).await {
                    Ok(Ok(())) => {
                        debug!(
                            job = job.name(),
                            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                            "Scheduled job finished"
                        );
                    }
                    Ok(Err(err)) => {
                        error!(job = job.name(), error = %err, "Scheduled job failed");
                    }
                    Err(_) => {
                        warn!(
                            job = job.name(),
                            timeout_secs = job_timeout.as_secs(),
                            "Scheduled job timed out"
                        );
                    }
                }
            })
        })
        .map_err(|source| SchedulerError::JobRegistrationFailed { source })?;

        let job_id = job_definition.guid();
        let scheduler = self.scheduler.write().await;
        scheduler
            .add(job_definition)
            .await
            .map_err(|source| SchedulerError::JobRegistrationFailed { source })?;

        debug!(cron = %self.config.cron_expression, job_id = %job_id, job = self.job.name(), "Registered scheduled job");
        Ok(job_id)
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(job = self.job.name(), "CronScheduler dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}

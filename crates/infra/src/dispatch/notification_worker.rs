//! Background worker draining the notification intake queue.
//!
//! The webhook handler only validates a push and enqueues it through a
//! [`NotificationQueue`]; this worker resolves history and runs the pipeline
//! off the request path. The queue is bounded: when it is full the handler
//! reports back-pressure and the push provider redelivers later.
//!
//! Join handles are tracked, cancellation is explicit, and every notification
//! is processed under a timeout.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mailpilot_infra::dispatch::{NotificationWorker, NotificationWorkerConfig};
//! use mailpilot_infra::observability::metrics::PipelineMetrics;
//!
//! # async fn example(processor: Arc<mailpilot_core::NotificationProcessor>) -> Result<(), mailpilot_infra::dispatch::DispatchError> {
//! let metrics = Arc::new(PipelineMetrics::new());
//! let mut worker = NotificationWorker::new(processor, NotificationWorkerConfig::default(), metrics);
//! let queue = worker.queue();
//!
//! worker.start()?;
//! // ... webhook handlers call queue.enqueue(notification) ...
//! worker.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use mailpilot_core::NotificationProcessor;
use mailpilot_domain::constants::{DEFAULT_INTAKE_CAPACITY, DEFAULT_WORKER_CONCURRENCY};
use mailpilot_domain::Notification;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::observability::log_metric;
use crate::observability::metrics::PipelineMetrics;

/// Worker and queue errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Notification worker already running")]
    AlreadyRunning,

    #[error("Notification worker not running")]
    NotRunning,

    /// The intake queue is at capacity; the caller should ask for redelivery.
    #[error("Notification queue is full")]
    QueueFull,

    #[error("Notification queue is closed")]
    QueueClosed,

    #[error("Notification worker did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("Notification worker task panicked: {0}")]
    TaskPanicked(String),
}

/// Configuration for the notification worker.
#[derive(Debug, Clone)]
pub struct NotificationWorkerConfig {
    /// Bounded queue capacity
    pub capacity: usize,
    /// Notifications processed concurrently
    pub concurrency: usize,
    /// Timeout for processing a single notification end to end
    pub processing_timeout: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for NotificationWorkerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_INTAKE_CAPACITY,
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            processing_timeout: Duration::from_secs(600),
            join_timeout: Duration::from_secs(30),
        }
    }
}

/// Cloneable sending side of the intake queue.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
    metrics: Arc<PipelineMetrics>,
}

impl NotificationQueue {
    /// Enqueue without waiting. Every refusal counts as one rejected
    /// notification.
    pub fn enqueue(&self, notification: Notification) -> Result<(), DispatchError> {
        let err = match self.sender.try_send(notification) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Full(rejected)) => {
                warn!(mailbox_id = %rejected.mailbox_id, "Notification queue full; rejecting push");
                DispatchError::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(rejected)) => {
                warn!(mailbox_id = %rejected.mailbox_id, "Notification queue closed; rejecting push");
                DispatchError::QueueClosed
            }
        };
        log_metric(self.metrics.record_notification_rejected(), "notifications.rejected");
        Err(err)
    }

    /// Free slots left in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}

/// Notification worker with explicit lifecycle management.
pub struct NotificationWorker {
    processor: Arc<NotificationProcessor>,
    config: NotificationWorkerConfig,
    sender: mpsc::Sender<Notification>,
    receiver: Arc<Mutex<mpsc::Receiver<Notification>>>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
    metrics: Arc<PipelineMetrics>,
}

impl NotificationWorker {
    /// Worker with its queue created; nothing runs until `start`.
    pub fn new(
        processor: Arc<NotificationProcessor>,
        config: NotificationWorkerConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        Self {
            processor,
            config,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            cancellation: CancellationToken::new(),
            task_handle: None,
            metrics,
        }
    }

    /// Handle for producers. Notifications enqueued before `start` wait in
    /// the queue.
    pub fn queue(&self) -> NotificationQueue {
        NotificationQueue { sender: self.sender.clone(), metrics: Arc::clone(&self.metrics) }
    }

    /// Start the worker, spawning the background processing task.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), DispatchError> {
        if self.is_running() {
            return Err(DispatchError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let processor = Arc::clone(&self.processor);
        let receiver = Arc::clone(&self.receiver);
        let metrics = Arc::clone(&self.metrics);
        let cancel = self.cancellation.clone();
        let concurrency = self.config.concurrency.max(1);
        let processing_timeout = self.config.processing_timeout;

        let handle = tokio::spawn(async move {
            Self::process_loop(processor, receiver, metrics, cancel, concurrency, processing_timeout)
                .await;
        });

        self.task_handle = Some(handle);
        info!(concurrency, capacity = self.config.capacity, "Notification worker started");
        Ok(())
    }

    /// Stop the worker. In-flight notifications finish; queued ones stay in
    /// the queue for the next start.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), DispatchError> {
        let Some(handle) = self.task_handle.take() else {
            return Err(DispatchError::NotRunning);
        };

        info!("Stopping notification worker");
        self.cancellation.cancel();

        let join_timeout = self.config.join_timeout;
        match tokio::time::timeout(join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Notification worker task panicked");
                return Err(DispatchError::TaskPanicked(e.to_string()));
            }
            Err(_) => {
                warn!("Notification worker did not complete within timeout");
                return Err(DispatchError::StopTimeout(join_timeout));
            }
        }

        info!("Notification worker stopped");
        Ok(())
    }

    /// Returns true when a worker task is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn process_loop(
        processor: Arc<NotificationProcessor>,
        receiver: Arc<Mutex<mpsc::Receiver<Notification>>>,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
        concurrency: usize,
        processing_timeout: Duration,
    ) {
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight = JoinSet::new();
        let mut receiver = receiver.lock().await;

        loop {
            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let notification = tokio::select! {
                () = cancel.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(notification) => notification,
                    None => {
                        debug!("Notification queue closed");
                        break;
                    }
                },
            };

            let processor = Arc::clone(&processor);
            let metrics = Arc::clone(&metrics);
            in_flight.spawn(async move {
                Self::handle(&processor, &metrics, notification, processing_timeout).await;
                drop(permit);
            });

            // Reap finished tasks so the set does not grow unbounded.
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "Notification task panicked");
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Notification task panicked");
            }
        }
        debug!("Notification worker loop exited");
    }

    async fn handle(
        processor: &NotificationProcessor,
        metrics: &PipelineMetrics,
        notification: Notification,
        processing_timeout: Duration,
    ) {
        let started = Instant::now();
        match tokio::time::timeout(processing_timeout, processor.process(&notification)).await {
            Ok(Ok(report)) => {
                for dispatched in &report.dispatched {
                    match &dispatched.outcome {
                        Ok(outcome) => {
                            log_metric(metrics.record_job_outcome(outcome), "worker.job_outcome");
                        }
                        Err(err) => warn!(
                            mailbox_id = %report.mailbox_id,
                            message_id = %dispatched.message_id,
                            error = %err,
                            "Pipeline run failed"
                        ),
                    }
                }
                debug!(
                    mailbox_id = %report.mailbox_id,
                    resolution = ?report.resolution,
                    messages = report.dispatched.len(),
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Notification processed"
                );
            }
            Ok(Err(err)) => {
                error!(
                    mailbox_id = %notification.mailbox_id,
                    history_id = notification.new_history_id,
                    error = %err,
                    "Notification processing failed"
                );
            }
            Err(_) => {
                warn!(
                    mailbox_id = %notification.mailbox_id,
                    timeout_secs = processing_timeout.as_secs(),
                    "Notification processing timed out"
                );
            }
        }
    }
}

impl Drop for NotificationWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("NotificationWorker dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}

//! Application context - dependency injection container

use std::sync::Arc;

use mailpilot_core::{
    CalendarProvider, Clock, CompletionService, EmailPipeline, HistoryCursorTracker,
    IdempotencyLedger, LedgerSettings, MailProvider, MailboxLifecycle, NotificationIntake,
    NotificationProcessor, PipelineDeps, PipelineSettings, RecoverySweep, RenewalSettings,
    SystemClock, WatchRegistry, WatchRenewalService,
};
use mailpilot_domain::{Config, MailPilotError, Result};
use mailpilot_infra::scheduling::{CronScheduler, RecoverySweepJob, RenewalSweepJob, ScheduledJob};
use mailpilot_infra::{
    DbManager, GmailClient, GoogleCalendarClient, GoogleTokenManager, HttpClient,
    NotificationQueue, NotificationWorker, NotificationWorkerConfig, OpenAIClient, PipelineMetrics,
    SqliteJobRepository, SqliteMailboxRepository, SqliteWatchRepository,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::utils::health::{ComponentHealth, HealthStatus};

const USER_AGENT: &str = concat!("mailpilot/", env!("CARGO_PKG_VERSION"));

/// The three external capabilities the pipeline runs against.
#[derive(Clone)]
pub struct Providers {
    pub mail: Arc<dyn MailProvider>,
    pub calendar: Arc<dyn CalendarProvider>,
    pub completion: Arc<dyn CompletionService>,
}

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<PipelineMetrics>,

    // Stores
    pub mailboxes: Arc<SqliteMailboxRepository>,
    pub registry: Arc<WatchRegistry>,
    pub ledger: Arc<IdempotencyLedger>,

    // Services
    pub intake: Arc<NotificationIntake>,
    pub lifecycle: Arc<MailboxLifecycle>,
    pub renewal: Arc<WatchRenewalService>,
    pub recovery: Arc<RecoverySweep>,
    pub processor: Arc<NotificationProcessor>,
    pub queue: NotificationQueue,

    background: Mutex<Background>,
}

/// Long-running tasks owned by the context.
struct Background {
    worker: NotificationWorker,
    schedulers: Vec<CronScheduler>,
}

impl AppContext {
    /// Open the database and build the Google and OpenAI adapters from
    /// configuration.
    pub async fn new(config: Config) -> Result<Self> {
        let db = Arc::new(DbManager::open(&config.database)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Arc::new(PipelineMetrics::new());

        let http = HttpClient::builder()
            .timeout(config.pipeline.call_timeout())
            .user_agent(USER_AGENT)
            .metrics(Arc::clone(&metrics))
            .build()?;

        let credentials = Arc::new(SqliteMailboxRepository::new(Arc::clone(&db)));
        let tokens = Arc::new(GoogleTokenManager::new(
            http.clone(),
            credentials,
            Arc::clone(&clock),
            &config.google,
        ));
        let providers = Providers {
            mail: Arc::new(GmailClient::new(Arc::clone(&tokens), Arc::clone(&clock), &config.google)),
            calendar: Arc::new(GoogleCalendarClient::new(tokens, &config.google)),
            completion: Arc::new(OpenAIClient::from_config(&config.openai, http)),
        };

        Self::with_providers(config, db, providers, clock, metrics)
    }

    /// Wire every service over an open database and the given providers.
    ///
    /// Nothing runs until [`AppContext::start_background`].
    pub fn with_providers(
        config: Config,
        db: Arc<DbManager>,
        providers: Providers,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let mailboxes = Arc::new(SqliteMailboxRepository::new(Arc::clone(&db)));
        let watches = Arc::new(SqliteWatchRepository::new(Arc::clone(&db)));
        let jobs = Arc::new(SqliteJobRepository::new(Arc::clone(&db)));

        let worker_id = format!("worker-{}", uuid::Uuid::now_v7());
        let settings = PipelineSettings::from_config(&config.pipeline, worker_id.clone())?;
        let retry = settings.retry;

        let registry = Arc::new(WatchRegistry::new(watches, Arc::clone(&clock)));
        let ledger = Arc::new(IdempotencyLedger::new(
            jobs,
            Arc::clone(&clock),
            LedgerSettings::from_config(&config.pipeline),
        ));
        let tracker = Arc::new(HistoryCursorTracker::new(
            Arc::clone(&registry),
            Arc::clone(&providers.mail),
            retry,
        ));
        let pipeline = Arc::new(EmailPipeline::new(
            PipelineDeps {
                ledger: Arc::clone(&ledger),
                registry: Arc::clone(&registry),
                mail: Arc::clone(&providers.mail),
                calendar: providers.calendar,
                completion: providers.completion,
                clock: Arc::clone(&clock),
            },
            settings,
        ));

        let processor = Arc::new(
            NotificationProcessor::new(
                mailboxes.clone(),
                Arc::clone(&registry),
                tracker,
                Arc::clone(&pipeline),
                Arc::clone(&providers.mail),
            )
            .with_concurrency(config.pipeline.worker_concurrency)
            .with_resync_limit(config.pipeline.resync_limit),
        );
        let intake =
            Arc::new(NotificationIntake::new(mailboxes.clone(), Arc::clone(&registry), Arc::clone(&clock)));
        let lifecycle = Arc::new(MailboxLifecycle::new(
            Arc::clone(&registry),
            mailboxes.clone(),
            Arc::clone(&providers.mail),
            config.pipeline.call_timeout(),
        ));
        let renewal = Arc::new(WatchRenewalService::new(
            Arc::clone(&registry),
            mailboxes.clone(),
            providers.mail,
            Arc::clone(&clock),
            RenewalSettings::from_config(&config.renewal, &config.pipeline),
        ));
        let recovery = Arc::new(
            RecoverySweep::new(pipeline, Arc::clone(&ledger), mailboxes.clone(), Arc::clone(&registry))
                .with_batch_size(config.pipeline.recovery_batch_size)
                .with_concurrency(config.pipeline.worker_concurrency),
        );

        let worker_config = NotificationWorkerConfig {
            capacity: config.server.intake_capacity,
            concurrency: config.pipeline.worker_concurrency,
            ..NotificationWorkerConfig::default()
        };
        let worker = NotificationWorker::new(Arc::clone(&processor), worker_config, Arc::clone(&metrics));
        let queue = worker.queue();

        info!(worker_id = %worker_id, "Application context initialised");

        Ok(Self {
            config,
            db,
            clock,
            metrics,
            mailboxes,
            registry,
            ledger,
            intake,
            lifecycle,
            renewal,
            recovery,
            processor,
            queue,
            background: Mutex::new(Background { worker, schedulers: Vec::new() }),
        })
    }

    /// Start the notification worker and the renewal and recovery schedulers.
    pub async fn start_background(&self) -> Result<()> {
        let mut background = self.background.lock().await;
        if !background.worker.is_running() {
            background
                .worker
                .start()
                .map_err(|err| MailPilotError::Internal(format!("notification worker: {err}")))?;
        }
        if !background.schedulers.is_empty() {
            return Ok(());
        }

        let renewal_job: Arc<dyn ScheduledJob> =
            Arc::new(RenewalSweepJob::new(Arc::clone(&self.renewal), Arc::clone(&self.metrics)));
        let recovery_job: Arc<dyn ScheduledJob> =
            Arc::new(RecoverySweepJob::new(Arc::clone(&self.recovery), Arc::clone(&self.metrics)));
        let plans = [
            (self.config.renewal.cron_expression.clone(), renewal_job),
            (self.config.pipeline.recovery_cron_expression.clone(), recovery_job),
        ];

        for (cron, job) in plans {
            let name = job.name();
            let mut scheduler = CronScheduler::new(cron, job).await?;
            if let Err(err) = scheduler.start().await {
                error!(job = name, error = %err, "Failed to start scheduler");
                return Err(err.into());
            }
            background.schedulers.push(scheduler);
        }
        Ok(())
    }

    /// Stop schedulers first so no sweep starts while the worker drains.
    pub async fn shutdown(&self) {
        let mut background = self.background.lock().await;
        for scheduler in &mut background.schedulers {
            if let Err(err) = scheduler.stop().await {
                warn!(error = %err, "Failed to stop scheduler");
            }
        }
        background.schedulers.clear();

        if background.worker.is_running() {
            if let Err(err) = background.worker.stop().await {
                warn!(error = %err, "Failed to stop notification worker");
            }
        }
        info!("Background tasks stopped");
    }

    /// Database reachability, background task state and metrics.
    pub async fn health_check(&self) -> HealthStatus {
        let db = Arc::clone(&self.db);
        let database = match tokio::task::spawn_blocking(move || db.health_check()).await {
            Ok(Ok(())) => ComponentHealth::healthy("database"),
            Ok(Err(err)) => ComponentHealth::unhealthy("database", err.to_string()),
            Err(err) => ComponentHealth::unhealthy("database", format!("health check panicked: {err}")),
        };

        let background = self.background.lock().await;
        let worker = if background.worker.is_running() {
            ComponentHealth::healthy("notification_worker")
        } else {
            ComponentHealth::unhealthy("notification_worker", "not running")
        };
        let schedulers_running = background.schedulers.iter().filter(|s| s.is_running()).count();
        let schedulers = if schedulers_running == background.schedulers.len() {
            ComponentHealth::healthy_with("schedulers", format!("{schedulers_running} running"))
        } else {
            ComponentHealth::unhealthy(
                "schedulers",
                format!("{schedulers_running} of {} running", background.schedulers.len()),
            )
        };
        drop(background);

        let queue = ComponentHealth::healthy_with(
            "intake_queue",
            format!("{} slots free", self.queue.remaining_capacity()),
        );

        let mut status = HealthStatus::new()
            .add_component(database)
            .add_component(worker)
            .add_component(schedulers)
            .add_component(queue)
            .with_metrics(self.metrics.snapshot());
        status.calculate_score();
        status
    }
}

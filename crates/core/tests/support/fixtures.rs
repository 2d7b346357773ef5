//! A fully wired set of services over the in-memory ports

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use mailpilot_core::{
    Clock, EmailPipeline, HistoryCursorTracker, IdempotencyLedger, LedgerSettings, MailboxLifecycle,
    ManualClock, NotificationIntake, NotificationProcessor, PipelineDeps, PipelineSettings,
    RecoverySweep, RenewalSettings, RetryPolicy, WatchRegistry, WatchRenewalService,
};
use mailpilot_domain::{
    ConnectedMailbox, IntentParse, MailboxWatch, ParsedIntent, PipelineConfig, RawMessage,
    TimeWindow,
};

use super::providers::{ScriptedCalendar, ScriptedCompletion, ScriptedMail};
use super::repositories::{InMemoryDirectory, InMemoryJobRepository, InMemoryWatchRepository};

pub const MAILBOX_ID: &str = "mbx-1";
pub const OWNER: &str = "owner@corp.example";
pub const ASSISTANT: &str = "assistant@corp.example";
pub const SENDER: &str = "ana@partner.example";

/// Monday 2025-03-03 08:00 UTC.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap()
}

pub fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, minute, 0).unwrap()
}

pub fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeWindow {
    TimeWindow::new(start, end)
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: StdDuration::from_millis(1),
        factor: 2,
        max_delay: StdDuration::from_millis(4),
        call_timeout: StdDuration::from_secs(2),
    }
}

pub fn mailbox() -> ConnectedMailbox {
    ConnectedMailbox {
        mailbox_id: MAILBOX_ID.to_string(),
        user_id: "user-1".to_string(),
        address: OWNER.to_string(),
        token_handle: "token-1".to_string(),
        connected_at: start_time() - Duration::days(30),
        disconnected_at: None,
    }
}

/// Inbound request from an external sender, CCing the assistant.
pub fn request_message(id: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        from: format!("Ana Lopez <{SENDER}>"),
        to: vec![OWNER.to_string()],
        cc: vec![ASSISTANT.to_string()],
        subject: "Project sync".to_string(),
        body: "Could we meet Tuesday between 2 and 4pm?".to_string(),
        rfc822_message_id: Some(format!("<{id}@partner.example>")),
        references: None,
        headers: BTreeMap::new(),
        received_at: start_time() - Duration::minutes(5),
    }
}

/// Tuesday 14:00-16:00 UTC, 30 minutes, with the sender.
pub fn tuesday_intent() -> ParsedIntent {
    ParsedIntent {
        summary: "Project sync".to_string(),
        requested_windows: vec![window(at(4, 14, 0), at(4, 16, 0))],
        participants: vec![SENDER.to_string()],
        duration_minutes: 30,
        timezone: Some("UTC".to_string()),
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub watches: Arc<InMemoryWatchRepository>,
    pub jobs: Arc<InMemoryJobRepository>,
    pub directory: Arc<InMemoryDirectory>,
    pub mail: Arc<ScriptedMail>,
    pub calendar: Arc<ScriptedCalendar>,
    pub completion: Arc<ScriptedCompletion>,
    pub registry: Arc<WatchRegistry>,
    pub ledger: Arc<IdempotencyLedger>,
    pub tracker: Arc<HistoryCursorTracker>,
    pub pipeline: Arc<EmailPipeline>,
    pub settings: PipelineSettings,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig {
            assistant_address: ASSISTANT.to_string(),
            ..PipelineConfig::default()
        })
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let watches = Arc::new(InMemoryWatchRepository::default());
        let jobs = Arc::new(InMemoryJobRepository::default());
        let directory = Arc::new(InMemoryDirectory::default().with_mailbox(mailbox()));
        let mail = Arc::new(ScriptedMail::new(dyn_clock.clone()));
        let calendar = Arc::new(ScriptedCalendar::default());
        let completion = Arc::new(ScriptedCompletion::new(IntentParse::Scheduling(tuesday_intent())));

        let registry = Arc::new(WatchRegistry::new(watches.clone(), dyn_clock.clone()));
        let ledger = Arc::new(IdempotencyLedger::new(
            jobs.clone(),
            dyn_clock.clone(),
            LedgerSettings::from_config(&config),
        ));
        let tracker = Arc::new(HistoryCursorTracker::new(registry.clone(), mail.clone(), fast_retry()));

        let mut settings = PipelineSettings::from_config(&config, "worker-a").unwrap();
        settings.retry = fast_retry();
        let harness_settings = settings.clone();
        let deps = PipelineDeps {
            ledger: ledger.clone(),
            registry: registry.clone(),
            mail: mail.clone(),
            calendar: calendar.clone(),
            completion: completion.clone(),
            clock: dyn_clock,
        };
        let pipeline = Arc::new(EmailPipeline::new(deps, settings));

        Self {
            clock,
            watches,
            jobs,
            directory,
            mail,
            calendar,
            completion,
            registry,
            ledger,
            tracker,
            pipeline,
            settings: harness_settings,
        }
    }

    /// A second pipeline sharing every store but running as another worker.
    pub fn pipeline_for(&self, worker_id: &str) -> EmailPipeline {
        let mut settings = self.settings.clone();
        settings.worker_id = worker_id.to_string();
        EmailPipeline::new(self.deps(), settings)
    }

    pub fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            ledger: self.ledger.clone(),
            registry: self.registry.clone(),
            mail: self.mail.clone(),
            calendar: self.calendar.clone(),
            completion: self.completion.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn processor(&self) -> NotificationProcessor {
        NotificationProcessor::new(
            self.directory.clone(),
            self.registry.clone(),
            self.tracker.clone(),
            self.pipeline.clone(),
            self.mail.clone(),
        )
        .with_concurrency(2)
    }

    pub fn intake(&self) -> NotificationIntake {
        NotificationIntake::new(self.directory.clone(), self.registry.clone(), self.clock.clone())
    }

    pub fn renewal(&self) -> WatchRenewalService {
        let settings = RenewalSettings {
            lead_time: Duration::hours(24),
            max_consecutive_failures: 3,
            call_timeout: StdDuration::from_secs(2),
            concurrency: 2,
        };
        WatchRenewalService::new(
            self.registry.clone(),
            self.directory.clone(),
            self.mail.clone(),
            self.clock.clone(),
            settings,
        )
    }

    pub fn lifecycle(&self) -> MailboxLifecycle {
        MailboxLifecycle::new(
            self.registry.clone(),
            self.directory.clone(),
            self.mail.clone(),
            StdDuration::from_secs(2),
        )
    }

    pub fn recovery(&self) -> RecoverySweep {
        RecoverySweep::new(self.pipeline.clone(), self.ledger.clone(), self.directory.clone(), self.registry.clone())
    }

    /// Connect the default mailbox with its cursor at `history_id`.
    pub async fn connect_at(&self, history_id: u64) -> MailboxWatch {
        self.mail.set_watch_history_id(history_id);
        self.mail.set_current_history_id(history_id);
        self.lifecycle().connect(MAILBOX_ID).await.unwrap()
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

//! Stage orchestration for one message

use std::sync::Arc;

use mailpilot_domain::constants::{REPLY_MARKER_HEADER, SLOT_PLACEHOLDER};
use mailpilot_domain::{
    normalize_address, Admission, AvailabilityResult, ConnectedMailbox, DraftReply, ErrorClass,
    EventDraft, FreeBusyQuery, IntentParse, JobStatus, MailPilotError, MailboxStatus,
    OutgoingReply, ParsedIntent, ProcessingJob, PromptVariant, ProviderError, ReplyRequest, Result, StageOutput, TimeWindow,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::draft;
use super::settings::PipelineSettings;
use super::slots::{business_windows, select_slots};
use crate::clock::Clock;
use crate::ledger::IdempotencyLedger;
use crate::provider_ports::{CalendarProvider, CompletionService, MailProvider};
use crate::watch::WatchRegistry;

/// How a pipeline run for one message ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "job", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job reached `Sent`, `Skipped` or `Failed` during this run.
    Finished(ProcessingJob),
    /// Another worker holds a live lease on the job.
    AlreadyInFlight(ProcessingJob),
    /// The job was already terminal before this run.
    AlreadyComplete(ProcessingJob),
    /// The run stopped early and released the job; `last_error` says why.
    Deferred(ProcessingJob),
}

impl JobOutcome {
    /// The job as it stood when the run ended.
    pub const fn job(&self) -> &ProcessingJob {
        match self {
            Self::Finished(job) | Self::AlreadyInFlight(job) | Self::AlreadyComplete(job) | Self::Deferred(job) => job,
        }
    }
}

/// Capabilities and stores the pipeline runs against.
#[derive(Clone)]
pub struct PipelineDeps {
    pub ledger: Arc<IdempotencyLedger>,
    pub registry: Arc<WatchRegistry>,
    pub mail: Arc<dyn MailProvider>,
    pub calendar: Arc<dyn CalendarProvider>,
    pub completion: Arc<dyn CompletionService>,
    pub clock: Arc<dyn Clock>,
}

enum StageStep {
    Advance(StageOutput),
    Skip { reason: String, preserved: Option<String> },
}

enum StageError {
    Provider(ProviderError),
    Store(MailPilotError),
}

impl From<ProviderError> for StageError {
    fn from(err: ProviderError) -> Self {
        Self::Provider(err)
    }
}

impl From<MailPilotError> for StageError {
    fn from(err: MailPilotError) -> Self {
        Self::Store(err)
    }
}

type StageResult = std::result::Result<StageStep, StageError>;

/// Runs one message through fetch, parse, resolve, draft and send.
pub struct EmailPipeline {
    deps: PipelineDeps,
    settings: PipelineSettings,
}

impl EmailPipeline {
    /// Pipeline over `deps`.
    pub const fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self { deps, settings }
    }

    /// Settings the pipeline was built with.
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process one message id, resuming an existing job where it stopped.
    #[instrument(skip(self, mailbox), fields(mailbox_id = %mailbox.mailbox_id))]
    pub async fn process(&self, mailbox: &ConnectedMailbox, message_id: &str) -> Result<JobOutcome> {
        let admission =
            self.deps.ledger.begin_job(&mailbox.mailbox_id, message_id, &self.settings.worker_id).await?;
        match admission {
            Admission::Admitted(job) => self.drive(mailbox, job).await,
            Admission::AlreadyInFlight(job) => {
                debug!(job_id = %job.id, status = %job.status, "Job already in flight");
                Ok(JobOutcome::AlreadyInFlight(job))
            }
            Admission::AlreadyComplete(job) => {
                debug!(job_id = %job.id, status = %job.status, "Job already complete");
                Ok(JobOutcome::AlreadyComplete(job))
            }
        }
    }

    async fn drive(&self, mailbox: &ConnectedMailbox, mut job: ProcessingJob) -> Result<JobOutcome> {
        loop {
            if job.is_terminal() {
                info!(job_id = %job.id, status = %job.status, attempt = job.attempt, "Job finished");
                return Ok(JobOutcome::Finished(job));
            }

            match self.deps.registry.mailbox_status(&job.mailbox_id).await? {
                MailboxStatus::Disconnected => {
                    job = self.deps.ledger.skip(&job, "mailbox disconnected", None).await?;
                    continue;
                }
                MailboxStatus::NeedsReauth => {
                    let job = self.deps.ledger.release(&job, "mailbox awaiting re-authentication").await?;
                    return Ok(JobOutcome::Deferred(job));
                }
                MailboxStatus::Active | MailboxStatus::NeedsResync => {}
            }

            let stage = job.status.next_stage().unwrap_or("none");
            debug!(job_id = %job.id, stage, "Running stage");
            let step = match job.status {
                JobStatus::Pending => self.fetch(mailbox, &job).await,
                JobStatus::Fetched => self.parse(&job).await,
                JobStatus::Parsed => self.resolve(mailbox, &job).await,
                JobStatus::Scheduled => self.draft(mailbox, &job).await,
                JobStatus::Drafted => self.send(mailbox, &mut job).await,
                JobStatus::Sent | JobStatus::Failed | JobStatus::Skipped => continue,
            };

            job = match step {
                Ok(StageStep::Advance(output)) => match self.deps.ledger.advance(&job, output).await {
                    Ok(next) => next,
                    Err(MailPilotError::Conflict(reason)) => return Ok(self.lease_lost(job, &reason)),
                    Err(err) => return Err(err),
                },
                Ok(StageStep::Skip { reason, preserved }) => self.deps.ledger.skip(&job, &reason, preserved).await?,
                Err(err) => return self.handle_failure(job, stage, err).await,
            };
        }
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    async fn fetch(&self, mailbox: &ConnectedMailbox, job: &ProcessingJob) -> StageResult {
        let mail = &self.deps.mail;
        let fetched = self
            .settings
            .retry
            .run("fetch_message", || mail.fetch_message(mailbox, &job.message_id))
            .await;
        let message = match fetched {
            Ok(message) => message,
            Err(ProviderError::NotFound(_)) => {
                return Ok(StageStep::Skip { reason: "message no longer exists".to_string(), preserved: None });
            }
            Err(err) => return Err(err.into()),
        };

        if message.header(REPLY_MARKER_HEADER).is_some() {
            return Ok(StageStep::Skip { reason: "message is an assistant reply".to_string(), preserved: None });
        }
        if !message.is_addressed_to(&self.settings.assistant_address) {
            return Ok(StageStep::Skip { reason: "not addressed to the assistant".to_string(), preserved: None });
        }
        Ok(StageStep::Advance(StageOutput::Fetched(message)))
    }

    async fn parse(&self, job: &ProcessingJob) -> StageResult {
        let message = required(job, job.outputs.message.as_ref(), "message")?;
        let completion = &self.deps.completion;
        let now = self.deps.clock.now();
        let default_tz = self.settings.default_timezone.name();

        // Unparseable output gets one strict retry, whether the adapter decoded
        // it into `Malformed` or rejected the response body outright.
        let mut last_raw = String::new();
        for variant in [PromptVariant::Standard, PromptVariant::Strict] {
            let parsed = match self
                .settings
                .retry
                .run("parse_intent", || completion.parse_intent(message, variant, now, default_tz))
                .await
            {
                Ok(parsed) => parsed,
                Err(ProviderError::Malformed(detail)) => IntentParse::Malformed { raw: detail },
                Err(err) => return Err(err.into()),
            };
            match parsed {
                IntentParse::Scheduling(intent) => {
                    return Ok(StageStep::Advance(StageOutput::Parsed(self.normalize_intent(intent))));
                }
                IntentParse::NotScheduling { reason } => {
                    return Ok(StageStep::Skip { reason: format!("not a scheduling request: {reason}"), preserved: None });
                }
                IntentParse::Malformed { raw } => {
                    warn!(job_id = %job.id, ?variant, "Model returned malformed intent");
                    last_raw = raw;
                }
            }
        }

        Ok(StageStep::Skip { reason: "model output could not be parsed".to_string(), preserved: Some(last_raw) })
    }

    async fn resolve(&self, mailbox: &ConnectedMailbox, job: &ProcessingJob) -> StageResult {
        let intent = required(job, job.outputs.intent.as_ref(), "intent")?;
        let tz = self.settings.timezone_for(intent.timezone.as_deref());
        let now = self.deps.clock.now();
        let duration = intent.duration();
        let policy = &self.settings.slots;

        let requested: Vec<TimeWindow> =
            intent.requested_windows.iter().copied().filter(|w| !w.is_empty() && w.end > now).collect();
        let fallback = business_windows(now, tz, policy);

        let Some(query_span) = span_of(requested.iter().chain(fallback.iter())) else {
            return Ok(StageStep::Advance(StageOutput::Scheduled(AvailabilityResult {
                chosen: None,
                alternatives: Vec::new(),
                timezone: tz.name().to_string(),
                hold_event_id: None,
            })));
        };

        let mut calendars = vec!["primary".to_string()];
        calendars.extend(intent.participants.iter().cloned());
        let query = FreeBusyQuery {
            time_min: query_span.start.max(now),
            time_max: query_span.end,
            calendars,
            timezone: tz.name().to_string(),
        };
        let calendar = &self.deps.calendar;
        let busy = self.settings.retry.run("query_free_busy", || calendar.query_free_busy(mailbox, &query)).await?;

        let wanted = policy.max_alternatives + 1;
        let mut picked = select_slots(&requested, &busy, duration, policy.granularity, now, wanted);
        let mut result = if picked.is_empty() {
            let alternatives =
                select_slots(&fallback, &busy, duration, policy.granularity, now, policy.max_alternatives);
            debug!(job_id = %job.id, alternatives = alternatives.len(), "No mutually free slot in requested windows");
            AvailabilityResult { chosen: None, alternatives, timezone: tz.name().to_string(), hold_event_id: None }
        } else {
            let chosen = picked.remove(0);
            AvailabilityResult { chosen: Some(chosen), alternatives: picked, timezone: tz.name().to_string(), hold_event_id: None }
        };

        if self.settings.hold_slots {
            if let Some(chosen) = result.chosen {
                let event = EventDraft {
                    event_id: hold_event_id(job),
                    summary: format!("Hold: {}", intent.summary),
                    window: chosen,
                    attendees: intent.participants.clone(),
                    timezone: tz.name().to_string(),
                };
                let id = self.settings.retry.run("create_event", || calendar.create_event(mailbox, &event)).await?;
                result.hold_event_id = Some(id);
            }
        }

        Ok(StageStep::Advance(StageOutput::Scheduled(result)))
    }

    async fn draft(&self, mailbox: &ConnectedMailbox, job: &ProcessingJob) -> StageResult {
        let message = required(job, job.outputs.message.as_ref(), "message")?;
        let intent = required(job, job.outputs.intent.as_ref(), "intent")?;
        let availability = required(job, job.outputs.availability.as_ref(), "availability")?;
        let tz = self.settings.timezone_for(Some(availability.timezone.as_str()));

        let kind = availability.reply_kind();
        let slot_lines = draft::slot_lines(availability, tz);
        let request = ReplyRequest {
            kind,
            sender: message.from.clone(),
            subject: message.subject.clone(),
            original_body: message.body.chars().take(self.settings.max_body_chars).collect(),
            intent_summary: intent.summary.clone(),
            slot_lines: slot_lines.clone(),
            placeholder: SLOT_PLACEHOLDER.to_string(),
        };
        let completion = &self.deps.completion;
        let prose = self.settings.retry.run("generate_reply", || completion.generate_reply(&request)).await?;
        let prose = if draft::mentions_times(&prose) {
            warn!(job_id = %job.id, "Model draft names times of its own; using the fixed reply");
            draft::fallback_prose(kind)
        } else {
            prose
        };

        let (to, cc) = draft::recipients(message, &mailbox.address, &self.settings.assistant_address);
        Ok(StageStep::Advance(StageOutput::Drafted(DraftReply {
            kind,
            thread_id: message.thread_id.clone(),
            to,
            cc,
            subject: draft::reply_subject(&message.subject),
            body: draft::render_body(&prose, &slot_lines),
            in_reply_to: message.rfc822_message_id.clone(),
            references: draft::references(message),
        })))
    }

    /// At most one provider send per attempt. A recorded send intent without
    /// a receipt means an earlier send may have landed, so the provider is
    /// asked for it before sending again.
    async fn send(&self, mailbox: &ConnectedMailbox, job: &mut ProcessingJob) -> StageResult {
        if let Some(receipt) = job.outputs.receipt.clone() {
            return Ok(StageStep::Advance(StageOutput::Sent(receipt)));
        }
        let draft = required(job, job.outputs.draft.as_ref(), "draft")?.clone();
        let mail = &self.deps.mail;

        if let Some(intent) = job.send_intent.clone() {
            let found = self
                .settings
                .retry
                .run("find_sent_reply", || mail.find_sent_reply(mailbox, &intent.rfc822_message_id))
                .await?;
            if let Some(receipt) = found {
                info!(job_id = %job.id, provider_message_id = %receipt.provider_message_id, "Recovered receipt of earlier send");
                return Ok(StageStep::Advance(StageOutput::Sent(receipt)));
            }
            warn!(job_id = %job.id, "Send intent without receipt and no sent message found; sending");
        } else {
            *job = self.deps.ledger.record_send_intent(job).await?;
        }

        let reply = OutgoingReply {
            thread_id: draft.thread_id,
            from: mailbox.address.clone(),
            to: draft.to,
            cc: draft.cc,
            subject: draft.subject,
            body: draft.body,
            in_reply_to: draft.in_reply_to,
            references: draft.references,
            rfc822_message_id: job.reply_message_id(),
        };
        let receipt = self.settings.retry.once(mail.send_reply(mailbox, &reply)).await?;
        info!(job_id = %job.id, provider_message_id = %receipt.provider_message_id, "Reply sent");
        Ok(StageStep::Advance(StageOutput::Sent(receipt)))
    }

    // ------------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------------

    async fn handle_failure(&self, job: ProcessingJob, stage: &str, err: StageError) -> Result<JobOutcome> {
        let provider_err = match err {
            StageError::Store(MailPilotError::Conflict(reason)) => return Ok(self.lease_lost(job, &reason)),
            StageError::Store(err) => {
                warn!(job_id = %job.id, stage, error = %err, "Stage bookkeeping failed");
                let reason = format!("{stage}: {err}");
                let job = self.deps.ledger.fail(&job, &reason, false).await?;
                return Ok(finished_or_deferred(job));
            }
            StageError::Provider(err) => err,
        };

        let reason = format!("{stage}: {provider_err}");
        match provider_err.class() {
            ErrorClass::Credential => {
                self.deps
                    .registry
                    .set_status(&job.mailbox_id, MailboxStatus::NeedsReauth, Some(&reason))
                    .await?;
                let job = self.deps.ledger.release(&job, &reason).await?;
                Ok(JobOutcome::Deferred(job))
            }
            ErrorClass::PermanentMessage => {
                let job = self.deps.ledger.skip(&job, &reason, None).await?;
                Ok(JobOutcome::Finished(job))
            }
            ErrorClass::Transient | ErrorClass::CursorExpired => {
                let job = self.deps.ledger.fail(&job, &reason, false).await?;
                Ok(finished_or_deferred(job))
            }
        }
    }

    fn lease_lost(&self, job: ProcessingJob, reason: &str) -> JobOutcome {
        warn!(job_id = %job.id, worker = %self.settings.worker_id, reason, "Lost job lease; stopping");
        JobOutcome::Deferred(job)
    }

    fn normalize_intent(&self, mut intent: ParsedIntent) -> ParsedIntent {
        let assistant = normalize_address(&self.settings.assistant_address);
        let mut participants = Vec::new();
        for address in intent.participants.iter().filter_map(|raw| normalize_address(raw)) {
            if Some(&address) != assistant.as_ref() && !participants.contains(&address) {
                participants.push(address);
            }
        }
        intent.participants = participants;
        intent.requested_windows.retain(|window| !window.is_empty());
        intent
    }
}

fn finished_or_deferred(job: ProcessingJob) -> JobOutcome {
    if job.is_terminal() {
        JobOutcome::Finished(job)
    } else {
        JobOutcome::Deferred(job)
    }
}

fn required<'a, T>(job: &ProcessingJob, value: Option<&'a T>, name: &str) -> std::result::Result<&'a T, StageError> {
    value.ok_or_else(|| {
        StageError::Store(MailPilotError::Internal(format!("job {} is {} but has no {name}", job.id, job.status)))
    })
}

/// Smallest window covering every input window.
fn span_of<'a>(windows: impl Iterator<Item = &'a TimeWindow>) -> Option<TimeWindow> {
    windows.fold(None, |acc: Option<TimeWindow>, w| match acc {
        None => Some(*w),
        Some(span) => Some(TimeWindow::new(span.start.min(w.start), span.end.max(w.end))),
    })
}

/// Calendar event ids allow `[a-v0-9]`; uuid hex digits qualify.
fn hold_event_id(job: &ProcessingJob) -> String {
    format!("mp{}", job.id.replace('-', ""))
}

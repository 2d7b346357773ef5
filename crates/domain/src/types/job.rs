//! Processing job state machine
//!
//! A job is keyed by `(mailbox_id, message_id)` and advances strictly forward
//! through the pipeline stages. Each stage's output is stored on the job so a
//! restarted worker resumes at the first stage without an output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{RawMessage, SendReceipt};
use super::scheduling::{AvailabilityResult, DraftReply, ParsedIntent};
use crate::constants::MESSAGE_ID_DOMAIN;
use crate::impl_domain_status_conversions;

/// Pipeline stage a job has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Fetched,
    Parsed,
    Scheduled,
    Drafted,
    Sent,
    Failed,
    Skipped,
}

impl_domain_status_conversions!(JobStatus {
    Pending => "pending",
    Fetched => "fetched",
    Parsed => "parsed",
    Scheduled => "scheduled",
    Drafted => "drafted",
    Sent => "sent",
    Failed => "failed",
    Skipped => "skipped",
});

impl JobStatus {
    /// `Sent`, `Failed` and `Skipped` never change again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }

    /// Name of the stage that runs from this status.
    pub const fn next_stage(self) -> Option<&'static str> {
        match self {
            Self::Pending => Some("fetch"),
            Self::Fetched => Some("parse"),
            Self::Parsed => Some("resolve"),
            Self::Scheduled => Some("draft"),
            Self::Drafted => Some("send"),
            Self::Sent | Self::Failed | Self::Skipped => None,
        }
    }
}

/// Output of a completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    Fetched(RawMessage),
    Parsed(ParsedIntent),
    Scheduled(AvailabilityResult),
    Drafted(DraftReply),
    Sent(SendReceipt),
}

impl StageOutput {
    /// Status the job holds once this output is recorded.
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Fetched(_) => JobStatus::Fetched,
            Self::Parsed(_) => JobStatus::Parsed,
            Self::Scheduled(_) => JobStatus::Scheduled,
            Self::Drafted(_) => JobStatus::Drafted,
            Self::Sent(_) => JobStatus::Sent,
        }
    }

    /// Status the job must hold for this output to be accepted.
    pub const fn requires(&self) -> JobStatus {
        match self {
            Self::Fetched(_) => JobStatus::Pending,
            Self::Parsed(_) => JobStatus::Fetched,
            Self::Scheduled(_) => JobStatus::Parsed,
            Self::Drafted(_) => JobStatus::Scheduled,
            Self::Sent(_) => JobStatus::Drafted,
        }
    }
}

/// Persisted stage outputs, read back on resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub message: Option<RawMessage>,
    pub intent: Option<ParsedIntent>,
    pub availability: Option<AvailabilityResult>,
    pub draft: Option<DraftReply>,
    pub receipt: Option<SendReceipt>,
    /// Raw text kept for manual follow-up when a job is skipped.
    pub preserved: Option<String>,
}

/// Exclusive claim on a job until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Recorded immediately before the provider send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendIntent {
    pub rfc822_message_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Ledger record for one message of one mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub mailbox_id: String,
    pub message_id: String,
    pub status: JobStatus,
    /// Number of times the pipeline has been admitted for this job.
    pub attempt: u32,
    pub last_error: Option<String>,
    pub outputs: JobOutputs,
    pub lease: Option<JobLease>,
    pub send_intent: Option<SendIntent>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    /// Fresh `Pending` job with a v7 id.
    pub fn new(mailbox_id: impl Into<String>, message_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            mailbox_id: mailbox_id.into(),
            message_id: message_id.into(),
            status: JobStatus::Pending,
            attempt: 0,
            last_error: None,
            outputs: JobOutputs::default(),
            lease: None,
            send_intent: None,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the job has finished.
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether some worker still holds the job at `now`.
    pub fn lease_is_live(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_some_and(|lease| lease.expires_at > now)
    }

    /// Whether `owner` holds a live lease.
    pub fn is_held_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_some_and(|lease| lease.owner == owner && lease.expires_at > now)
    }

    /// Store a stage output and move to its status.
    pub fn apply(&mut self, output: StageOutput) {
        self.status = output.status();
        match output {
            StageOutput::Fetched(message) => self.outputs.message = Some(message),
            StageOutput::Parsed(intent) => self.outputs.intent = Some(intent),
            StageOutput::Scheduled(result) => self.outputs.availability = Some(result),
            StageOutput::Drafted(draft) => self.outputs.draft = Some(draft),
            StageOutput::Sent(receipt) => self.outputs.receipt = Some(receipt),
        }
    }

    /// Status implied by the outputs present, used when reopening a job.
    pub const fn resume_status(&self) -> JobStatus {
        let outputs = &self.outputs;
        if outputs.receipt.is_some() {
            JobStatus::Sent
        } else if outputs.draft.is_some() {
            JobStatus::Drafted
        } else if outputs.availability.is_some() {
            JobStatus::Scheduled
        } else if outputs.intent.is_some() {
            JobStatus::Parsed
        } else if outputs.message.is_some() {
            JobStatus::Fetched
        } else {
            JobStatus::Pending
        }
    }

    /// Deterministic RFC 822 `Message-ID` for this job's reply.
    pub fn reply_message_id(&self) -> String {
        format!("<{}@{}>", self.id, MESSAGE_ID_DOMAIN)
    }
}

/// Answer of the ledger's admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "admission", content = "job", rename_all = "snake_case")]
pub enum Admission {
    Admitted(ProcessingJob),
    AlreadyInFlight(ProcessingJob),
    AlreadyComplete(ProcessingJob),
}

//! Stage payloads for intent parsing, availability and drafting

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MEETING_MINUTES;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window from `start` to `end`.
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Whether the window has no length.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether the windows share any instant.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ============================================================================
// Parse stage
// ============================================================================

/// Structured fields extracted from a scheduling request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub summary: String,
    /// Windows the proposer offered, most preferred first.
    pub requested_windows: Vec<TimeWindow>,
    pub participants: Vec<String>,
    pub duration_minutes: u32,
    /// IANA zone the proposer wrote in, if the model could tell.
    pub timezone: Option<String>,
}

impl ParsedIntent {
    /// Requested length, or the default meeting length when unstated.
    pub fn duration(&self) -> Duration {
        let minutes = if self.duration_minutes == 0 {
            DEFAULT_MEETING_MINUTES
        } else {
            self.duration_minutes
        };
        Duration::minutes(i64::from(minutes))
    }
}

/// Result of one parse attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentParse {
    Scheduling(ParsedIntent),
    NotScheduling { reason: String },
    /// Model output did not match the expected shape.
    Malformed { raw: String },
}

/// Prompt used for intent extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    Standard,
    /// Tighter instructions used after a malformed answer.
    Strict,
}

// ============================================================================
// Availability stage
// ============================================================================

/// Busy-time lookup over a set of calendars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeBusyQuery {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
    pub calendars: Vec<String>,
    pub timezone: String,
}

/// Slot choice for a request. `chosen` is `None` when nothing in the
/// requested windows is mutually free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub chosen: Option<TimeWindow>,
    pub alternatives: Vec<TimeWindow>,
    pub timezone: String,
    /// Tentative hold created for `chosen`, when holds are enabled.
    pub hold_event_id: Option<String>,
}

impl AvailabilityResult {
    /// Whether a requested slot was free.
    pub const fn has_slot(&self) -> bool {
        self.chosen.is_some()
    }

    /// Kind of reply the availability calls for.
    pub fn reply_kind(&self) -> ReplyKind {
        match (&self.chosen, self.alternatives.is_empty()) {
            (Some(_), _) => ReplyKind::ConfirmSlot,
            (None, false) => ReplyKind::ProposeAlternatives,
            (None, true) => ReplyKind::RequestMoreOptions,
        }
    }
}

/// Tentative calendar event created for a chosen slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Deterministic id so a retried create collides instead of duplicating.
    pub event_id: String,
    pub summary: String,
    pub window: TimeWindow,
    pub attendees: Vec<String>,
    pub timezone: String,
}

// ============================================================================
// Draft stage
// ============================================================================

/// What the reply does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    ConfirmSlot,
    ProposeAlternatives,
    RequestMoreOptions,
}

/// Input to the completion service's reply generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub kind: ReplyKind,
    pub sender: String,
    pub subject: String,
    pub original_body: String,
    pub intent_summary: String,
    /// Slot lines as they will appear in the final text.
    pub slot_lines: Vec<String>,
    pub placeholder: String,
}

/// Reply ready to send, times already rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftReply {
    pub kind: ReplyKind,
    pub thread_id: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
}

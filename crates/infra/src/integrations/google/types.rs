//! Wire types for the Gmail, Calendar and OAuth token endpoints.
//!
//! Only the fields the adapters read are modelled; everything else in the
//! responses is ignored by serde.

use serde::{Deserialize, Serialize};

// ============================================================================
// OAuth
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

const fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

// ============================================================================
// Gmail
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageDetail {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    /// Epoch millis as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryListResponse {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryEntry {
    pub id: String,
    #[serde(default)]
    pub messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageAdded {
    pub message: MessageStub,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageStub {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageListResponse {
    #[serde(default)]
    pub messages: Vec<MessageStub>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendMessageRequest<'a> {
    pub raw: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub thread_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SentMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WatchRequest<'a> {
    pub topic_name: &'a str,
    pub label_ids: &'a [String],
    pub label_filter_behavior: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WatchResponse {
    pub history_id: String,
    /// Epoch millis as a decimal string.
    pub expiration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProfileResponse {
    pub history_id: String,
}

// ============================================================================
// Calendar
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FreeBusyRequest {
    pub time_min: String,
    pub time_max: String,
    pub time_zone: String,
    pub items: Vec<FreeBusyItem>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FreeBusyItem {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FreeBusyResponse {
    #[serde(default)]
    pub calendars: std::collections::BTreeMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FreeBusyCalendar {
    #[serde(default)]
    pub busy: Vec<BusyPeriod>,
    #[serde(default)]
    pub errors: Vec<FreeBusyError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BusyPeriod {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FreeBusyError {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventInsertRequest {
    pub id: String,
    pub summary: String,
    pub status: &'static str,
    pub start: EventTime,
    pub end: EventTime,
    pub attendees: Vec<EventAttendee>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EventAttendee {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventInsertResponse {
    pub id: String,
}

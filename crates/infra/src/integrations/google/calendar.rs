//! Google Calendar adapter implementing [`CalendarProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mailpilot_core::CalendarProvider;
use mailpilot_domain::{
    ConnectedMailbox, EventDraft, FreeBusyQuery, GoogleConfig, ProviderError, ProviderResult,
    TimeWindow,
};
use reqwest::{Method, StatusCode};
use tracing::{debug, info, warn};

use super::auth::GoogleTokenManager;
use super::types::{
    EventAttendee, EventInsertRequest, EventInsertResponse, EventTime, FreeBusyItem,
    FreeBusyRequest, FreeBusyResponse,
};
use crate::errors::status_to_provider_error;

/// Google Calendar free/busy and event insertion.
pub struct GoogleCalendarClient {
    tokens: Arc<GoogleTokenManager>,
    api_base: String,
}

impl GoogleCalendarClient {
    /// Client authorised through `tokens`.
    pub fn new(tokens: Arc<GoogleTokenManager>, config: &GoogleConfig) -> Self {
        Self { tokens, api_base: config.calendar_api_base.trim_end_matches('/').to_string() }
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendarClient {
    async fn query_free_busy(
        &self,
        mailbox: &ConnectedMailbox,
        query: &FreeBusyQuery,
    ) -> ProviderResult<Vec<TimeWindow>> {
        if query.time_max <= query.time_min {
            return Ok(Vec::new());
        }

        let body = FreeBusyRequest {
            time_min: rfc3339(query.time_min),
            time_max: rfc3339(query.time_max),
            time_zone: query.timezone.clone(),
            items: query.calendars.iter().map(|id| FreeBusyItem { id: id.clone() }).collect(),
        };
        let url = format!("{}/freeBusy", self.api_base);
        let response = self
            .tokens
            .send_authorized(mailbox, true, |http, token| {
                http.request(Method::POST, &url).bearer_auth(token).json(&body)
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_to_provider_error(status, &text));
        }
        let parsed: FreeBusyResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(format!("freeBusy response: {err}")))?;

        let mut busy = Vec::new();
        for (calendar_id, calendar) in parsed.calendars {
            // External attendees' calendars are usually not visible; their
            // availability is simply unknown.
            if !calendar.errors.is_empty() {
                let reasons: Vec<_> = calendar.errors.iter().map(|e| e.reason.as_str()).collect();
                debug!(
                    mailbox_id = %mailbox.mailbox_id,
                    calendar_id = %calendar_id,
                    reasons = ?reasons,
                    "calendar not readable in freeBusy"
                );
            }
            for period in calendar.busy {
                match (parse_time(&period.start), parse_time(&period.end)) {
                    (Some(start), Some(end)) if start < end => busy.push(TimeWindow::new(start, end)),
                    _ => warn!(
                        calendar_id = %calendar_id,
                        start = %period.start,
                        end = %period.end,
                        "ignoring unparseable busy period"
                    ),
                }
            }
        }

        Ok(merge_windows(busy))
    }

    async fn create_event(
        &self,
        mailbox: &ConnectedMailbox,
        event: &EventDraft,
    ) -> ProviderResult<String> {
        let body = EventInsertRequest {
            id: event.event_id.clone(),
            summary: event.summary.clone(),
            status: "tentative",
            start: EventTime { date_time: rfc3339(event.window.start), time_zone: event.timezone.clone() },
            end: EventTime { date_time: rfc3339(event.window.end), time_zone: event.timezone.clone() },
            attendees: event
                .attendees
                .iter()
                .map(|email| EventAttendee { email: email.clone() })
                .collect(),
        };
        let url = format!("{}/calendars/primary/events", self.api_base);
        let response = self
            .tokens
            .send_authorized(mailbox, true, |http, token| {
                http.request(Method::POST, &url)
                    .bearer_auth(token)
                    .query(&[("sendUpdates", "none")])
                    .json(&body)
            })
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            info!(
                mailbox_id = %mailbox.mailbox_id,
                event_id = %event.event_id,
                "hold already exists"
            );
            return Ok(event.event_id.clone());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_to_provider_error(status, &text));
        }

        let created: EventInsertResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(format!("event insert response: {err}")))?;
        info!(mailbox_id = %mailbox.mailbox_id, event_id = %created.id, "created tentative hold");
        Ok(created.id)
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|at| at.with_timezone(&Utc))
}

/// Sort and coalesce overlapping or touching intervals.
fn merge_windows(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.sort();
    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(last) if window.start <= last.end => last.end = last.end.max(window.end),
            _ => merged.push(window),
        }
    }
    merged
}

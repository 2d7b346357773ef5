//! Gmail REST adapter implementing [`MailProvider`].
//!
//! All calls run against `users/me` with the mailbox's own access token.
//! Reads go through the retrying HTTP path; `messages/send` is issued exactly
//! once so a lost response can only be recovered through
//! [`find_sent_reply`](MailProvider::find_sent_reply).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use mailpilot_core::{Clock, MailProvider};
use mailpilot_domain::constants::REPLY_MARKER_HEADER;
use mailpilot_domain::{
    ConnectedMailbox, GoogleConfig, HistoryPage, HistoryRecord, OutgoingReply, ProviderError,
    ProviderResult, RawMessage, SendReceipt, WatchRegistration,
};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::auth::GoogleTokenManager;
use super::types::{
    HistoryListResponse, MessageDetail, MessageListResponse, MessagePart, ProfileResponse,
    SendMessageRequest, SentMessage, WatchRequest, WatchResponse,
};
use crate::errors::status_to_provider_error;

/// Gmail REST adapter.
pub struct GmailClient {
    tokens: Arc<GoogleTokenManager>,
    clock: Arc<dyn Clock>,
    api_base: String,
    topic_name: String,
    label_ids: Vec<String>,
}

impl GmailClient {
    /// Client authorised through `tokens`.
    pub fn new(tokens: Arc<GoogleTokenManager>, clock: Arc<dyn Clock>, config: &GoogleConfig) -> Self {
        Self {
            tokens,
            clock,
            api_base: config.gmail_api_base.trim_end_matches('/').to_string(),
            topic_name: config.pubsub_topic.clone(),
            label_ids: config.watch_label_ids.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{}", self.api_base, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        mailbox: &ConnectedMailbox,
        path: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<T> {
        let url = self.url(path);
        let response = self
            .tokens
            .send_authorized(mailbox, true, |http, token| {
                http.request(Method::GET, &url).bearer_auth(token).query(query)
            })
            .await?;
        decode(response).await
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    #[instrument(skip(self, mailbox), fields(mailbox_id = %mailbox.mailbox_id))]
    async fn fetch_message(
        &self,
        mailbox: &ConnectedMailbox,
        message_id: &str,
    ) -> ProviderResult<RawMessage> {
        let path = format!("messages/{}", urlencoding::encode(message_id));
        let detail: MessageDetail =
            self.get_json(mailbox, &path, &[("format", "full".to_string())]).await?;
        message_from_detail(detail, self.clock.now())
    }

    async fn list_history_since(
        &self,
        mailbox: &ConnectedMailbox,
        start_history_id: u64,
        page_token: Option<&str>,
    ) -> ProviderResult<HistoryPage> {
        let mut query = vec![
            ("startHistoryId", start_history_id.to_string()),
            ("historyTypes", "messageAdded".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let page: HistoryListResponse = match self.get_json(mailbox, "history", &query).await {
            Ok(page) => page,
            // Gmail answers 404 when startHistoryId predates retained history.
            Err(ProviderError::NotFound(detail)) => {
                warn!(
                    mailbox_id = %mailbox.mailbox_id,
                    start_history_id,
                    "history cursor no longer available"
                );
                return Err(ProviderError::CursorExpired(detail));
            }
            Err(err) => return Err(err),
        };

        let mut records = Vec::with_capacity(page.history.len());
        for entry in page.history {
            let history_id = parse_history_id(&entry.id)?;
            let added_message_ids = entry
                .messages_added
                .into_iter()
                .filter(|added| !added.message.label_ids.iter().any(|label| label == "DRAFT"))
                .map(|added| added.message.id)
                .collect();
            records.push(HistoryRecord { history_id, added_message_ids });
        }

        debug!(
            mailbox_id = %mailbox.mailbox_id,
            start_history_id,
            records = records.len(),
            has_more = page.next_page_token.is_some(),
            "listed gmail history page"
        );

        Ok(HistoryPage { records, next_page_token: page.next_page_token })
    }

    #[instrument(skip(self, mailbox, reply), fields(mailbox_id = %mailbox.mailbox_id, thread_id = %reply.thread_id))]
    async fn send_reply(
        &self,
        mailbox: &ConnectedMailbox,
        reply: &OutgoingReply,
    ) -> ProviderResult<SendReceipt> {
        let body = SendMessageRequest {
            raw: URL_SAFE_NO_PAD.encode(build_raw_message(reply)),
            thread_id: &reply.thread_id,
        };
        let url = self.url("messages/send");
        let response = self
            .tokens
            .send_authorized(mailbox, false, |http, token| {
                http.request(Method::POST, &url).bearer_auth(token).json(&body)
            })
            .await?;
        let sent: SentMessage = decode(response).await?;

        info!(
            mailbox_id = %mailbox.mailbox_id,
            provider_message_id = %sent.id,
            "reply sent"
        );

        Ok(SendReceipt {
            provider_message_id: sent.id,
            thread_id: sent.thread_id,
            sent_at: self.clock.now(),
        })
    }

    async fn find_sent_reply(
        &self,
        mailbox: &ConnectedMailbox,
        rfc822_message_id: &str,
    ) -> ProviderResult<Option<SendReceipt>> {
        let bare = rfc822_message_id.trim().trim_start_matches('<').trim_end_matches('>');
        let query = [
            ("q", format!("in:sent rfc822msgid:{bare}")),
            ("maxResults", "1".to_string()),
        ];
        let list: MessageListResponse = self.get_json(mailbox, "messages", &query).await?;

        Ok(list.messages.into_iter().next().map(|stub| SendReceipt {
            provider_message_id: stub.id,
            thread_id: stub.thread_id,
            sent_at: self.clock.now(),
        }))
    }

    async fn start_watch(&self, mailbox: &ConnectedMailbox) -> ProviderResult<WatchRegistration> {
        let body = WatchRequest {
            topic_name: &self.topic_name,
            label_ids: &self.label_ids,
            label_filter_behavior: "include",
        };
        let url = self.url("watch");
        let response = self
            .tokens
            .send_authorized(mailbox, true, |http, token| {
                http.request(Method::POST, &url).bearer_auth(token).json(&body)
            })
            .await?;
        let watch: WatchResponse = decode(response).await?;

        let expiration_ms: i64 = watch.expiration.parse().map_err(|_| {
            ProviderError::Malformed(format!("watch expiration {:?} is not numeric", watch.expiration))
        })?;
        let expires_at = DateTime::from_timestamp_millis(expiration_ms).ok_or_else(|| {
            ProviderError::Malformed(format!("watch expiration {expiration_ms} out of range"))
        })?;

        Ok(WatchRegistration {
            resource_id: self.topic_name.clone(),
            history_id: parse_history_id(&watch.history_id)?,
            expires_at,
        })
    }

    async fn stop_watch(&self, mailbox: &ConnectedMailbox) -> ProviderResult<()> {
        let url = self.url("stop");
        let response = self
            .tokens
            .send_authorized(mailbox, true, |http, token| {
                http.request(Method::POST, &url).bearer_auth(token)
            })
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_to_provider_error(status, &body))
    }

    async fn current_history_id(&self, mailbox: &ConnectedMailbox) -> ProviderResult<u64> {
        let profile: ProfileResponse = self.get_json(mailbox, "profile", &[]).await?;
        parse_history_id(&profile.history_id)
    }

    async fn list_recent_message_ids(
        &self,
        mailbox: &ConnectedMailbox,
        limit: usize,
    ) -> ProviderResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = [("labelIds", "INBOX".to_string()), ("maxResults", limit.min(500).to_string())];
        let list: MessageListResponse = self.get_json(mailbox, "messages", &query).await?;
        Ok(list.messages.into_iter().map(|stub| stub.id).take(limit).collect())
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_to_provider_error(status, &body));
    }
    if status == StatusCode::NO_CONTENT {
        return Err(ProviderError::Malformed("expected a JSON body, got 204".into()));
    }
    response
        .json()
        .await
        .map_err(|err| ProviderError::Malformed(format!("gmail response: {err}")))
}

fn parse_history_id(raw: &str) -> ProviderResult<u64> {
    raw.parse()
        .map_err(|_| ProviderError::Malformed(format!("history id {raw:?} is not numeric")))
}

// ============================================================================
// Inbound message parsing
// ============================================================================

fn message_from_detail(detail: MessageDetail, fallback_time: DateTime<Utc>) -> ProviderResult<RawMessage> {
    let payload = detail.payload.unwrap_or_default();

    let mut headers = BTreeMap::new();
    for header in &payload.headers {
        headers
            .entry(header.name.to_ascii_lowercase())
            .or_insert_with(|| header.value.clone());
    }

    let from = headers
        .get("from")
        .cloned()
        .ok_or_else(|| ProviderError::Malformed(format!("message {} has no From header", detail.id)))?;

    let body = extract_body_text(&payload, "text/plain")
        .or_else(|| extract_body_text(&payload, "text/html").map(|html| strip_html(&html)))
        .unwrap_or_default();

    let received_at = detail
        .internal_date
        .as_deref()
        .and_then(|raw| raw.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or(fallback_time);

    Ok(RawMessage {
        to: headers.get("to").map(|value| split_address_list(value)).unwrap_or_default(),
        cc: headers.get("cc").map(|value| split_address_list(value)).unwrap_or_default(),
        subject: headers.get("subject").cloned().unwrap_or_default(),
        rfc822_message_id: headers.get("message-id").cloned(),
        references: headers.get("references").cloned(),
        id: detail.id,
        thread_id: detail.thread_id,
        from,
        body,
        headers,
        received_at,
    })
}

/// Walk MIME parts depth-first for the first body of `target_mime`.
fn extract_body_text(part: &MessagePart, target_mime: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(target_mime) {
        if let Some(data) = part.body.as_ref().and_then(|body| body.data.as_deref()) {
            return decode_body(data);
        }
    }
    part.parts.iter().find_map(|child| extract_body_text(child, target_mime))
}

/// Gmail bodies are URL-safe base64, usually without padding.
fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split an address header on commas outside quotes and angle brackets.
fn split_address_list(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut angle_depth = 0u32;

    for ch in value.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => angle_depth += 1,
            '>' if !in_quotes => angle_depth = angle_depth.saturating_sub(1),
            ',' if !in_quotes && angle_depth == 0 => {
                push_trimmed(&mut out, &current);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    push_trimmed(&mut out, &current);
    out
}

fn push_trimmed(out: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

// ============================================================================
// Outbound message rendering
// ============================================================================

/// Render an RFC 2822 message for `messages/send`.
fn build_raw_message(reply: &OutgoingReply) -> String {
    let mut lines = vec![
        format!("From: {}", header_value(&reply.from)),
        format!("To: {}", header_value(&reply.to.join(", "))),
    ];
    if !reply.cc.is_empty() {
        lines.push(format!("Cc: {}", header_value(&reply.cc.join(", "))));
    }
    lines.push(format!("Subject: {}", encode_subject(&reply.subject)));
    lines.push(format!("Message-ID: {}", header_value(&reply.rfc822_message_id)));
    if let Some(in_reply_to) = &reply.in_reply_to {
        lines.push(format!("In-Reply-To: {}", header_value(in_reply_to)));
    }
    if let Some(references) = &reply.references {
        lines.push(format!("References: {}", header_value(references)));
    }
    lines.push(format!("{REPLY_MARKER_HEADER}: 1"));
    lines.push("MIME-Version: 1.0".to_string());
    lines.push("Content-Type: text/plain; charset=\"UTF-8\"".to_string());
    lines.push("Content-Transfer-Encoding: 8bit".to_string());

    let body = reply.body.replace("\r\n", "\n").replace('\n', "\r\n");
    format!("{}\r\n\r\n{}", lines.join("\r\n"), body)
}

/// Header values never carry line breaks.
fn header_value(raw: &str) -> String {
    raw.replace(['\r', '\n'], " ")
}

fn encode_subject(subject: &str) -> String {
    let clean = header_value(subject);
    if clean.is_ascii() {
        clean
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(clean.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::super::types::{Header, PartBody};
    use super::*;

    fn part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: mime.into(),
            body: Some(PartBody { data: Some(URL_SAFE_NO_PAD.encode(text)) }),
            ..MessagePart::default()
        }
    }

    fn header(name: &str, value: &str) -> Header {
        Header { name: name.into(), value: value.into() }
    }

    #[test]
    fn parses_multipart_message() {
        let detail = MessageDetail {
            id: "m-1".into(),
            thread_id: "t-1".into(),
            internal_date: Some("1741006800000".into()),
            payload: Some(MessagePart {
                mime_type: "multipart/alternative".into(),
                headers: vec![
                    header("From", "Ana Ruiz <ana@example.com>"),
                    header("To", "\"Owner, Main\" <owner@example.com>, bob@example.com"),
                    header("Subject", "Coffee next week?"),
                    header("Message-ID", "<abc@mail.example.com>"),
                ],
                parts: vec![part("text/html", "<p>ignored</p>"), part("text/plain", "Tuesday 3pm?")],
                ..MessagePart::default()
            }),
        };

        let message = message_from_detail(detail, Utc::now()).unwrap();
        assert_eq!(message.body, "Tuesday 3pm?");
        assert_eq!(message.to, vec!["\"Owner, Main\" <owner@example.com>", "bob@example.com"]);
        assert_eq!(message.rfc822_message_id.as_deref(), Some("<abc@mail.example.com>"));
        assert_eq!(message.header("SUBJECT"), Some("Coffee next week?"));
        assert_eq!(message.received_at, Utc.with_ymd_and_hms(2025, 3, 3, 13, 0, 0).unwrap());
    }

    #[test]
    fn falls_back_to_stripped_html() {
        let detail = MessageDetail {
            id: "m-2".into(),
            thread_id: "t-2".into(),
            internal_date: None,
            payload: Some(MessagePart {
                headers: vec![header("From", "ana@example.com")],
                ..part("text/html", "<div>Can we meet <b>Friday</b>?</div>")
            }),
        };
        let message = message_from_detail(detail, Utc::now()).unwrap();
        assert_eq!(message.body, "Can we meet Friday ?");
    }

    #[test]
    fn missing_sender_is_malformed() {
        let detail = MessageDetail {
            id: "m-3".into(),
            thread_id: String::new(),
            internal_date: None,
            payload: None,
        };
        assert!(matches!(message_from_detail(detail, Utc::now()), Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn renders_threaded_reply_with_marker() {
        let reply = OutgoingReply {
            thread_id: "t-1".into(),
            from: "assistant@example.com".into(),
            to: vec!["ana@example.com".into()],
            cc: vec![],
            subject: "Re: Café\r\nBcc: evil@example.com".into(),
            body: "Works for me.\nSee you then.".into(),
            in_reply_to: Some("<abc@mail.example.com>".into()),
            references: Some("<abc@mail.example.com>".into()),
            rfc822_message_id: "<job-1@mailpilot.local>".into(),
        };

        let raw = build_raw_message(&reply);
        assert!(raw.contains("In-Reply-To: <abc@mail.example.com>\r\n"));
        assert!(raw.contains("X-MailPilot-Reply: 1\r\n"));
        assert!(raw.contains("Subject: =?UTF-8?B?"));
        assert!(!raw.contains("\r\nBcc:"));
        assert!(!raw.contains("Cc:"));
        assert!(raw.ends_with("Works for me.\r\nSee you then."));
    }
}

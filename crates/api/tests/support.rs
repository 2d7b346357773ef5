//! Shared helpers for router tests
//!
//! Builds an [`AppContext`] over a temporary database and in-memory
//! providers, and drives the router with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mailpilot_api::{build_router, AppContext, Providers};
use mailpilot_core::{CalendarProvider, Clock, CompletionService, MailProvider, ManualClock};
use mailpilot_domain::{
    Config, ConnectedMailbox, EventDraft, FreeBusyQuery, HistoryPage, IntentParse, OutgoingReply,
    PromptVariant, ProviderError, ProviderResult, RawMessage, ReplyRequest, SendReceipt, TimeWindow,
    WatchRegistration,
};
use mailpilot_infra::{DbManager, PipelineMetrics};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADMIN_TOKEN: &str = "admin-secret";
pub const WEBHOOK_TOKEN: &str = "hook-secret";

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

/// Mail provider that only answers watch calls.
#[derive(Default)]
pub struct StubMail {
    pub watches_started: AtomicUsize,
    pub watches_stopped: AtomicUsize,
}

#[async_trait]
impl MailProvider for StubMail {
    async fn fetch_message(&self, _mailbox: &ConnectedMailbox, message_id: &str) -> ProviderResult<RawMessage> {
        Err(ProviderError::NotFound(format!("message {message_id}")))
    }

    async fn list_history_since(
        &self,
        _mailbox: &ConnectedMailbox,
        _start_history_id: u64,
        _page_token: Option<&str>,
    ) -> ProviderResult<HistoryPage> {
        Ok(HistoryPage { records: Vec::new(), next_page_token: None })
    }

    async fn send_reply(&self, _mailbox: &ConnectedMailbox, _reply: &OutgoingReply) -> ProviderResult<SendReceipt> {
        Err(ProviderError::Transient("sending disabled".into()))
    }

    async fn find_sent_reply(
        &self,
        _mailbox: &ConnectedMailbox,
        _rfc822_message_id: &str,
    ) -> ProviderResult<Option<SendReceipt>> {
        Ok(None)
    }

    async fn start_watch(&self, mailbox: &ConnectedMailbox) -> ProviderResult<WatchRegistration> {
        self.watches_started.fetch_add(1, Ordering::SeqCst);
        Ok(WatchRegistration {
            resource_id: format!("watch-{}", mailbox.mailbox_id),
            history_id: 500,
            expires_at: fixed_now() + Duration::days(7),
        })
    }

    async fn stop_watch(&self, _mailbox: &ConnectedMailbox) -> ProviderResult<()> {
        self.watches_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn current_history_id(&self, _mailbox: &ConnectedMailbox) -> ProviderResult<u64> {
        Ok(500)
    }

    async fn list_recent_message_ids(&self, _mailbox: &ConnectedMailbox, _limit: usize) -> ProviderResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Calendar and completion stand-in; the router tests never reach them.
pub struct Unreachable;

#[async_trait]
impl CalendarProvider for Unreachable {
    async fn query_free_busy(&self, _mailbox: &ConnectedMailbox, _query: &FreeBusyQuery) -> ProviderResult<Vec<TimeWindow>> {
        Err(ProviderError::Transient("calendar unavailable".into()))
    }

    async fn create_event(&self, _mailbox: &ConnectedMailbox, _event: &EventDraft) -> ProviderResult<String> {
        Err(ProviderError::Transient("calendar unavailable".into()))
    }
}

#[async_trait]
impl CompletionService for Unreachable {
    async fn parse_intent(
        &self,
        _message: &RawMessage,
        _variant: PromptVariant,
        _reference_time: DateTime<Utc>,
        _default_timezone: &str,
    ) -> ProviderResult<IntentParse> {
        Err(ProviderError::Transient("model unavailable".into()))
    }

    async fn generate_reply(&self, _request: &ReplyRequest) -> ProviderResult<String> {
        Err(ProviderError::Transient("model unavailable".into()))
    }
}

pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub router: Router,
    pub mail: Arc<StubMail>,
    pub clock: Arc<ManualClock>,
    _temp_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let db = DbManager::new(temp_dir.path().join("mailpilot.db"), 4).expect("open database");
        db.run_migrations().expect("run migrations");

        let mut config = Config::default();
        config.server.admin_token = Some(ADMIN_TOKEN.into());
        config.server.webhook_token = Some(WEBHOOK_TOKEN.into());
        config.pipeline.assistant_address = "assistant@mailpilot.test".into();
        adjust(&mut config);

        let mail = Arc::new(StubMail::default());
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let providers = Providers {
            mail: mail.clone(),
            calendar: Arc::new(Unreachable),
            completion: Arc::new(Unreachable),
        };
        let ctx = AppContext::with_providers(
            config,
            Arc::new(db),
            providers,
            clock.clone() as Arc<dyn Clock>,
            Arc::new(PipelineMetrics::new()),
        )
        .expect("build context");
        let ctx = Arc::new(ctx);

        Self { router: build_router(Arc::clone(&ctx)), ctx, mail, clock, _temp_dir: temp_dir }
    }

    /// Register a mailbox and start its watch.
    pub async fn connect_mailbox(&self, mailbox_id: &str, address: &str) -> ConnectedMailbox {
        let mailbox = self
            .ctx
            .mailboxes
            .upsert(&ConnectedMailbox {
                mailbox_id: mailbox_id.into(),
                user_id: format!("user-{mailbox_id}"),
                address: address.into(),
                token_handle: format!("handle-{mailbox_id}"),
                connected_at: fixed_now(),
                disconnected_at: None,
            })
            .await
            .expect("upsert mailbox");
        self.ctx.lifecycle.connect(mailbox_id).await.expect("connect mailbox");
        mailbox
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json body") };
        (status, body)
    }

    pub async fn admin(&self, method: Method, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
            .body(Body::empty())
            .expect("build request");
        self.send(request).await
    }

    pub async fn push(&self, token: &str, email_address: &str, history_id: u64) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhooks/gmail?token={token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(push_body(email_address, history_id)))
            .expect("build request");
        self.send(request).await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Pub/Sub push envelope wrapping a Gmail notification.
pub fn push_body(email_address: &str, history_id: u64) -> String {
    let data = serde_json::json!({ "emailAddress": email_address, "historyId": history_id }).to_string();
    serde_json::json!({
        "message": { "data": STANDARD.encode(data), "messageId": "2070443601311540" },
        "subscription": "projects/mailpilot/subscriptions/gmail-push"
    })
    .to_string()
}

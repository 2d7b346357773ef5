//! Port interfaces for the outbound capabilities
//!
//! Implementations report failures as [`ProviderError`] so the pipeline can
//! classify them without knowing the transport.
//!
//! [`ProviderError`]: mailpilot_domain::ProviderError

use async_trait::async_trait;
use mailpilot_domain::{
    ConnectedMailbox, EventDraft, FreeBusyQuery, HistoryPage, IntentParse, OutgoingReply,
    PromptVariant, ProviderResult, RawMessage, ReplyRequest, SendReceipt, TimeWindow,
    WatchRegistration,
};
use chrono::{DateTime, Utc};

/// Mailbox access: messages, history, sending and push subscriptions.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Fetch a message by provider id
    async fn fetch_message(
        &self,
        mailbox: &ConnectedMailbox,
        message_id: &str,
    ) -> ProviderResult<RawMessage>;

    /// List one page of history after `start_history_id`.
    ///
    /// Returns `CursorExpired` when the provider no longer retains history
    /// that far back.
    async fn list_history_since(
        &self,
        mailbox: &ConnectedMailbox,
        start_history_id: u64,
        page_token: Option<&str>,
    ) -> ProviderResult<HistoryPage>;

    /// Send a reply. Must not be retried blindly by implementations.
    async fn send_reply(
        &self,
        mailbox: &ConnectedMailbox,
        reply: &OutgoingReply,
    ) -> ProviderResult<SendReceipt>;

    /// Look up a previously sent message by its RFC 822 `Message-ID`
    async fn find_sent_reply(
        &self,
        mailbox: &ConnectedMailbox,
        rfc822_message_id: &str,
    ) -> ProviderResult<Option<SendReceipt>>;

    /// Start (or restart) the push subscription for a mailbox
    async fn start_watch(&self, mailbox: &ConnectedMailbox) -> ProviderResult<WatchRegistration>;

    /// Stop the push subscription for a mailbox
    async fn stop_watch(&self, mailbox: &ConnectedMailbox) -> ProviderResult<()>;

    /// Current history id of the mailbox, used as the resync anchor
    async fn current_history_id(&self, mailbox: &ConnectedMailbox) -> ProviderResult<u64>;

    /// Most recent inbox message ids, newest first
    async fn list_recent_message_ids(
        &self,
        mailbox: &ConnectedMailbox,
        limit: usize,
    ) -> ProviderResult<Vec<String>>;
}

/// Calendar availability and event creation.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Busy intervals across all queried calendars, merged
    async fn query_free_busy(
        &self,
        mailbox: &ConnectedMailbox,
        query: &FreeBusyQuery,
    ) -> ProviderResult<Vec<TimeWindow>>;

    /// Create an event, returning its id. Creating an id that already exists
    /// succeeds without creating a second event.
    async fn create_event(
        &self,
        mailbox: &ConnectedMailbox,
        event: &EventDraft,
    ) -> ProviderResult<String>;
}

/// Language-model capability.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Classify a message and extract scheduling fields
    async fn parse_intent(
        &self,
        message: &RawMessage,
        variant: PromptVariant,
        reference_time: DateTime<Utc>,
        default_timezone: &str,
    ) -> ProviderResult<IntentParse>;

    /// Produce reply prose containing the request's placeholder
    async fn generate_reply(&self, request: &ReplyRequest) -> ProviderResult<String>;
}

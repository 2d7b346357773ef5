//! Mailbox watch, notification and history types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_domain_status_conversions;

// ============================================================================
// Mailbox identity
// ============================================================================

/// A mailbox the identity store reports as connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedMailbox {
    pub mailbox_id: String,
    pub user_id: String,
    /// Primary address of the mailbox owner.
    pub address: String,
    /// Opaque reference the credential store resolves to OAuth tokens.
    pub token_handle: String,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl ConnectedMailbox {
    /// Whether the mailbox has not been disconnected.
    pub const fn is_connected(&self) -> bool {
        self.disconnected_at.is_none()
    }
}

/// Whether a mailbox may take new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxStatus {
    Active,
    /// Credentials were rejected; nothing runs until the user reconnects.
    NeedsReauth,
    /// History was truncated; a full resync is in progress or pending.
    NeedsResync,
    Disconnected,
}

impl_domain_status_conversions!(MailboxStatus {
    Active => "active",
    NeedsReauth => "needs_reauth",
    NeedsResync => "needs_resync",
    Disconnected => "disconnected",
});

impl MailboxStatus {
    /// Whether notifications and jobs for the mailbox may run.
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Active | Self::NeedsResync)
    }
}

/// Mailbox-level health owned by the watch registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxState {
    pub mailbox_id: String,
    pub status: MailboxStatus,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MailboxState {
    /// Fresh active state.
    pub fn active(mailbox_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            mailbox_id: mailbox_id.into(),
            status: MailboxStatus::Active,
            consecutive_failures: 0,
            last_error: None,
            updated_at: now,
        }
    }
}

// ============================================================================
// Watches
// ============================================================================

/// The push subscription kept alive for one mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxWatch {
    pub mailbox_id: String,
    pub resource_id: String,
    /// Last history id whose changes were fully resolved. Never decreases.
    pub history_cursor: u64,
    pub expires_at: DateTime<Utc>,
    pub renewed_at: DateTime<Utc>,
}

impl MailboxWatch {
    /// Whether the watch has not expired at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Whether the watch expires before `now + lead`.
    pub fn expires_within(&self, now: DateTime<Utc>, lead: chrono::Duration) -> bool {
        self.expires_at - now < lead
    }
}

/// What the provider returns when a watch is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRegistration {
    pub resource_id: String,
    pub history_id: u64,
    pub expires_at: DateTime<Utc>,
}

/// Result of renewing one mailbox's watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenewalOutcome {
    Renewed { expires_at: DateTime<Utc> },
    AlreadyValid { expires_at: DateTime<Utc> },
    Failed { reason: String },
    /// Mailbox is waiting for the user to re-authenticate; not retried.
    Suspended { status: MailboxStatus },
}

/// Result of moving a history cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CursorAdvance {
    Advanced { from: u64, to: u64 },
    /// The stored cursor already equals the requested value.
    Unchanged { cursor: u64 },
    /// The requested value is behind the stored cursor.
    Stale { current: u64 },
}

// ============================================================================
// Notifications and history
// ============================================================================

/// One push event. Ephemeral; may be duplicated or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub mailbox_id: String,
    pub new_history_id: u64,
    pub received_at: DateTime<Utc>,
}

/// Message ids added between two history ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRange {
    pub mailbox_id: String,
    pub from_history_id: u64,
    pub to_history_id: u64,
    /// Added message ids in provider order.
    pub message_ids: Vec<String>,
}

impl HistoryRange {
    /// Range with nothing new.
    pub fn empty(mailbox_id: impl Into<String>, cursor: u64) -> Self {
        Self {
            mailbox_id: mailbox_id.into(),
            from_history_id: cursor,
            to_history_id: cursor,
            message_ids: Vec::new(),
        }
    }
}

/// Outcome of resolving a notification against the stored cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryResolution {
    /// Duplicate or out-of-order notification; nothing to do.
    Empty { cursor: u64 },
    Range(HistoryRange),
    /// Provider no longer has history back to the cursor.
    Expired { cursor: u64 },
}

/// One page of the provider's history listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub next_page_token: Option<String>,
}

/// One history entry and the messages it added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub history_id: u64,
    pub added_message_ids: Vec<String>,
}

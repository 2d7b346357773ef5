//! Port interfaces for watch persistence

use async_trait::async_trait;
use mailpilot_domain::{MailboxState, MailboxWatch, Result};

/// Storage for mailbox watches and mailbox-level status.
///
/// All writes are single-row. Implementations persist before returning.
#[async_trait]
pub trait WatchRepository: Send + Sync {
    /// Get the watch for a mailbox, expired or not
    async fn get_watch(&self, mailbox_id: &str) -> Result<Option<MailboxWatch>>;

    /// Insert a watch, or update `resource_id`, `expires_at` and `renewed_at`
    /// of an existing one. An existing cursor is left untouched.
    async fn upsert_watch(&self, watch: &MailboxWatch) -> Result<MailboxWatch>;

    /// Set the cursor to `new` only if it still equals `expected`
    async fn compare_and_set_cursor(&self, mailbox_id: &str, expected: u64, new: u64)
        -> Result<bool>;

    /// Delete the watch; returns whether one existed
    async fn delete_watch(&self, mailbox_id: &str) -> Result<bool>;

    /// Get mailbox status bookkeeping
    async fn get_state(&self, mailbox_id: &str) -> Result<Option<MailboxState>>;

    /// Insert or replace mailbox status bookkeeping
    async fn put_state(&self, state: &MailboxState) -> Result<()>;
}

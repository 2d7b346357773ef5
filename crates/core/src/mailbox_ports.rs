//! Port interface for the identity store's connected-mailbox records

use async_trait::async_trait;
use mailpilot_domain::{ConnectedMailbox, Result};

/// Read access to connected mailboxes.
#[async_trait]
pub trait MailboxDirectory: Send + Sync {
    /// Get a mailbox by id, connected or not
    async fn get(&self, mailbox_id: &str) -> Result<Option<ConnectedMailbox>>;

    /// Find the connected mailbox owning an address (case-insensitive)
    async fn find_by_address(&self, address: &str) -> Result<Option<ConnectedMailbox>>;

    /// List every currently connected mailbox
    async fn list_connected(&self) -> Result<Vec<ConnectedMailbox>>;
}

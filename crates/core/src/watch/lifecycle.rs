//! Mailbox connect/disconnect

use std::sync::Arc;
use std::time::Duration;

use mailpilot_domain::{MailPilotError, MailboxStatus, MailboxWatch, ProviderError, Result};
use tracing::{info, warn};

use super::registry::WatchRegistry;
use crate::mailbox_ports::MailboxDirectory;
use crate::provider_ports::MailProvider;

/// Starts and stops provider watches for a mailbox.
pub struct MailboxLifecycle {
    registry: Arc<WatchRegistry>,
    directory: Arc<dyn MailboxDirectory>,
    mail: Arc<dyn MailProvider>,
    call_timeout: Duration,
}

impl MailboxLifecycle {
    /// Lifecycle with `call_timeout` on every provider call.
    pub fn new(
        registry: Arc<WatchRegistry>,
        directory: Arc<dyn MailboxDirectory>,
        mail: Arc<dyn MailProvider>,
        call_timeout: Duration,
    ) -> Self {
        Self { registry, directory, mail, call_timeout }
    }

    /// Start a watch for a connected mailbox and mark it active.
    ///
    /// Also used to recover a mailbox flagged for re-authentication once the
    /// user has reconnected.
    pub async fn connect(&self, mailbox_id: &str) -> Result<MailboxWatch> {
        let mailbox = self
            .directory
            .get(mailbox_id)
            .await?
            .filter(|mailbox| mailbox.is_connected())
            .ok_or_else(|| MailPilotError::NotFound(format!("mailbox {mailbox_id} is not connected")))?;

        let registration = match tokio::time::timeout(self.call_timeout, self.mail.start_watch(&mailbox)).await {
            Ok(result) => result?,
            Err(_) => return Err(ProviderError::Timeout(self.call_timeout).into()),
        };
        let watch = self.registry.upsert_watch(mailbox_id, &registration).await?;
        self.registry.set_status(mailbox_id, MailboxStatus::Active, None).await?;
        info!(mailbox_id, cursor = watch.history_cursor, "Mailbox connected");
        Ok(watch)
    }

    /// Stop the watch (best effort), forget it and mark the mailbox
    /// disconnected. In-flight jobs notice at their next stage boundary.
    pub async fn disconnect(&self, mailbox_id: &str) -> Result<bool> {
        if let Some(mailbox) = self.directory.get(mailbox_id).await? {
            match tokio::time::timeout(self.call_timeout, self.mail.stop_watch(&mailbox)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(mailbox_id, error = %err, "Failed to stop provider watch"),
                Err(_) => warn!(mailbox_id, "Timed out stopping provider watch"),
            }
        }
        let removed = self.registry.remove_watch(mailbox_id).await?;
        self.registry
            .set_status(mailbox_id, MailboxStatus::Disconnected, Some("mailbox disconnected"))
            .await?;
        Ok(removed)
    }
}

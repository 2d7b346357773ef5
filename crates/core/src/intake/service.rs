//! Push validation

use std::sync::Arc;

use mailpilot_domain::{MailboxStatus, Notification, Result};
use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;
use crate::mailbox_ports::MailboxDirectory;
use crate::watch::WatchRegistry;

/// Why a push was acknowledged without queueing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    UnknownMailbox,
    MailboxInactive { status: MailboxStatus },
}

/// Outcome of matching a push to a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum IntakeDecision {
    Accepted(Notification),
    Ignored(IgnoreReason),
}

/// Maps push notifications onto active mailboxes.
pub struct NotificationIntake {
    directory: Arc<dyn MailboxDirectory>,
    registry: Arc<WatchRegistry>,
    clock: Arc<dyn Clock>,
}

impl NotificationIntake {
    /// Intake over the mailbox directory and registry.
    pub fn new(directory: Arc<dyn MailboxDirectory>, registry: Arc<WatchRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { directory, registry, clock }
    }

    /// Map a push for `email_address` onto a connected, active mailbox.
    pub async fn accept(&self, email_address: &str, history_id: u64) -> Result<IntakeDecision> {
        let Some(mailbox) = self.directory.find_by_address(email_address).await? else {
            debug!(email_address, "Push for unknown mailbox");
            return Ok(IntakeDecision::Ignored(IgnoreReason::UnknownMailbox));
        };
        if !mailbox.is_connected() {
            return Ok(IntakeDecision::Ignored(IgnoreReason::MailboxInactive {
                status: MailboxStatus::Disconnected,
            }));
        }
        let status = self.registry.mailbox_status(&mailbox.mailbox_id).await?;
        if !status.accepts_work() {
            debug!(mailbox_id = %mailbox.mailbox_id, %status, "Push for inactive mailbox");
            return Ok(IntakeDecision::Ignored(IgnoreReason::MailboxInactive { status }));
        }
        Ok(IntakeDecision::Accepted(Notification {
            mailbox_id: mailbox.mailbox_id,
            new_history_id: history_id,
            received_at: self.clock.now(),
        }))
    }
}

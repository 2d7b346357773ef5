//! Watch registry: active subscriptions, history cursors and mailbox status

use std::sync::Arc;

use mailpilot_domain::{
    CursorAdvance, MailPilotError, MailboxState, MailboxStatus, MailboxWatch, Result,
    WatchRegistration,
};
use tracing::{debug, info, warn};

use super::ports::WatchRepository;
use crate::clock::Clock;

/// Compare-and-set attempts before a cursor write gives up.
const MAX_CURSOR_CAS_ATTEMPTS: u32 = 5;

/// Watch records, history cursors and mailbox status.
pub struct WatchRegistry {
    repository: Arc<dyn WatchRepository>,
    clock: Arc<dyn Clock>,
}

impl WatchRegistry {
    /// Registry over `repository`.
    pub fn new(repository: Arc<dyn WatchRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Watch whose expiry is still in the future.
    ///
    /// Returns `NotFound` when the mailbox has no watch or it has lapsed.
    pub async fn get_active_watch(&self, mailbox_id: &str) -> Result<MailboxWatch> {
        let now = self.clock.now();
        match self.repository.get_watch(mailbox_id).await? {
            Some(watch) if watch.is_active(now) => Ok(watch),
            Some(_) => Err(MailPilotError::NotFound(format!("watch for {mailbox_id} has expired"))),
            None => Err(MailPilotError::NotFound(format!("no watch for {mailbox_id}"))),
        }
    }

    /// Watch regardless of expiry. The cursor stays meaningful after a lapse.
    pub async fn find_watch(&self, mailbox_id: &str) -> Result<Option<MailboxWatch>> {
        self.repository.get_watch(mailbox_id).await
    }

    /// Record a freshly started watch.
    ///
    /// A new watch seeds its cursor from the registration's history id; an
    /// existing watch only has its expiry fields replaced.
    pub async fn upsert_watch(
        &self,
        mailbox_id: &str,
        registration: &WatchRegistration,
    ) -> Result<MailboxWatch> {
        let now = self.clock.now();
        if registration.expires_at <= now {
            return Err(MailPilotError::InvalidInput(format!(
                "watch for {mailbox_id} expires at {} which is not in the future",
                registration.expires_at
            )));
        }

        let watch = MailboxWatch {
            mailbox_id: mailbox_id.to_string(),
            resource_id: registration.resource_id.clone(),
            history_cursor: registration.history_id,
            expires_at: registration.expires_at,
            renewed_at: now,
        };
        let stored = self.repository.upsert_watch(&watch).await?;
        info!(
            mailbox_id,
            expires_at = %stored.expires_at,
            cursor = stored.history_cursor,
            "Watch registered"
        );
        Ok(stored)
    }

    /// Move the cursor forward to `new_history_id`.
    ///
    /// Never decreases the cursor: a lower value yields `Stale`.
    pub async fn advance_cursor(&self, mailbox_id: &str, new_history_id: u64) -> Result<CursorAdvance> {
        for _ in 0..MAX_CURSOR_CAS_ATTEMPTS {
            let current = self.current_cursor(mailbox_id).await?;
            match self.compare_and_advance(mailbox_id, current, new_history_id).await? {
                CursorAdvance::Stale { current: observed } if observed < new_history_id => {
                    debug!(mailbox_id, observed, "Cursor moved during advance; retrying");
                }
                outcome => return Ok(outcome),
            }
        }
        Err(MailPilotError::Conflict(format!("cursor for {mailbox_id} kept changing")))
    }

    /// Single compare-and-set from `expected` to `new_history_id`.
    ///
    /// On a lost race the returned `Stale` carries the cursor now stored.
    pub async fn compare_and_advance(
        &self,
        mailbox_id: &str,
        expected: u64,
        new_history_id: u64,
    ) -> Result<CursorAdvance> {
        if new_history_id < expected {
            warn!(mailbox_id, expected, new_history_id, "Rejected stale cursor advance");
            return Ok(CursorAdvance::Stale { current: expected });
        }
        if new_history_id == expected {
            return Ok(CursorAdvance::Unchanged { cursor: expected });
        }
        if self.repository.compare_and_set_cursor(mailbox_id, expected, new_history_id).await? {
            debug!(mailbox_id, from = expected, to = new_history_id, "Cursor advanced");
            return Ok(CursorAdvance::Advanced { from: expected, to: new_history_id });
        }
        let current = self.current_cursor(mailbox_id).await?;
        if current == new_history_id {
            return Ok(CursorAdvance::Unchanged { cursor: current });
        }
        Ok(CursorAdvance::Stale { current })
    }

    /// Drop the watch of a disconnected mailbox.
    pub async fn remove_watch(&self, mailbox_id: &str) -> Result<bool> {
        let removed = self.repository.delete_watch(mailbox_id).await?;
        if removed {
            info!(mailbox_id, "Watch removed");
        }
        Ok(removed)
    }

    /// Stored state, or a fresh `Active` one.
    pub async fn mailbox_state(&self, mailbox_id: &str) -> Result<MailboxState> {
        Ok(self
            .repository
            .get_state(mailbox_id)
            .await?
            .unwrap_or_else(|| MailboxState::active(mailbox_id, self.clock.now())))
    }

    /// Current mailbox status.
    pub async fn mailbox_status(&self, mailbox_id: &str) -> Result<MailboxStatus> {
        Ok(self.mailbox_state(mailbox_id).await?.status)
    }

    /// Set the mailbox status, resetting the failure counter when it becomes
    /// active again.
    pub async fn set_status(
        &self,
        mailbox_id: &str,
        status: MailboxStatus,
        reason: Option<&str>,
    ) -> Result<MailboxState> {
        let mut state = self.mailbox_state(mailbox_id).await?;
        if state.status != status {
            info!(mailbox_id, from = %state.status, to = %status, reason, "Mailbox status changed");
        }
        state.status = status;
        if status == MailboxStatus::Active {
            state.consecutive_failures = 0;
        }
        if let Some(reason) = reason {
            state.last_error = Some(reason.to_string());
        }
        state.updated_at = self.clock.now();
        self.repository.put_state(&state).await?;
        Ok(state)
    }

    /// Count a failed renewal; flags the mailbox for re-authentication once
    /// `threshold` consecutive failures accumulate.
    pub async fn record_renewal_failure(
        &self,
        mailbox_id: &str,
        reason: &str,
        threshold: u32,
    ) -> Result<MailboxState> {
        let mut state = self.mailbox_state(mailbox_id).await?;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_error = Some(reason.to_string());
        state.updated_at = self.clock.now();
        if state.consecutive_failures >= threshold && state.status.accepts_work() {
            warn!(
                mailbox_id,
                failures = state.consecutive_failures,
                reason,
                "Renewal keeps failing; mailbox needs re-authentication"
            );
            state.status = MailboxStatus::NeedsReauth;
        }
        self.repository.put_state(&state).await?;
        Ok(state)
    }

    /// Clear the renewal failure count.
    pub async fn record_renewal_success(&self, mailbox_id: &str) -> Result<MailboxState> {
        let mut state = self.mailbox_state(mailbox_id).await?;
        if state.consecutive_failures == 0 && state.last_error.is_none() {
            return Ok(state);
        }
        state.consecutive_failures = 0;
        state.last_error = None;
        state.updated_at = self.clock.now();
        self.repository.put_state(&state).await?;
        Ok(state)
    }

    async fn current_cursor(&self, mailbox_id: &str) -> Result<u64> {
        self.repository
            .get_watch(mailbox_id)
            .await?
            .map(|watch| watch.history_cursor)
            .ok_or_else(|| MailPilotError::NotFound(format!("no watch for {mailbox_id}")))
    }
}

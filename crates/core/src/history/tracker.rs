//! Resolves notifications into history ranges

use std::collections::HashSet;
use std::sync::Arc;

use mailpilot_domain::{
    ConnectedMailbox, CursorAdvance, HistoryRange, HistoryResolution, MailPilotError,
    Notification, ProviderError, Result,
};
use tracing::{debug, info, instrument, warn};

use crate::provider_ports::MailProvider;
use crate::retry::RetryPolicy;
use crate::watch::WatchRegistry;

const DEFAULT_MAX_PAGES: usize = 100;
const DEFAULT_MAX_RESOLVE_ATTEMPTS: u32 = 5;

/// Turns a push notification into the message ids added since the stored cursor.
pub struct HistoryCursorTracker {
    registry: Arc<WatchRegistry>,
    mail: Arc<dyn MailProvider>,
    retry: RetryPolicy,
    max_pages: usize,
    max_attempts: u32,
}

impl HistoryCursorTracker {
    /// Tracker reading history through `mail`, with `retry` around each page.
    pub fn new(registry: Arc<WatchRegistry>, mail: Arc<dyn MailProvider>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            mail,
            retry,
            max_pages: DEFAULT_MAX_PAGES,
            max_attempts: DEFAULT_MAX_RESOLVE_ATTEMPTS,
        }
    }

    /// Cap the number of history pages read per resolution
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Resolve a notification against the stored cursor.
    ///
    /// The cursor is advanced to `new_history_id` only after the full range
    /// has been listed. When another resolver advances it first, the range is
    /// recomputed against the new cursor, which usually makes it empty.
    #[instrument(skip(self, mailbox), fields(mailbox_id = %notification.mailbox_id, history_id = notification.new_history_id))]
    pub async fn resolve(
        &self,
        mailbox: &ConnectedMailbox,
        notification: &Notification,
    ) -> Result<HistoryResolution> {
        let mailbox_id = notification.mailbox_id.as_str();
        let target = notification.new_history_id;

        for _ in 0..self.max_attempts {
            let cursor = self
                .registry
                .find_watch(mailbox_id)
                .await?
                .ok_or_else(|| MailPilotError::NotFound(format!("no watch for {mailbox_id}")))?
                .history_cursor;

            if target <= cursor {
                debug!(cursor, "Notification already covered by cursor");
                return Ok(HistoryResolution::Empty { cursor });
            }

            let message_ids = match self.collect_range(mailbox, cursor, target).await {
                Ok(ids) => ids,
                Err(ProviderError::CursorExpired(reason)) => {
                    warn!(cursor, reason = %reason, "History cursor expired; full resync required");
                    return Ok(HistoryResolution::Expired { cursor });
                }
                Err(err) => return Err(err.into()),
            };

            match self.registry.compare_and_advance(mailbox_id, cursor, target).await? {
                CursorAdvance::Advanced { from, to } => {
                    info!(from, to, messages = message_ids.len(), "Resolved history range");
                    return Ok(HistoryResolution::Range(HistoryRange {
                        mailbox_id: mailbox_id.to_string(),
                        from_history_id: from,
                        to_history_id: to,
                        message_ids,
                    }));
                }
                other => debug!(?other, "Cursor changed while resolving; recomputing"),
            }
        }

        Err(MailPilotError::Conflict(format!("cursor for {mailbox_id} kept changing during resolve")))
    }

    /// Message ids added in `(from, to]`, in provider order, deduplicated.
    async fn collect_range(
        &self,
        mailbox: &ConnectedMailbox,
        from: u64,
        to: u64,
    ) -> std::result::Result<Vec<String>, ProviderError> {
        let mut message_ids = Vec::new();
        let mut seen = HashSet::new();
        let mut page_token: Option<String> = None;

        for _ in 0..self.max_pages {
            let token = page_token.clone();
            let page = self
                .retry
                .run("list_history", || self.mail.list_history_since(mailbox, from, token.as_deref()))
                .await?;

            let mut past_target = false;
            for record in page.records {
                if record.history_id <= from {
                    continue;
                }
                if record.history_id > to {
                    past_target = true;
                    break;
                }
                for id in record.added_message_ids {
                    if seen.insert(id.clone()) {
                        message_ids.push(id);
                    }
                }
            }

            match page.next_page_token {
                Some(next) if !past_target => page_token = Some(next),
                _ => return Ok(message_ids),
            }
        }

        // Advancing past a partially listed range would drop messages.
        warn!(from, to, pages = self.max_pages, "History listing exceeded page limit");
        Err(ProviderError::CursorExpired(format!(
            "history between {from} and {to} exceeds {} pages",
            self.max_pages
        )))
    }
}

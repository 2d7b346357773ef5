//! SQLite-backed watch registry storage.
//!
//! Watches and mailbox states live in separate tables. Re-registering a watch
//! only rewrites its expiry fields; the history cursor moves exclusively
//! through [`compare_and_set_cursor`](WatchRepository::compare_and_set_cursor).

use std::sync::Arc;

use async_trait::async_trait;
use mailpilot_core::WatchRepository;
use mailpilot_domain::{MailboxState, MailboxStatus, MailboxWatch, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::warn;

use super::manager::{map_sql_error, DbManager};
use super::sql_util::{
    from_millis, history_id_from_sql, history_id_to_sql, to_millis, with_connection,
};

/// Watch and mailbox state tables.
pub struct SqliteWatchRepository {
    db: Arc<DbManager>,
}

impl SqliteWatchRepository {
    /// Repository over `db`.
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    fn select_watch(conn: &Connection, mailbox_id: &str) -> Result<Option<MailboxWatch>> {
        conn.query_row(WATCH_SELECT_SQL, params![mailbox_id], map_watch_row)
            .optional()
            .map_err(map_sql_error)
    }
}

#[async_trait]
impl WatchRepository for SqliteWatchRepository {
    async fn get_watch(&self, mailbox_id: &str) -> Result<Option<MailboxWatch>> {
        let mailbox_id = mailbox_id.to_string();
        with_connection(&self.db, move |conn| Self::select_watch(conn, &mailbox_id)).await
    }

    async fn upsert_watch(&self, watch: &MailboxWatch) -> Result<MailboxWatch> {
        let watch = watch.clone();
        with_connection(&self.db, move |conn| {
            conn.execute(
                WATCH_UPSERT_SQL,
                params![
                    watch.mailbox_id,
                    watch.resource_id,
                    history_id_to_sql(watch.history_cursor)?,
                    to_millis(watch.expires_at),
                    to_millis(watch.renewed_at),
                ],
            )
            .map_err(map_sql_error)?;
            Self::select_watch(conn, &watch.mailbox_id)?.ok_or_else(|| {
                mailpilot_domain::MailPilotError::Database(format!(
                    "watch for {} vanished after upsert",
                    watch.mailbox_id
                ))
            })
        })
        .await
    }

    async fn compare_and_set_cursor(
        &self,
        mailbox_id: &str,
        expected: u64,
        new: u64,
    ) -> Result<bool> {
        let mailbox_id = mailbox_id.to_string();
        with_connection(&self.db, move |conn| {
            let updated = conn
                .execute(
                    "UPDATE mailbox_watches SET history_cursor = ?1
                     WHERE mailbox_id = ?2 AND history_cursor = ?3",
                    params![history_id_to_sql(new)?, mailbox_id, history_id_to_sql(expected)?],
                )
                .map_err(map_sql_error)?;
            Ok(updated == 1)
        })
        .await
    }

    async fn delete_watch(&self, mailbox_id: &str) -> Result<bool> {
        let mailbox_id = mailbox_id.to_string();
        with_connection(&self.db, move |conn| {
            let deleted = conn
                .execute("DELETE FROM mailbox_watches WHERE mailbox_id = ?1", params![mailbox_id])
                .map_err(map_sql_error)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn get_state(&self, mailbox_id: &str) -> Result<Option<MailboxState>> {
        let mailbox_id = mailbox_id.to_string();
        with_connection(&self.db, move |conn| {
            conn.query_row(STATE_SELECT_SQL, params![mailbox_id], map_state_row)
                .optional()
                .map_err(map_sql_error)
        })
        .await
    }

    async fn put_state(&self, state: &MailboxState) -> Result<()> {
        let state = state.clone();
        with_connection(&self.db, move |conn| {
            conn.execute(
                STATE_UPSERT_SQL,
                params![
                    state.mailbox_id,
                    state.status.as_str(),
                    state.consecutive_failures,
                    state.last_error,
                    to_millis(state.updated_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }
}

const WATCH_SELECT_SQL: &str = "SELECT mailbox_id, resource_id, history_cursor, expires_at, renewed_at
     FROM mailbox_watches WHERE mailbox_id = ?1";

// The cursor column is only written on insert.
const WATCH_UPSERT_SQL: &str = "INSERT INTO mailbox_watches
        (mailbox_id, resource_id, history_cursor, expires_at, renewed_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(mailbox_id) DO UPDATE SET
        resource_id = excluded.resource_id,
        expires_at = excluded.expires_at,
        renewed_at = excluded.renewed_at";

const STATE_SELECT_SQL: &str = "SELECT mailbox_id, status, consecutive_failures, last_error, updated_at
     FROM mailbox_states WHERE mailbox_id = ?1";

const STATE_UPSERT_SQL: &str = "INSERT INTO mailbox_states
        (mailbox_id, status, consecutive_failures, last_error, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(mailbox_id) DO UPDATE SET
        status = excluded.status,
        consecutive_failures = excluded.consecutive_failures,
        last_error = excluded.last_error,
        updated_at = excluded.updated_at";

fn map_watch_row(row: &Row<'_>) -> rusqlite::Result<MailboxWatch> {
    Ok(MailboxWatch {
        mailbox_id: row.get(0)?,
        resource_id: row.get(1)?,
        history_cursor: history_id_from_sql(row.get(2)?),
        expires_at: from_millis("expires_at", row.get(3)?),
        renewed_at: from_millis("renewed_at", row.get(4)?),
    })
}

fn map_state_row(row: &Row<'_>) -> rusqlite::Result<MailboxState> {
    let mailbox_id: String = row.get(0)?;
    let raw_status: String = row.get(1)?;
    Ok(MailboxState {
        status: parse_status(&mailbox_id, &raw_status),
        consecutive_failures: row.get(2)?,
        last_error: row.get(3)?,
        updated_at: from_millis("updated_at", row.get(4)?),
        mailbox_id,
    })
}

fn parse_status(mailbox_id: &str, raw: &str) -> MailboxStatus {
    match raw.parse::<MailboxStatus>() {
        Ok(status) => status,
        Err(err) => {
            warn!(
                mailbox_id,
                raw_status = %raw,
                error = %err,
                "invalid mailbox status returned by sqlite; treating as needs_reauth"
            );
            MailboxStatus::NeedsReauth
        }
    }
}

//! SQLite-backed connected-mailbox directory and OAuth credential store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailpilot_core::MailboxDirectory;
use mailpilot_domain::{normalize_address, ConnectedMailbox, MailPilotError, Result};
use rusqlite::{params, OptionalExtension, Row};

use super::manager::{map_sql_error, DbManager};
use super::sql_util::{from_millis, to_millis, with_connection};
use crate::integrations::google::RefreshTokenStore;

/// Connected mailboxes and their stored refresh tokens.
pub struct SqliteMailboxRepository {
    db: Arc<DbManager>,
}

impl SqliteMailboxRepository {
    /// Repository over `db`.
    pub const fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Insert or reconnect a mailbox. Reconnecting clears `disconnected_at`.
    pub async fn upsert(&self, mailbox: &ConnectedMailbox) -> Result<ConnectedMailbox> {
        let address = normalize_address(&mailbox.address).ok_or_else(|| {
            MailPilotError::InvalidInput(format!("invalid mailbox address: {}", mailbox.address))
        })?;
        let mut mailbox = mailbox.clone();
        mailbox.address = address;

        with_connection(&self.db, move |conn| {
            conn.execute(
                MAILBOX_UPSERT_SQL,
                params![
                    mailbox.mailbox_id,
                    mailbox.user_id,
                    mailbox.address,
                    mailbox.token_handle,
                    to_millis(mailbox.connected_at),
                    mailbox.disconnected_at.map(to_millis),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(mailbox)
        })
        .await
    }

    /// Flag the mailbox disconnected. Returns `false` for unknown mailboxes.
    pub async fn mark_disconnected(&self, mailbox_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mailbox_id = mailbox_id.to_string();
        with_connection(&self.db, move |conn| {
            let updated = conn
                .execute(
                    "UPDATE connected_mailboxes SET disconnected_at = ?1
                     WHERE mailbox_id = ?2 AND disconnected_at IS NULL",
                    params![to_millis(at), mailbox_id],
                )
                .map_err(map_sql_error)?;
            Ok(updated > 0)
        })
        .await
    }

    /// Store (or rotate) the refresh token behind a token handle.
    pub async fn store_refresh_token(
        &self,
        token_handle: &str,
        refresh_token: &str,
        scope: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let token_handle = token_handle.to_string();
        let refresh_token = refresh_token.to_string();
        let scope = scope.map(str::to_string);
        with_connection(&self.db, move |conn| {
            conn.execute(
                "INSERT INTO oauth_credentials (token_handle, refresh_token, scope, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(token_handle) DO UPDATE SET
                    refresh_token = excluded.refresh_token,
                    scope = excluded.scope,
                    updated_at = excluded.updated_at",
                params![token_handle, refresh_token, scope, to_millis(now)],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MailboxDirectory for SqliteMailboxRepository {
    async fn get(&self, mailbox_id: &str) -> Result<Option<ConnectedMailbox>> {
        let mailbox_id = mailbox_id.to_string();
        with_connection(&self.db, move |conn| {
            conn.query_row(
                &format!("{MAILBOX_SELECT_SQL} WHERE mailbox_id = ?1"),
                params![mailbox_id],
                map_mailbox_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<ConnectedMailbox>> {
        let Some(address) = normalize_address(address) else {
            return Ok(None);
        };
        with_connection(&self.db, move |conn| {
            conn.query_row(
                &format!("{MAILBOX_SELECT_SQL} WHERE address = ?1"),
                params![address],
                map_mailbox_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }

    async fn list_connected(&self) -> Result<Vec<ConnectedMailbox>> {
        with_connection(&self.db, move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{MAILBOX_SELECT_SQL} WHERE disconnected_at IS NULL ORDER BY mailbox_id"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt.query_map([], map_mailbox_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
    }
}

#[async_trait]
impl RefreshTokenStore for SqliteMailboxRepository {
    async fn refresh_token(&self, token_handle: &str) -> Result<Option<String>> {
        let token_handle = token_handle.to_string();
        with_connection(&self.db, move |conn| {
            conn.query_row(
                "SELECT refresh_token FROM oauth_credentials WHERE token_handle = ?1",
                params![token_handle],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
    }
}

const MAILBOX_SELECT_SQL: &str = "SELECT
        mailbox_id, user_id, address, token_handle, connected_at, disconnected_at
     FROM connected_mailboxes";

const MAILBOX_UPSERT_SQL: &str = "INSERT INTO connected_mailboxes
        (mailbox_id, user_id, address, token_handle, connected_at, disconnected_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(mailbox_id) DO UPDATE SET
        user_id = excluded.user_id,
        address = excluded.address,
        token_handle = excluded.token_handle,
        connected_at = excluded.connected_at,
        disconnected_at = excluded.disconnected_at";

fn map_mailbox_row(row: &Row<'_>) -> rusqlite::Result<ConnectedMailbox> {
    let disconnected_at: Option<i64> = row.get(5)?;
    Ok(ConnectedMailbox {
        mailbox_id: row.get(0)?,
        user_id: row.get(1)?,
        address: row.get(2)?,
        token_handle: row.get(3)?,
        connected_at: from_millis("connected_at", row.get(4)?),
        disconnected_at: disconnected_at.map(|at| from_millis("disconnected_at", at)),
    })
}

//! Shared helpers for the SQLite repositories

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailpilot_domain::{MailPilotError, Result};
use rusqlite::Connection;
use tokio::task;
use tracing::warn;

use super::manager::DbManager;
use crate::errors::InfraError;

/// Run `op` on a pooled connection inside `spawn_blocking`.
pub(crate) async fn with_connection<T, F>(db: &Arc<DbManager>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let db = Arc::clone(db);
    task::spawn_blocking(move || -> Result<T> {
        let conn = db.get_connection()?;
        op(&conn)
    })
    .await
    .map_err(|err| MailPilotError::from(InfraError::from(err)))?
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(column: &str, millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(|| {
        warn!(column, millis, "timestamp out of range in sqlite row; using epoch");
        DateTime::UNIX_EPOCH
    })
}

pub(crate) fn history_id_to_sql(history_id: u64) -> Result<i64> {
    i64::try_from(history_id)
        .map_err(|_| MailPilotError::InvalidInput(format!("history id {history_id} out of range")))
}

pub(crate) fn history_id_from_sql(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or_default()
}

pub(crate) fn limit_to_sql(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn millis_round_trip_keeps_precision() {
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap() + chrono::Duration::milliseconds(42);
        assert_eq!(from_millis("at", to_millis(at)), at);
    }

    #[test]
    fn oversized_history_ids_are_rejected() {
        assert!(history_id_to_sql(u64::MAX).is_err());
        assert_eq!(history_id_to_sql(12_345).unwrap(), 12_345);
        assert_eq!(history_id_from_sql(-1), 0);
    }
}

//! r2d2 SQLite pool with per-connection pragmas

use std::path::Path;
use std::time::Duration;

use mailpilot_domain::{MailPilotError, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::InfraError;

/// r2d2 pool of SQLite connections.
pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
/// Connection checked out of [`SqlitePool`].
pub type SqliteConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Build a pool whose connections all run [`apply_connection_pragmas`].
pub fn create_pool<P: AsRef<Path>>(path: P, config: &PoolConfig) -> Result<SqlitePool> {
    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(path.as_ref())
        .with_init(move |conn| apply_connection_pragmas(conn, busy_timeout));

    r2d2::Pool::builder()
        .max_size(config.max_size.max(1))
        .connection_timeout(config.connection_timeout)
        .build(manager)
        .map_err(|err| MailPilotError::from(InfraError::from(err)))
}

/// Apply connection-level pragmas
///
/// - WAL mode for concurrent readers alongside the single writer
/// - NORMAL synchronous mode
/// - WAL autocheckpoint after 1000 pages
/// - Foreign key constraints enabled
/// - Busy timeout for lock contention
pub fn apply_connection_pragmas(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA wal_autocheckpoint=1000;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;",
    )?;
    conn.busy_timeout(busy_timeout)
}

#![allow(dead_code)]

use std::sync::{Arc, Once};

use chrono::{DateTime, Duration, TimeZone, Utc};
use mailpilot_domain::{ConnectedMailbox, MailboxWatch};
use mailpilot_infra::database::DbManager;
use tempfile::TempDir;

/// Temporary database wrapper that keeps the underlying file alive for the
/// duration of a test run.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new temporary database with the full schema applied.
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("temp dir should be created");
        let db_path = temp_dir.path().join("test.db");

        let manager = DbManager::new(&db_path, 4).expect("db manager should be created");
        manager.run_migrations().expect("migrations should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }

    /// Execute a batch of SQL statements against the database.
    pub fn execute_batch(&self, sql: &str) {
        let conn = self
            .manager
            .get_connection()
            .expect("connection should be available for execute_batch");
        conn.execute_batch(sql).expect("SQL batch execution should succeed");
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test subscriber once so `RUST_LOG` works under `cargo test`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).single().expect("valid timestamp")
}

pub fn mailbox(mailbox_id: &str, address: &str) -> ConnectedMailbox {
    ConnectedMailbox {
        mailbox_id: mailbox_id.to_string(),
        user_id: format!("user-{mailbox_id}"),
        address: address.to_string(),
        token_handle: format!("handle-{mailbox_id}"),
        connected_at: fixed_now(),
        disconnected_at: None,
    }
}

pub fn watch(mailbox_id: &str, cursor: u64, expires_in_hours: i64) -> MailboxWatch {
    MailboxWatch {
        mailbox_id: mailbox_id.to_string(),
        resource_id: "projects/acme/topics/gmail".to_string(),
        history_cursor: cursor,
        expires_at: fixed_now() + Duration::hours(expires_in_hours),
        renewed_at: fixed_now(),
    }
}

//! SQLite repository integration tests
//!
//! Exercise the watch registry, idempotency ledger and mailbox directory
//! against a real database file.

mod support;

use chrono::Duration;
use mailpilot_core::{JobRepository, MailboxDirectory, WatchRepository};
use mailpilot_domain::{
    JobLease, JobStatus, MailboxState, MailboxStatus, ProcessingJob, SendIntent,
};
use mailpilot_infra::integrations::google::RefreshTokenStore;
use mailpilot_infra::{SqliteJobRepository, SqliteMailboxRepository, SqliteWatchRepository};
use support::{fixed_now, mailbox, watch, TestDatabase};

#[tokio::test(flavor = "multi_thread")]
async fn watch_upsert_preserves_cursor() {
    let db = TestDatabase::new();
    let repo = SqliteWatchRepository::new(db.manager.clone());

    repo.upsert_watch(&watch("mbx-1", 100, 48)).await.unwrap();

    // A renewal reports a fresh history id; the stored cursor must not move.
    let mut renewed = watch("mbx-1", 900, 168);
    renewed.renewed_at = fixed_now() + Duration::hours(1);
    let stored = repo.upsert_watch(&renewed).await.unwrap();

    assert_eq!(stored.history_cursor, 100);
    assert_eq!(stored.expires_at, renewed.expires_at);
    assert_eq!(stored.renewed_at, renewed.renewed_at);
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_compare_and_set_rejects_stale_expectation() {
    let db = TestDatabase::new();
    let repo = SqliteWatchRepository::new(db.manager.clone());
    repo.upsert_watch(&watch("mbx-1", 100, 48)).await.unwrap();

    assert!(repo.compare_and_set_cursor("mbx-1", 100, 150).await.unwrap());
    assert!(!repo.compare_and_set_cursor("mbx-1", 100, 175).await.unwrap());
    assert!(!repo.compare_and_set_cursor("mbx-unknown", 0, 1).await.unwrap());

    let stored = repo.get_watch("mbx-1").await.unwrap().unwrap();
    assert_eq!(stored.history_cursor, 150);
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_delete_and_state_round_trip() {
    let db = TestDatabase::new();
    let repo = SqliteWatchRepository::new(db.manager.clone());
    repo.upsert_watch(&watch("mbx-1", 100, 48)).await.unwrap();

    assert!(repo.delete_watch("mbx-1").await.unwrap());
    assert!(!repo.delete_watch("mbx-1").await.unwrap());
    assert!(repo.get_watch("mbx-1").await.unwrap().is_none());

    let mut state = MailboxState::active("mbx-1", fixed_now());
    state.status = MailboxStatus::NeedsReauth;
    state.consecutive_failures = 2;
    state.last_error = Some("invalid_grant".into());
    repo.put_state(&state).await.unwrap();

    let stored = repo.get_state("mbx-1").await.unwrap().unwrap();
    assert_eq!(stored, state);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_status_reads_as_needs_reauth() {
    let db = TestDatabase::new();
    let repo = SqliteWatchRepository::new(db.manager.clone());
    db.execute_batch(
        "INSERT INTO mailbox_states (mailbox_id, status, consecutive_failures, last_error, updated_at)
         VALUES ('mbx-odd', 'paused', 0, NULL, 0);",
    );

    let state = repo.get_state("mbx-odd").await.unwrap().unwrap();
    assert_eq!(state.status, MailboxStatus::NeedsReauth);
}

#[tokio::test(flavor = "multi_thread")]
async fn job_insert_is_unique_per_message() {
    let db = TestDatabase::new();
    let repo = SqliteJobRepository::new(db.manager.clone());

    let first = ProcessingJob::new("mbx-1", "msg-1", fixed_now());
    let duplicate = ProcessingJob::new("mbx-1", "msg-1", fixed_now());
    assert!(repo.insert_if_absent(&first).await.unwrap());
    assert!(!repo.insert_if_absent(&duplicate).await.unwrap());

    let stored = repo.find_by_message("mbx-1", "msg-1").await.unwrap().unwrap();
    assert_eq!(stored.id, first.id);
    assert_eq!(stored.status, JobStatus::Pending);

    // Same message id in another mailbox is a separate job.
    let other = ProcessingJob::new("mbx-2", "msg-1", fixed_now());
    assert!(repo.insert_if_absent(&other).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn job_compare_and_swap_checks_version() {
    let db = TestDatabase::new();
    let repo = SqliteJobRepository::new(db.manager.clone());
    let job = ProcessingJob::new("mbx-1", "msg-1", fixed_now());
    repo.insert_if_absent(&job).await.unwrap();

    let mut next = job.clone();
    next.status = JobStatus::Drafted;
    next.version = 1;
    next.attempt = 1;
    next.lease = Some(JobLease {
        owner: "worker-a".into(),
        expires_at: fixed_now() + Duration::minutes(5),
    });
    next.send_intent = Some(SendIntent {
        rfc822_message_id: job.reply_message_id(),
        recorded_at: fixed_now(),
    });
    assert!(repo.compare_and_swap(&next, 0).await.unwrap());

    // A second writer holding the old version loses.
    let mut stale = job.clone();
    stale.status = JobStatus::Failed;
    stale.version = 1;
    assert!(!repo.compare_and_swap(&stale, 0).await.unwrap());

    let stored = repo.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Drafted);
    assert_eq!(stored.version, 1);
    assert_eq!(stored.lease, next.lease);
    assert_eq!(stored.send_intent, next.send_intent);
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_jobs_exclude_terminal_and_live_leases() {
    let db = TestDatabase::new();
    let repo = SqliteJobRepository::new(db.manager.clone());
    let now = fixed_now();

    let idle = ProcessingJob::new("mbx-1", "idle", now);
    repo.insert_if_absent(&idle).await.unwrap();

    let mut leased = ProcessingJob::new("mbx-1", "leased", now);
    leased.lease = Some(JobLease { owner: "w".into(), expires_at: now + Duration::minutes(5) });
    repo.insert_if_absent(&leased).await.unwrap();

    let mut expired = ProcessingJob::new("mbx-1", "expired", now);
    expired.status = JobStatus::Parsed;
    expired.lease = Some(JobLease { owner: "w".into(), expires_at: now - Duration::minutes(1) });
    repo.insert_if_absent(&expired).await.unwrap();

    let mut done = ProcessingJob::new("mbx-1", "done", now);
    done.status = JobStatus::Sent;
    done.completed_at = Some(now);
    repo.insert_if_absent(&done).await.unwrap();

    let mut abandoned: Vec<String> = repo
        .list_abandoned(now, &[], 10)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.message_id)
        .collect();
    abandoned.sort();
    assert_eq!(abandoned, vec!["expired".to_string(), "idle".to_string()]);

    let other = ProcessingJob::new("mbx-2", "other", now);
    repo.insert_if_absent(&other).await.unwrap();
    let excluded = vec!["mbx-1".to_string(), "mbx-9".to_string()];
    let remaining = repo.list_abandoned(now, &excluded, 1).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].message_id, "other");

    let sent = repo.list_by_status(JobStatus::Sent, 10).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(repo.list_for_mailbox("mbx-1", 2).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn mailbox_directory_normalises_addresses() {
    let db = TestDatabase::new();
    let repo = SqliteMailboxRepository::new(db.manager.clone());

    let stored = repo.upsert(&mailbox("mbx-1", "Ada Lovelace <Ada@Example.com>")).await.unwrap();
    assert_eq!(stored.address, "ada@example.com");

    let found = repo.find_by_address("ADA@example.com").await.unwrap().unwrap();
    assert_eq!(found.mailbox_id, "mbx-1");
    assert!(repo.find_by_address("not an address").await.unwrap().is_none());

    assert!(repo.upsert(&mailbox("mbx-2", "   ")).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_and_reconnect_mailbox() {
    let db = TestDatabase::new();
    let repo = SqliteMailboxRepository::new(db.manager.clone());
    repo.upsert(&mailbox("mbx-1", "ada@example.com")).await.unwrap();
    repo.upsert(&mailbox("mbx-2", "grace@example.com")).await.unwrap();

    assert!(repo.mark_disconnected("mbx-1", fixed_now()).await.unwrap());
    assert!(!repo.mark_disconnected("mbx-1", fixed_now()).await.unwrap());
    assert!(!repo.mark_disconnected("mbx-unknown", fixed_now()).await.unwrap());

    let connected = repo.list_connected().await.unwrap();
    assert_eq!(connected.len(), 1);
    assert_eq!(connected[0].mailbox_id, "mbx-2");

    repo.upsert(&mailbox("mbx-1", "ada@example.com")).await.unwrap();
    let reconnected = repo.get("mbx-1").await.unwrap().unwrap();
    assert!(reconnected.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_tokens_rotate_in_place() {
    let db = TestDatabase::new();
    let repo = SqliteMailboxRepository::new(db.manager.clone());

    assert!(repo.refresh_token("handle-mbx-1").await.unwrap().is_none());

    repo.store_refresh_token("handle-mbx-1", "rt-1", Some("gmail.modify"), fixed_now())
        .await
        .unwrap();
    repo.store_refresh_token("handle-mbx-1", "rt-2", None, fixed_now()).await.unwrap();

    assert_eq!(repo.refresh_token("handle-mbx-1").await.unwrap().as_deref(), Some("rt-2"));
}

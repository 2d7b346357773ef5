//! Watch registry, renewal sweep and mailbox lifecycle

mod support;

use chrono::Duration;
use mailpilot_core::Clock;
use mailpilot_domain::{
    CursorAdvance, MailPilotError, MailboxStatus, ProviderError, RenewalOutcome, WatchRegistration,
};
use support::fixtures::{mailbox, Harness, MAILBOX_ID};

#[tokio::test]
async fn connect_seeds_cursor_and_activates_mailbox() {
    let h = Harness::new();

    let watch = h.connect_at(100).await;

    assert_eq!(watch.history_cursor, 100);
    assert_eq!(watch.expires_at, h.clock.now() + Duration::days(7));
    assert_eq!(h.registry.get_active_watch(MAILBOX_ID).await.unwrap(), watch);
    assert_eq!(h.registry.mailbox_status(MAILBOX_ID).await.unwrap(), MailboxStatus::Active);
}

#[tokio::test]
async fn re_registering_a_watch_keeps_the_cursor() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.registry.advance_cursor(MAILBOX_ID, 150).await.unwrap();

    let registration = WatchRegistration {
        resource_id: "watch-2".into(),
        history_id: 90,
        expires_at: h.clock.now() + Duration::days(7),
    };
    let watch = h.registry.upsert_watch(MAILBOX_ID, &registration).await.unwrap();

    assert_eq!(watch.history_cursor, 150);
    assert_eq!(watch.resource_id, "watch-2");
}

#[tokio::test]
async fn rejects_registration_that_already_expired() {
    let h = Harness::new();
    let registration = WatchRegistration {
        resource_id: "watch-1".into(),
        history_id: 10,
        expires_at: h.clock.now(),
    };

    let err = h.registry.upsert_watch(MAILBOX_ID, &registration).await.unwrap_err();

    assert!(matches!(err, MailPilotError::InvalidInput(_)));
}

#[tokio::test]
async fn lapsed_watch_is_not_active_but_keeps_its_cursor() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.advance(Duration::days(8));

    assert!(matches!(h.registry.get_active_watch(MAILBOX_ID).await, Err(MailPilotError::NotFound(_))));
    assert_eq!(h.registry.find_watch(MAILBOX_ID).await.unwrap().unwrap().history_cursor, 100);
}

#[tokio::test]
async fn cursor_never_moves_backwards() {
    let h = Harness::new();
    h.connect_at(100).await;

    assert_eq!(
        h.registry.advance_cursor(MAILBOX_ID, 105).await.unwrap(),
        CursorAdvance::Advanced { from: 100, to: 105 }
    );
    assert_eq!(h.registry.advance_cursor(MAILBOX_ID, 102).await.unwrap(), CursorAdvance::Stale { current: 105 });
    assert_eq!(h.registry.advance_cursor(MAILBOX_ID, 105).await.unwrap(), CursorAdvance::Unchanged { cursor: 105 });
    assert_eq!(h.watches.watch(MAILBOX_ID).unwrap().history_cursor, 105);
}

#[tokio::test]
async fn compare_and_advance_reports_the_winning_cursor() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.watches.force_cursor(MAILBOX_ID, 120);

    let lost = h.registry.compare_and_advance(MAILBOX_ID, 100, 110).await.unwrap();
    assert_eq!(lost, CursorAdvance::Stale { current: 120 });

    let same = h.registry.compare_and_advance(MAILBOX_ID, 100, 120).await.unwrap();
    assert_eq!(same, CursorAdvance::Unchanged { cursor: 120 });
}

#[tokio::test]
async fn renewal_sweep_is_idempotent() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.advance(Duration::days(6) + Duration::hours(1));

    let first = h.renewal().sweep().await.unwrap();
    assert!(matches!(first[0].outcome, RenewalOutcome::Renewed { .. }));
    let calls_after_first = h.mail.script.calls("start_watch");

    let second = h.renewal().sweep().await.unwrap();
    assert!(matches!(second[0].outcome, RenewalOutcome::AlreadyValid { .. }));
    assert_eq!(h.mail.script.calls("start_watch"), calls_after_first);
    assert_eq!(h.watches.watch(MAILBOX_ID).unwrap().history_cursor, 100);
}

#[tokio::test]
async fn renewal_creates_missing_watch() {
    let h = Harness::new();
    h.mail.set_watch_history_id(42);

    let outcome = h.renewal().renew(&mailbox()).await;

    assert!(matches!(outcome, RenewalOutcome::Renewed { .. }));
    assert_eq!(h.watches.watch(MAILBOX_ID).unwrap().history_cursor, 42);
}

#[tokio::test]
async fn repeated_renewal_failures_flag_the_mailbox() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.advance(Duration::days(7));
    h.mail.script.fail_times("start_watch", ProviderError::Transient("503".into()), 3);
    let renewal = h.renewal();

    for _ in 0..2 {
        assert!(matches!(renewal.renew(&mailbox()).await, RenewalOutcome::Failed { .. }));
        assert_eq!(h.registry.mailbox_status(MAILBOX_ID).await.unwrap(), MailboxStatus::Active);
    }
    assert!(matches!(renewal.renew(&mailbox()).await, RenewalOutcome::Failed { .. }));

    let state = h.registry.mailbox_state(MAILBOX_ID).await.unwrap();
    assert_eq!(state.status, MailboxStatus::NeedsReauth);
    assert_eq!(state.consecutive_failures, 3);
    assert_eq!(
        renewal.renew(&mailbox()).await,
        RenewalOutcome::Suspended { status: MailboxStatus::NeedsReauth }
    );
    assert_eq!(h.mail.script.calls("start_watch"), 4);
}

#[tokio::test]
async fn revoked_grant_flags_the_mailbox_on_first_renewal() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.advance(Duration::days(7));
    h.mail.script.fail_next("start_watch", ProviderError::Credential("invalid_grant".into()));

    let results = h.renewal().sweep().await.unwrap();

    assert_eq!(results[0].outcome, RenewalOutcome::Suspended { status: MailboxStatus::NeedsReauth });
    let state = h.registry.mailbox_state(MAILBOX_ID).await.unwrap();
    assert_eq!(state.status, MailboxStatus::NeedsReauth);
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.unwrap().contains("invalid_grant"));

    // Parked mailboxes are not retried by later sweeps.
    h.renewal().sweep().await.unwrap();
    assert_eq!(h.mail.script.calls("start_watch"), 2);
}

#[tokio::test]
async fn successful_renewal_clears_failure_count() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.advance(Duration::days(7));
    h.mail.script.fail_next("start_watch", ProviderError::Transient("503".into()));
    let renewal = h.renewal();

    renewal.renew(&mailbox()).await;
    assert_eq!(h.registry.mailbox_state(MAILBOX_ID).await.unwrap().consecutive_failures, 1);

    assert!(matches!(renewal.renew(&mailbox()).await, RenewalOutcome::Renewed { .. }));
    let state = h.registry.mailbox_state(MAILBOX_ID).await.unwrap();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_error.is_none());
}

#[tokio::test]
async fn disconnect_removes_watch_even_when_stop_fails() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.script.fail_next("stop_watch", ProviderError::Transient("503".into()));

    assert!(h.lifecycle().disconnect(MAILBOX_ID).await.unwrap());

    assert!(h.watches.watch(MAILBOX_ID).is_none());
    assert_eq!(h.registry.mailbox_status(MAILBOX_ID).await.unwrap(), MailboxStatus::Disconnected);
    assert_eq!(
        h.renewal().renew(&mailbox()).await,
        RenewalOutcome::Suspended { status: MailboxStatus::Disconnected }
    );
}

#[tokio::test]
async fn reconnect_recovers_a_mailbox_awaiting_reauth() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.registry.set_status(MAILBOX_ID, MailboxStatus::NeedsReauth, Some("revoked")).await.unwrap();

    h.lifecycle().connect(MAILBOX_ID).await.unwrap();

    let state = h.registry.mailbox_state(MAILBOX_ID).await.unwrap();
    assert_eq!(state.status, MailboxStatus::Active);
    assert_eq!(state.consecutive_failures, 0);
}

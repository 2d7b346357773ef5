//! Push intake, history resolution and notification dispatch

mod support;

use mailpilot_core::{Clock, HistoryCursorTracker, IgnoreReason, IntakeDecision, ResolutionSummary};
use mailpilot_domain::{HistoryResolution, JobStatus, MailboxStatus, Notification, ProviderError};
use support::fixtures::{fast_retry, mailbox, request_message, Harness, MAILBOX_ID};

fn notification(h: &Harness, history_id: u64) -> Notification {
    Notification { mailbox_id: MAILBOX_ID.to_string(), new_history_id: history_id, received_at: h.clock.now() }
}

#[tokio::test]
async fn intake_accepts_known_active_mailbox() {
    let h = Harness::new();
    h.connect_at(100).await;

    let decision = h.intake().accept("Owner@Corp.Example", 120).await.unwrap();

    let IntakeDecision::Accepted(accepted) = decision else { panic!("expected accepted, got {decision:?}") };
    assert_eq!(accepted.mailbox_id, MAILBOX_ID);
    assert_eq!(accepted.new_history_id, 120);
}

#[tokio::test]
async fn intake_ignores_unknown_and_inactive_mailboxes() {
    let h = Harness::new();
    h.connect_at(100).await;

    assert_eq!(
        h.intake().accept("stranger@else.example", 120).await.unwrap(),
        IntakeDecision::Ignored(IgnoreReason::UnknownMailbox)
    );

    h.registry.set_status(MAILBOX_ID, MailboxStatus::NeedsReauth, None).await.unwrap();
    assert_eq!(
        h.intake().accept(&mailbox().address, 120).await.unwrap(),
        IntakeDecision::Ignored(IgnoreReason::MailboxInactive { status: MailboxStatus::NeedsReauth })
    );
}

#[tokio::test]
async fn resolves_range_and_ignores_out_of_order_notifications() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.add_history(103, &["m-1"]);
    h.mail.add_history(105, &["m-2", "m-1"]);

    let first = h.tracker.resolve(&mailbox(), &notification(&h, 105)).await.unwrap();
    let HistoryResolution::Range(range) = first else { panic!("expected range, got {first:?}") };
    assert_eq!((range.from_history_id, range.to_history_id), (100, 105));
    assert_eq!(range.message_ids, vec!["m-1".to_string(), "m-2".to_string()]);

    let late = h.tracker.resolve(&mailbox(), &notification(&h, 102)).await.unwrap();
    assert_eq!(late, HistoryResolution::Empty { cursor: 105 });
    let duplicate = h.tracker.resolve(&mailbox(), &notification(&h, 105)).await.unwrap();
    assert_eq!(duplicate, HistoryResolution::Empty { cursor: 105 });
    assert_eq!(h.watches.watch(MAILBOX_ID).unwrap().history_cursor, 105);
}

#[tokio::test]
async fn range_stops_at_the_notified_history_id() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.add_history(103, &["m-1"]);
    h.mail.add_history(108, &["m-3"]);

    let first = h.tracker.resolve(&mailbox(), &notification(&h, 105)).await.unwrap();
    let HistoryResolution::Range(range) = first else { panic!("expected range, got {first:?}") };
    assert_eq!(range.message_ids, vec!["m-1".to_string()]);

    let next = h.tracker.resolve(&mailbox(), &notification(&h, 108)).await.unwrap();
    let HistoryResolution::Range(range) = next else { panic!("expected range, got {next:?}") };
    assert_eq!(range.from_history_id, 105);
    assert_eq!(range.message_ids, vec!["m-3".to_string()]);
}

#[tokio::test]
async fn follows_history_pages() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.set_page_size(1);
    for (id, message) in [(101, "m-1"), (102, "m-2"), (103, "m-3")] {
        h.mail.add_history(id, &[message]);
    }

    let resolution = h.tracker.resolve(&mailbox(), &notification(&h, 103)).await.unwrap();

    let HistoryResolution::Range(range) = resolution else { panic!("expected range, got {resolution:?}") };
    assert_eq!(range.message_ids.len(), 3);
    assert_eq!(h.mail.script.calls("list_history_since"), 3);
}

#[tokio::test]
async fn oversized_history_is_treated_as_expired() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.set_page_size(1);
    for id in 101..=104 {
        h.mail.add_history(id, &["m-x"]);
    }
    let tracker = HistoryCursorTracker::new(h.registry.clone(), h.mail.clone(), fast_retry()).with_max_pages(2);

    let resolution = tracker.resolve(&mailbox(), &notification(&h, 104)).await.unwrap();

    assert_eq!(resolution, HistoryResolution::Expired { cursor: 100 });
    assert_eq!(h.watches.watch(MAILBOX_ID).unwrap().history_cursor, 100);
}

#[tokio::test]
async fn processor_runs_pipeline_for_each_new_message() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.add_message(request_message("m-1"));
    h.mail.add_message(request_message("m-2"));
    h.mail.add_history(101, &["m-1"]);
    h.mail.add_history(102, &["m-2"]);

    let report = h.processor().process(&notification(&h, 102)).await.unwrap();

    assert_eq!(report.resolution, ResolutionSummary::Range { from: 100, to: 102 });
    assert_eq!(report.dispatched.len(), 2);
    for result in &report.dispatched {
        assert_eq!(result.outcome.as_ref().unwrap().job().status, JobStatus::Sent);
    }

    // Redelivery of the same push does nothing.
    let again = h.processor().process(&notification(&h, 102)).await.unwrap();
    assert_eq!(again.resolution, ResolutionSummary::Empty { cursor: 102 });
    assert_eq!(h.mail.delivered().len(), 2);
}

#[tokio::test]
async fn expired_cursor_triggers_bounded_resync() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.add_message(request_message("m-1"));
    let mut unrelated = request_message("m-2");
    unrelated.cc.clear();
    h.mail.add_message(unrelated);
    h.mail.set_current_history_id(500);
    h.mail.script.fail_next("list_history_since", ProviderError::CursorExpired("404".into()));

    let report = h.processor().process(&notification(&h, 480)).await.unwrap();

    assert_eq!(report.resolution, ResolutionSummary::Resynced { cursor: 500 });
    let ids: Vec<&str> = report.dispatched.iter().map(|r| r.message_id.as_str()).collect();
    assert_eq!(ids, vec!["m-1", "m-2"]);
    assert_eq!(report.dispatched[1].outcome.as_ref().unwrap().job().status, JobStatus::Skipped);
    assert_eq!(h.watches.watch(MAILBOX_ID).unwrap().history_cursor, 500);
    assert_eq!(h.registry.mailbox_status(MAILBOX_ID).await.unwrap(), MailboxStatus::Active);
}

#[tokio::test]
async fn rejected_credentials_during_resolution_flag_the_mailbox() {
    let h = Harness::new();
    h.connect_at(100).await;
    h.mail.script.fail_next("list_history_since", ProviderError::Credential("invalid_grant".into()));

    let report = h.processor().process(&notification(&h, 110)).await.unwrap();

    assert!(matches!(report.resolution, ResolutionSummary::Skipped { .. }));
    assert_eq!(h.registry.mailbox_status(MAILBOX_ID).await.unwrap(), MailboxStatus::NeedsReauth);
    assert_eq!(h.watches.watch(MAILBOX_ID).unwrap().history_cursor, 100);

    let parked = h.processor().process(&notification(&h, 110)).await.unwrap();
    assert!(matches!(parked.resolution, ResolutionSummary::Skipped { .. }));
    assert_eq!(h.mail.script.calls("list_history_since"), 1);
}

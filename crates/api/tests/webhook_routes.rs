//! Push webhook over the full router

mod support;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use mailpilot_domain::MailboxStatus;
use support::{push_body, TestApp, WEBHOOK_TOKEN};

#[tokio::test]
async fn queues_push_for_active_mailbox() {
    let app = TestApp::new();
    app.connect_mailbox("mbx-1", "ana@example.com").await;
    let capacity = app.ctx.queue.remaining_capacity();

    let (status, body) = app.push(WEBHOOK_TOKEN, "Ana@Example.com", 510).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    assert_eq!(app.ctx.queue.remaining_capacity(), capacity - 1);
    let snapshot = app.ctx.metrics.snapshot();
    assert_eq!(snapshot.notifications.received, 1);
    assert_eq!(snapshot.notifications.ignored, 0);
}

#[tokio::test]
async fn rejects_wrong_or_missing_token() {
    let app = TestApp::new();
    app.connect_mailbox("mbx-1", "ana@example.com").await;

    let (status, body) = app.push("guess", "ana@example.com", 510).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/gmail")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(push_body("ana@example.com", 510)))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.ctx.metrics.snapshot().notifications.received, 0);
}

#[tokio::test]
async fn accepts_any_caller_without_configured_token() {
    let app = TestApp::with_config(|config| config.server.webhook_token = None);
    app.connect_mailbox("mbx-1", "ana@example.com").await;

    let (status, _) = app.push("anything", "ana@example.com", 510).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn malformed_push_is_bad_request() {
    let app = TestApp::new();

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/webhooks/gmail?token={WEBHOOK_TOKEN}"))
        .body(Body::from(r#"{"message":{"data":"!!not-base64!!"}}"#))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_and_inactive_mailboxes_are_acknowledged_and_dropped() {
    let app = TestApp::new();
    app.connect_mailbox("mbx-1", "ana@example.com").await;
    app.ctx.registry.set_status("mbx-1", MailboxStatus::NeedsReauth, Some("token revoked")).await.unwrap();
    let capacity = app.ctx.queue.remaining_capacity();

    let (status, _) = app.push(WEBHOOK_TOKEN, "stranger@example.com", 42).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.push(WEBHOOK_TOKEN, "ana@example.com", 511).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(app.ctx.queue.remaining_capacity(), capacity);
    let snapshot = app.ctx.metrics.snapshot();
    assert_eq!(snapshot.notifications.received, 2);
    assert_eq!(snapshot.notifications.ignored, 2);
}

#[tokio::test]
async fn full_queue_asks_for_redelivery() {
    let app = TestApp::with_config(|config| config.server.intake_capacity = 1);
    app.connect_mailbox("mbx-1", "ana@example.com").await;

    let (first, _) = app.push(WEBHOOK_TOKEN, "ana@example.com", 510).await;
    let (second, body) = app.push(WEBHOOK_TOKEN, "ana@example.com", 511).await;

    assert_eq!(first, StatusCode::NO_CONTENT);
    assert_eq!(second, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(app.ctx.metrics.snapshot().notifications.rejected, 1);
}

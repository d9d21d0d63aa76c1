mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{TestApp, PASSWORD};
use serde_json::{json, Value};
use uuid::Uuid;

async fn register_unverified(app: &TestApp, email: &str) -> Uuid {
    let (status, body) = app
        .post(
            "/auth/register-org",
            None,
            json!({
                "organization_name": "Acme",
                "admin_email": email,
                "admin_name": "Admin",
                "password": PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body["user_id"].as_str().unwrap().parse().unwrap()
}

async fn send(app: &TestApp, user_id: Uuid, email: &str) -> (StatusCode, Value) {
    app.post(
        "/auth/email-verification/send",
        None,
        json!({ "user_id": user_id, "email": email }),
    )
    .await
}

#[tokio::test]
async fn test_resend_and_verify() {
    let app = TestApp::spawn();
    let user_id = register_unverified(&app, "admin@acme.test").await;
    let first = app.mailed_token("admin@acme.test");

    let (status, body) = send(&app, user_id, "admin@acme.test").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delivery"], "sent");
    let second = app.mailed_token("admin@acme.test");
    assert_ne!(first, second);

    let (status, _) = app
        .post("/auth/email-verification/verify", None, json!({ "token": second }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.login("admin@acme.test", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, user_id, "admin@acme.test").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn test_failed_delivery_is_reported() {
    let app = TestApp::spawn();
    let user_id = register_unverified(&app, "admin@acme.test").await;
    app.mail.set_failing(true);

    let (status, body) = send(&app, user_id, "admin@acme.test").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["delivery"], "failed");

    // The token is stored before delivery and stays redeemable
    let token = app.undelivered_token("admin@acme.test");
    let (status, _) = app
        .post("/auth/email-verification/verify", None, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.login("admin@acme.test", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_registration_with_failed_delivery_still_creates_org() {
    let app = TestApp::spawn();
    app.mail.set_failing(true);

    let (status, body) = app
        .post(
            "/auth/register-org",
            None,
            json!({
                "organization_name": "Acme",
                "admin_email": "admin@acme.test",
                "admin_name": "Admin",
                "password": PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["delivery"], "failed");

    app.mail.set_failing(false);
    let user_id: Uuid = body["user_id"].as_str().unwrap().parse().unwrap();
    let (status, _) = send(&app, user_id, "admin@acme.test").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_mismatched_email_is_not_found() {
    let app = TestApp::spawn();
    let user_id = register_unverified(&app, "admin@acme.test").await;

    let (status, body) = send(&app, user_id, "someone@acme.test").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    let (status, _) = send(&app, Uuid::new_v4(), "admin@acme.test").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bad_and_expired_tokens_rejected() {
    let app = TestApp::spawn();
    register_unverified(&app, "admin@acme.test").await;
    let token = app.mailed_token("admin@acme.test");

    let (status, body) = app
        .post(
            "/auth/email-verification/verify",
            None,
            json!({ "token": "not-a-token" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_token");

    app.clock.advance(Duration::hours(25));
    let (status, body) = app
        .post("/auth/email-verification/verify", None, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "token_expired");
}

#[tokio::test]
async fn test_verification_token_cannot_reset_password() {
    let app = TestApp::spawn();
    register_unverified(&app, "admin@acme.test").await;
    let token = app.mailed_token("admin@acme.test");

    let (status, _) = app
        .post(
            "/auth/password-reset/reset",
            None,
            json!({ "token": token, "new_password": "BrandNew42" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

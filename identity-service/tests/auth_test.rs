mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{TestApp, PASSWORD};
use serde_json::json;

#[tokio::test]
async fn test_register_login_and_me() {
    let app = TestApp::spawn();
    let (org_id, user_id) = app.register_org("Acme", "admin@acme.test").await;

    let tokens = app.login_tokens("admin@acme.test").await;

    let (status, me) = app.get("/auth/me", Some(&tokens.access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user_id.to_string());
    assert_eq!(me["organization_id"], org_id.to_string());
    assert_eq!(me["email"], "admin@acme.test");
    assert_eq!(me["role"], "admin");
    assert_eq!(me["email_verified"], true);
    assert!(me.get("password_hash").is_none());
    assert!(me["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "roles:manage"));
}

#[tokio::test]
async fn test_registration_sends_verification_email() {
    let app = TestApp::spawn();
    let (status, body) = app
        .post(
            "/auth/register-org",
            None,
            json!({
                "organization_name": "Acme",
                "admin_email": "Admin@Acme.test",
                "admin_name": "Admin",
                "password": PASSWORD,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["delivery"], "sent");

    let mail = app.mail.last_to("admin@acme.test").unwrap();
    assert!(mail.html.contains(&format!("{}/verify-email?token=", common::BASE_URL)));
}

#[tokio::test]
async fn test_duplicate_org_or_email_conflicts() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;

    let (status, body) = app
        .post(
            "/auth/register-org",
            None,
            json!({
                "organization_name": "Acme",
                "admin_email": "other@acme.test",
                "admin_name": "Other",
                "password": PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, _) = app
        .post(
            "/auth/register-org",
            None,
            json!({
                "organization_name": "Globex",
                "admin_email": "admin@acme.test",
                "admin_name": "Admin",
                "password": PASSWORD,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_weak_password_rejected_at_registration() {
    let app = TestApp::spawn();
    let (status, body) = app
        .post(
            "/auth/register-org",
            None,
            json!({
                "organization_name": "Acme",
                "admin_email": "admin@acme.test",
                "admin_name": "Admin",
                "password": "short",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation_error");
    assert!(app.mail.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_are_indistinguishable() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;

    let (status_a, body_a) = app.login("admin@acme.test", "Wrong1234").await;
    let (status_b, body_b) = app.login("ghost@acme.test", PASSWORD).await;

    assert_eq!(status_a, StatusCode::UNAUTHORIZED);
    assert_eq!(status_a, status_b);
    assert_eq!(body_a, body_b);
    assert_eq!(body_a["kind"], "invalid_credentials");
}

#[tokio::test]
async fn test_unverified_email_cannot_login() {
    let app = TestApp::spawn();
    app.post(
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

    let (status, body) = app.login("admin@acme.test", PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "email_not_verified");
}

#[tokio::test]
async fn test_login_records_session() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header("content-type", "application/json")
        .header("user-agent", "integration-suite/1.0")
        .header("x-forwarded-for", "203.0.113.7")
        .body(axum::body::Body::from(
            json!({ "email": "admin@acme.test", "password": PASSWORD }).to_string(),
        ))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    let tokens = common::tokens_from(&body);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);

    let (_, sessions) = app.get("/sessions", Some(&tokens.access)).await;
    let session = &sessions.as_array().unwrap()[0];
    assert_eq!(session["id"], tokens.session_id.to_string());
    assert_eq!(session["device_info"], "integration-suite/1.0");
    assert_eq!(session["ip_address"], "203.0.113.7");
    assert_eq!(session["status"], "active");
}

#[tokio::test]
async fn test_access_token_failures_have_distinct_kinds() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let tokens = app.login_tokens("admin@acme.test").await;

    let (status, body) = app.get("/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "invalid_token");

    let mut tampered = tokens.access.clone();
    tampered.push('x');
    let (status, body) = app.get("/auth/me", Some(&tampered)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "invalid_token");

    app.clock.advance(Duration::minutes(16));
    let (status, body) = app.get("/auth/me", Some(&tokens.access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "token_expired");
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let tokens = app.login_tokens("admin@acme.test").await;

    let (status, _) = app
        .request(axum::http::Method::POST, "/auth/logout", Some(&tokens.access), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post("/auth/refresh", None, json!({ "refresh_token": tokens.refresh }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "invalid_token");
}

#[tokio::test]
async fn test_suspended_user_cannot_login() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    let member = app.onboard(&admin.access, "member@acme.test", "user").await;

    let (_, me) = app.get("/auth/me", Some(&member.access)).await;
    let member_id = me["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .patch(
            &format!("/users/{}/status", member_id),
            Some(&admin.access),
            json!({ "status": "suspended" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.login("member@acme.test", PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "account_suspended");
}

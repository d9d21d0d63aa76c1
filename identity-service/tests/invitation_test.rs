mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{TestApp, PASSWORD};
use identity_service::services::CredentialStore;
use identity_service::utils::Password;
use serde_json::{json, Value};

async fn invite(app: &TestApp, bearer: &str, email: &str, role: &str) -> (StatusCode, Value) {
    let role_id = app.role_id(bearer, role).await;
    app.post(
        "/invites",
        Some(bearer),
        json!({ "email": email, "role_id": role_id }),
    )
    .await
}

async fn accept(app: &TestApp, token: &str) -> (StatusCode, Value) {
    app.post(
        "/invites/accept",
        None,
        json!({ "token": token, "name": "New Member", "password": PASSWORD }),
    )
    .await
}

#[tokio::test]
async fn test_invite_preview_accept_login() {
    let app = TestApp::spawn();
    let (org_id, admin_id) = app.register_org("Acme & Sons", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    let (status, body) = invite(&app, &admin.access, "New@Acme.test", "manager").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["delivery"], "sent");
    assert_eq!(body["invitation"]["email"], "new@acme.test");
    assert_eq!(body["invitation"]["invited_by"], admin_id.to_string());
    assert_eq!(body["invitation"]["status"], "pending");
    assert!(body.get("token").is_none());

    let mail = app.mail.last_to("new@acme.test").unwrap();
    assert!(mail.html.contains("Acme &amp; Sons"));
    let token = app.mailed_token("new@acme.test");

    let (status, preview) = app.get(&format!("/invites/preview/{}", token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["organization_name"], "Acme & Sons");
    assert_eq!(preview["role_name"], "manager");
    assert_eq!(preview["status"], "pending");

    let (status, accepted) = accept(&app, &token).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(accepted["user"]["organization_id"], org_id.to_string());
    assert_eq!(accepted["user"]["email_verified"], true);

    // Signed in straight away
    let access = accepted["tokens"]["access_token"].as_str().unwrap();
    let (_, me) = app.get("/auth/me", Some(access)).await;
    assert_eq!(me["role"], "manager");

    let (status, _) = app.login("new@acme.test", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    let (status, invites) = app.get("/invites", Some(&admin.access)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(invites.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_accept_is_single_use() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    invite(&app, &admin.access, "new@acme.test", "user").await;
    let token = app.mailed_token("new@acme.test");

    let (status, _) = accept(&app, &token).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = accept(&app, &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "already_used");
}

#[tokio::test]
async fn test_concurrent_accept_creates_one_user() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    invite(&app, &admin.access, "new@acme.test", "user").await;
    let token = app.mailed_token("new@acme.test");

    let attempts = (0..6).map(|_| {
        let invitations = app.state.invitations.clone();
        let token = token.clone();
        tokio::spawn(async move {
            invitations
                .accept(
                    &token,
                    "Racer",
                    &Password::new(PASSWORD.to_string()),
                )
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;
    let created = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(Result::is_ok)
        .count();
    assert_eq!(created, 1);

    let user = app
        .state
        .store
        .find_user_by_email("new@acme.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.name, "Racer");
}

#[tokio::test]
async fn test_expired_and_revoked_invites_cannot_be_accepted() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    invite(&app, &admin.access, "late@acme.test", "user").await;
    let late = app.mailed_token("late@acme.test");

    let (_, body) = invite(&app, &admin.access, "gone@acme.test", "user").await;
    let gone = app.mailed_token("gone@acme.test");
    let gone_id = body["invitation"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .delete(&format!("/invites/{}", gone_id), Some(&admin.access))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = accept(&app, &gone).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_token");

    let (status, _) = app
        .delete(&format!("/invites/{}", gone_id), Some(&admin.access))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.clock.advance(Duration::days(8));
    let (status, preview) = app.get(&format!("/invites/preview/{}", late), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["status"], "expired");

    let (status, body) = accept(&app, &late).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "token_expired");
}

#[tokio::test]
async fn test_invite_requires_permission_and_fresh_email() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    let member = app.onboard(&admin.access, "member@acme.test", "user").await;

    let role_id = app.role_id(&admin.access, "user").await;
    let (status, body) = app
        .post(
            "/invites",
            Some(&member.access),
            json!({ "email": "x@acme.test", "role_id": role_id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");

    let (status, _) = invite(&app, &admin.access, "member@acme.test", "user").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = invite(&app, &admin.access, "twice@acme.test", "user").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = invite(&app, &admin.access, "twice@acme.test", "user").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_accept_enforces_password_policy() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    invite(&app, &admin.access, "new@acme.test", "user").await;
    let token = app.mailed_token("new@acme.test");

    let (status, _) = app
        .post(
            "/invites/accept",
            None,
            json!({ "token": token, "name": "New", "password": "weak" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = accept(&app, &token).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_unknown_invite_token() {
    let app = TestApp::spawn();
    let (status, body) = app.get("/invites/preview/abc123", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_token");
}

#[tokio::test]
async fn test_failed_invite_delivery_reports_accepted() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    app.mail.set_failing(true);

    let (status, body) = invite(&app, &admin.access, "new@acme.test", "user").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["delivery"], "failed");

    let (_, invites) = app.get("/invites", Some(&admin.access)).await;
    assert_eq!(invites.as_array().unwrap().len(), 1);
}

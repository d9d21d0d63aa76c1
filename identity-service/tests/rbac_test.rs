mod common;

use axum::http::StatusCode;
use common::{TestApp, PASSWORD};
use serde_json::json;
use uuid::Uuid;

async fn user_id(app: &TestApp, bearer: &str) -> Uuid {
    let (_, me) = app.get("/auth/me", Some(bearer)).await;
    me["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_system_roles_are_seeded() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    let (status, roles) = app.get("/rbac/roles", Some(&admin.access)).await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<_> = roles
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, ["admin", "manager", "user"]);
    assert!(roles.as_array().unwrap().iter().all(|r| r["is_system"] == true));
}

#[tokio::test]
async fn test_role_crud() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    let (status, role) = app
        .post(
            "/rbac/roles",
            Some(&admin.access),
            json!({
                "name": "Auditor",
                "description": "Read only",
                "permissions": ["clients:read", "invoices:read"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(role["is_system"], false);
    let id = role["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(
            "/rbac/roles",
            Some(&admin.access),
            json!({ "name": "Auditor", "permissions": [] }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, updated) = app
        .patch(
            &format!("/rbac/roles/{}", id),
            Some(&admin.access),
            json!({ "permissions": ["clients:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["permissions"], json!(["clients:read"]));
    assert_eq!(updated["description"], "Read only");

    let (status, fetched) = app.get(&format!("/rbac/roles/{}", id), Some(&admin.access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["permissions"], json!(["clients:read"]));

    let (status, _) = app.delete(&format!("/rbac/roles/{}", id), Some(&admin.access)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&format!("/rbac/roles/{}", id), Some(&admin.access)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_permission_is_rejected() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    let (status, _) = app
        .post(
            "/rbac/roles",
            Some(&admin.access),
            json!({ "name": "Odd", "permissions": ["rockets:launch"] }),
        )
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_system_role_protection() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    let admin_role = app.role_id(&admin.access, "admin").await;
    let user_role = app.role_id(&admin.access, "user").await;

    let (status, _) = app
        .delete(&format!("/rbac/roles/{}", user_role), Some(&admin.access))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .patch(
            &format!("/rbac/roles/{}", user_role),
            Some(&admin.access),
            json!({ "name": "member" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .patch(
            &format!("/rbac/roles/{}", admin_role),
            Some(&admin.access),
            json!({ "permissions": ["clients:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Non-admin system roles may be re-scoped
    let (status, _) = app
        .patch(
            &format!("/rbac/roles/{}", user_role),
            Some(&admin.access),
            json!({ "permissions": ["clients:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_role_in_use_cannot_be_deleted() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    let (_, role) = app
        .post(
            "/rbac/roles",
            Some(&admin.access),
            json!({ "name": "billing", "permissions": ["invoices:read"] }),
        )
        .await;
    let role_id = role["id"].as_str().unwrap().to_string();

    let member = app.onboard(&admin.access, "member@acme.test", "billing").await;
    let (_, me) = app.get("/auth/me", Some(&member.access)).await;
    assert_eq!(me["permissions"], json!(["invoices:read"]));

    let (status, body) = app
        .delete(&format!("/rbac/roles/{}", role_id), Some(&admin.access))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");
}

#[tokio::test]
async fn test_assign_role_and_self_demotion() {
    let app = TestApp::spawn();
    let (_, admin_id) = app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    let member = app.onboard(&admin.access, "member@acme.test", "user").await;
    let member_id = user_id(&app, &member.access).await;
    let manager_role = app.role_id(&admin.access, "manager").await;

    let (status, user) = app
        .patch(
            &format!("/users/{}/role", member_id),
            Some(&admin.access),
            json!({ "role_id": manager_role }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["role_id"], manager_role.to_string());

    // Permissions are read live, the old token sees the new role
    let (_, me) = app.get("/auth/me", Some(&member.access)).await;
    assert_eq!(me["role"], "manager");

    let (status, _) = app
        .patch(
            &format!("/users/{}/role", admin_id),
            Some(&admin.access),
            json!({ "role_id": manager_role }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .patch(
            &format!("/users/{}/status", admin_id),
            Some(&admin.access),
            json!({ "status": "suspended" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_manager_cannot_escalate() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    let manager = app.onboard(&admin.access, "manager@acme.test", "manager").await;
    let member = app.onboard(&admin.access, "member@acme.test", "user").await;
    let member_id = user_id(&app, &member.access).await;
    let admin_role = app.role_id(&admin.access, "admin").await;

    let (status, _) = app
        .patch(
            &format!("/users/{}/role", member_id),
            Some(&manager.access),
            json!({ "role_id": admin_role }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/rbac/roles",
            Some(&manager.access),
            json!({ "name": "sneaky", "permissions": ["users:manage"] }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_manager_cannot_widen_own_role() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    let (status, ops) = app
        .post(
            "/rbac/roles",
            Some(&admin.access),
            json!({ "name": "ops", "permissions": ["roles:manage"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let ops_id = ops["id"].as_str().unwrap().to_string();
    let operator = app.onboard(&admin.access, "ops@acme.test", "ops").await;

    let (status, _) = app
        .patch(
            &format!("/rbac/roles/{}", ops_id),
            Some(&operator.access),
            json!({ "permissions": ["roles:manage", "users:manage", "api_keys:manage"] }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post(
            "/rbac/roles",
            Some(&operator.access),
            json!({ "name": "shadow", "permissions": ["users:manage"] }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, me) = app.get("/auth/me", Some(&operator.access)).await;
    assert_eq!(me["permissions"], json!(["roles:manage"]));
}

#[tokio::test]
async fn test_role_granted_by_pending_invite_cannot_be_deleted() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;

    let (_, role) = app
        .post(
            "/rbac/roles",
            Some(&admin.access),
            json!({ "name": "contractor", "permissions": ["clients:read"] }),
        )
        .await;
    let role_id = role["id"].as_str().unwrap().to_string();
    let (status, invite) = app
        .post(
            "/invites",
            Some(&admin.access),
            json!({ "email": "contractor@acme.test", "role_id": role_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .delete(&format!("/rbac/roles/{}", role_id), Some(&admin.access))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, _) = app
        .delete(
            &format!("/invites/{}", invite["invitation"]["id"].as_str().unwrap()),
            Some(&admin.access),
        )
        .await;
    assert!(status.is_success());

    let (status, _) = app
        .delete(&format!("/rbac/roles/{}", role_id), Some(&admin.access))
        .await;
    assert!(status.is_success());
}

#[tokio::test]
async fn test_suspend_and_reactivate_user() {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let admin = app.login_tokens("admin@acme.test").await;
    let member = app.onboard(&admin.access, "member@acme.test", "user").await;
    let member_id = user_id(&app, &member.access).await;

    let (status, user) = app
        .patch(
            &format!("/users/{}/status", member_id),
            Some(&admin.access),
            json!({ "status": "suspended" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["status"], "suspended");

    let (_, sessions) = app.get("/sessions/org", Some(&admin.access)).await;
    let member_session = sessions
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["id"] == member.session_id.to_string())
        .unwrap()
        .clone();
    assert_eq!(member_session["status"], "revoked");

    let (status, body) = app.get("/sessions/org", Some(&member.access)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "forbidden");

    let (status, _) = app
        .patch(
            &format!("/users/{}/status", member_id),
            Some(&admin.access),
            json!({ "status": "active" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.login("member@acme.test", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, Tokens};
use serde_json::json;
use uuid::Uuid;

struct TwoTenants {
    app: TestApp,
    acme: Tokens,
    globex: Tokens,
    globex_admin_id: Uuid,
}

async fn two_tenants() -> TwoTenants {
    let app = TestApp::spawn();
    app.register_org("Acme", "admin@acme.test").await;
    let (_, globex_admin_id) = app.register_org("Globex", "admin@globex.test").await;
    let acme = app.login_tokens("admin@acme.test").await;
    let globex = app.login_tokens("admin@globex.test").await;
    TwoTenants {
        app,
        acme,
        globex,
        globex_admin_id,
    }
}

#[tokio::test]
async fn test_roles_are_tenant_scoped() {
    let t = two_tenants().await;
    let globex_user_role = t.app.role_id(&t.globex.access, "user").await;

    let (_, acme_roles) = t.app.get("/rbac/roles", Some(&t.acme.access)).await;
    assert!(acme_roles
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["id"] != globex_user_role.to_string()));

    let uri = format!("/rbac/roles/{}", globex_user_role);
    let (status, _) = t.app.get(&uri, Some(&t.acme.access)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t
        .app
        .patch(&uri, Some(&t.acme.access), json!({ "description": "pwned" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.app.delete(&uri, Some(&t.acme.access)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cannot_manage_users_of_another_tenant() {
    let t = two_tenants().await;
    let acme_user_role = t.app.role_id(&t.acme.access, "user").await;

    let (status, _) = t
        .app
        .patch(
            &format!("/users/{}/role", t.globex_admin_id),
            Some(&t.acme.access),
            json!({ "role_id": acme_user_role }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .app
        .patch(
            &format!("/users/{}/status", t.globex_admin_id),
            Some(&t.acme.access),
            json!({ "status": "suspended" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.app.get("/auth/me", Some(&t.globex.access)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cannot_invite_with_foreign_role() {
    let t = two_tenants().await;
    let globex_user_role = t.app.role_id(&t.globex.access, "user").await;

    let (status, _) = t
        .app
        .post(
            "/invites",
            Some(&t.acme.access),
            json!({ "email": "spy@acme.test", "role_id": globex_user_role }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cannot_touch_foreign_sessions_or_invites() {
    let t = two_tenants().await;

    let (status, _) = t
        .app
        .request(
            Method::PATCH,
            &format!("/sessions/{}/revoke", t.globex.session_id),
            Some(&t.acme.access),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let globex_role = t.app.role_id(&t.globex.access, "user").await;
    let (_, body) = t
        .app
        .post(
            "/invites",
            Some(&t.globex.access),
            json!({ "email": "new@globex.test", "role_id": globex_role }),
        )
        .await;
    let invite_id = body["invitation"]["id"].as_str().unwrap();
    let (status, _) = t
        .app
        .delete(&format!("/invites/{}", invite_id), Some(&t.acme.access))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, acme_invites) = t.app.get("/invites", Some(&t.acme.access)).await;
    assert!(acme_invites.as_array().unwrap().is_empty());

    let (_, org_sessions) = t.app.get("/sessions/org", Some(&t.acme.access)).await;
    assert!(org_sessions
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["id"] != t.globex.session_id.to_string()));
}

#[tokio::test]
async fn test_cannot_revoke_foreign_api_key() {
    let t = two_tenants().await;
    let (status, body) = t
        .app
        .post(
            "/api-keys",
            Some(&t.globex.access),
            json!({ "name": "ci", "permissions": ["clients:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let key_id = body["key"]["id"].as_str().unwrap();

    let (status, _) = t
        .app
        .delete(&format!("/api-keys/{}", key_id), Some(&t.acme.access))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, keys) = t.app.get("/api-keys", Some(&t.acme.access)).await;
    assert!(keys.as_array().unwrap().is_empty());
}

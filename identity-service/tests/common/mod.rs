//! Shared harness for identity-service integration tests.
//!
//! Builds the full router over the in-memory store, a recording mail
//! transport, an HS256 signer and a manually driven clock, and drives it with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, IdentityConfig, JwtConfig, MfaConfig, ObservabilityConfig,
        RateLimitConfig, SecurityConfig, SmtpConfig, TokenConfig,
    },
    services::{InMemoryStore, MockClock, MockEmailService, PasswordPolicy},
    AppState,
};
use serde_json::{json, Value};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tower::ServiceExt;
use uuid::Uuid;

pub const PASSWORD: &str = "Password1";
pub const BASE_URL: &str = "https://app.example.test";

/// Aligned to a 30 second TOTP step.
pub const T0: i64 = 1_700_000_010;

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
        environment: Environment::Dev,
        service_name: "identity-service".to_string(),
        service_version: "test".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        jwt: JwtConfig {
            private_key_path: None,
            public_key_path: None,
            hmac_secret: Some("integration-test-secret".to_string()),
            issuer: "identity-test".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            mfa_challenge_expiry_minutes: 5,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            user: None,
            password: None,
            from: "no-reply@example.test".to_string(),
        },
        mfa: MfaConfig {
            issuer: "Identity Test".to_string(),
        },
        tokens: TokenConfig {
            password_reset_ttl_minutes: 60,
            email_verification_ttl_hours: 24,
            invite_ttl_days: 7,
        },
        password_policy: PasswordPolicy::default(),
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            public_base_url: BASE_URL.to_string(),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            mfa_attempts: 1000,
            mfa_window_seconds: 60,
            password_reset_attempts: 1000,
            password_reset_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        observability: ObservabilityConfig {
            log_level: "error".to_string(),
            otlp_endpoint: None,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub mail: MockEmailService,
    pub clock: Arc<MockClock>,
}

/// Tokens from a completed login.
#[derive(Debug, Clone)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
    pub session_id: Uuid,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: IdentityConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let mail = MockEmailService::new();
        let start = DateTime::<Utc>::from_timestamp(T0, 0).expect("valid timestamp");
        let clock = Arc::new(MockClock::new(start));

        let state = AppState::new(
            config,
            store.clone(),
            Arc::new(mail.clone()),
            clock.clone(),
        )
        .expect("Failed to build app state");
        let router = build_router(state.clone());

        Self {
            router,
            state,
            store,
            mail,
            clock,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, bearer, None).await
    }

    pub async fn post(&self, uri: &str, bearer: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, bearer, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, bearer: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, bearer, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, bearer, None).await
    }

    /// Raw token from the `token=` query parameter of the last link mailed to `to`.
    pub fn mailed_token(&self, to: &str) -> String {
        let mail = self
            .mail
            .last_to(to)
            .unwrap_or_else(|| panic!("no email sent to {}", to));
        token_in(&mail.html)
    }

    /// Token from the last message to `to` that the mailer failed to deliver.
    pub fn undelivered_token(&self, to: &str) -> String {
        let mail = self
            .mail
            .last_undelivered_to(to)
            .unwrap_or_else(|| panic!("no failed delivery to {}", to));
        token_in(&mail.html)
    }

    /// Registers an organization and verifies its admin's email.
    /// Returns `(organization_id, admin_user_id)`.
    pub async fn register_org(&self, organization: &str, admin_email: &str) -> (Uuid, Uuid) {
        let (status, body) = self
            .post(
                "/auth/register-org",
                None,
                json!({
                    "organization_name": organization,
                    "admin_email": admin_email,
                    "admin_name": "Admin",
                    "password": PASSWORD,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);

        let token = self.mailed_token(admin_email);
        let (status, _) = self
            .post("/auth/email-verification/verify", None, json!({ "token": token }))
            .await;
        assert_eq!(status, StatusCode::OK);

        (
            body["organization_id"].as_str().unwrap().parse().unwrap(),
            body["user_id"].as_str().unwrap().parse().unwrap(),
        )
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/auth/login",
            None,
            json!({ "email": email, "password": password }),
        )
        .await
    }

    /// Logs in an account without MFA and returns its tokens.
    pub async fn login_tokens(&self, email: &str) -> Tokens {
        let (status, body) = self.login(email, PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        assert_eq!(body["requires_mfa"], false);
        tokens_from(&body)
    }

    pub async fn role_id(&self, bearer: &str, name: &str) -> Uuid {
        let (status, body) = self.get("/rbac/roles", Some(bearer)).await;
        assert_eq!(status, StatusCode::OK);
        body.as_array()
            .unwrap()
            .iter()
            .find(|r| r["name"] == name)
            .and_then(|r| r["id"].as_str())
            .unwrap_or_else(|| panic!("role {} not found", name))
            .parse()
            .unwrap()
    }

    /// Invites `email` with the named role and accepts the invite, returning
    /// the tokens of the session acceptance opens.
    pub async fn onboard(&self, admin_bearer: &str, email: &str, role: &str) -> Tokens {
        let role_id = self.role_id(admin_bearer, role).await;
        let (status, body) = self
            .post(
                "/invites",
                Some(admin_bearer),
                json!({ "email": email, "role_id": role_id }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "invite failed: {}", body);

        let token = self.mailed_token(email);
        let (status, body) = self
            .post(
                "/invites/accept",
                None,
                json!({ "token": token, "name": "Member", "password": PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "accept failed: {}", body);

        tokens_from(&body["tokens"])
    }

    pub fn now(&self) -> DateTime<Utc> {
        use identity_service::services::Clock;
        self.clock.now()
    }
}

pub fn tokens_from(body: &Value) -> Tokens {
    Tokens {
        access: body["access_token"].as_str().unwrap().to_string(),
        refresh: body["refresh_token"].as_str().unwrap().to_string(),
        session_id: body["session_id"].as_str().unwrap().parse().unwrap(),
    }
}

/// TOTP code for a base32 secret at `at`.
pub fn totp_code(secret: &str, at: DateTime<Utc>) -> String {
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret.to_string()).to_bytes().unwrap(),
        Some("Identity Test".to_string()),
        "test".to_string(),
    )
    .unwrap();
    totp.generate(at.timestamp() as u64)
}

fn token_in(html: &str) -> String {
    let start = html.find("token=").expect("email carries a token link") + "token=".len();
    html[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect()
}

pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Json, Router,
};
use service_core::middleware::{
    rate_limit::{
        create_ip_rate_limiter, create_keyed_rate_limiter, ip_rate_limit_middleware,
        IpRateLimiter, KeyedRateLimiter,
    },
    security_headers::security_headers_middleware,
    tracing::{make_request_span, request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::IdentityConfig;
use crate::middleware::API_KEY_HEADER;
use crate::services::{
    ApiKeyService, AuthService, Clock, CredentialService, CredentialStore, EmailProvider,
    InvitationService, JwtService, MfaService, RbacService, ServiceError, SessionService,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::register_org,
        handlers::auth::login,
        handlers::auth::mfa_challenge,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::me,
        handlers::mfa::setup,
        handlers::mfa::verify,
        handlers::mfa::disable,
        handlers::credentials::request_password_reset,
        handlers::credentials::reset_password,
        handlers::credentials::send_verification,
        handlers::credentials::verify_email,
        handlers::invitation::create_invite,
        handlers::invitation::list_invites,
        handlers::invitation::revoke_invite,
        handlers::invitation::preview_invite,
        handlers::invitation::accept_invite,
        handlers::session::list_sessions,
        handlers::session::list_org_sessions,
        handlers::session::revoke_session,
        handlers::session::revoke_other_sessions,
        handlers::role::list_roles,
        handlers::role::get_role,
        handlers::role::create_role,
        handlers::role::update_role,
        handlers::role::delete_role,
        handlers::user::assign_role,
        handlers::user::set_status,
        handlers::api_key::create_api_key,
        handlers::api_key::list_api_keys,
        handlers::api_key::revoke_api_key,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::DeliveryResponse,
            dtos::auth::RegisterOrganizationRequest,
            dtos::auth::RegisterOrganizationResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::MfaChallengeRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::MfaCodeRequest,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::auth::SendVerificationRequest,
            dtos::auth::TokenRequest,
            dtos::auth::UserResponse,
            dtos::auth::MeResponse,
            dtos::admin::CreateInviteRequest,
            dtos::admin::CreateInviteResponse,
            dtos::admin::InviteResponse,
            dtos::admin::AcceptInviteRequest,
            dtos::admin::AcceptInviteResponse,
            dtos::admin::SessionResponse,
            dtos::admin::RevokeOthersResponse,
            dtos::admin::CreateRoleRequest,
            dtos::admin::UpdateRoleRequest,
            dtos::admin::RoleResponse,
            dtos::admin::AssignRoleRequest,
            dtos::admin::SetUserStatusRequest,
            dtos::admin::CreateApiKeyRequest,
            dtos::admin::CreateApiKeyResponse,
            dtos::admin::ApiKeyResponse,
            handlers::health::HealthResponse,
            models::Permission,
            models::UserStatus,
            models::InvitationStatus,
            services::TokenBundle,
            services::MfaEnrollment,
            services::InvitationPreview,
            services::Delivery,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, login, refresh and logout"),
        (name = "MFA", description = "TOTP enrollment and removal"),
        (name = "Credentials", description = "Password reset and email verification"),
        (name = "Invitations", description = "Invite-based onboarding"),
        (name = "Sessions", description = "Session listing and revocation"),
        (name = "Roles", description = "Organization roles and permissions"),
        (name = "Users", description = "User administration"),
        (name = "API Keys", description = "Machine credentials"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<IdentityConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub auth: AuthService,
    pub credentials: CredentialService,
    pub mfa: MfaService,
    pub sessions: SessionService,
    pub invitations: InvitationService,
    pub rbac: RbacService,
    pub api_keys: ApiKeyService,
    pub login_rate_limiter: IpRateLimiter,
    pub login_email_limiter: KeyedRateLimiter,
    pub mfa_rate_limiter: IpRateLimiter,
    pub password_reset_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

impl AppState {
    /// Wires every service over one store, email provider and clock.
    pub fn new(
        config: IdentityConfig,
        store: Arc<dyn CredentialStore>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let jwt = JwtService::from_config(&config.jwt, clock.clone())?;
        let public_base_url = config.security.public_base_url.clone();

        let rbac = RbacService::new(store.clone(), clock.clone());
        let credentials = CredentialService::new(
            store.clone(),
            email.clone(),
            clock.clone(),
            config.tokens.clone(),
            config.password_policy.clone(),
            public_base_url.clone(),
        );
        let mfa = MfaService::new(store.clone(), clock.clone(), config.mfa.issuer.clone());
        let sessions = SessionService::new(store.clone(), clock.clone(), rbac.clone());
        let invitations = InvitationService::new(
            store.clone(),
            email,
            clock.clone(),
            rbac.clone(),
            config.password_policy.clone(),
            config.tokens.invite_ttl_days,
            public_base_url,
        );
        let api_keys = ApiKeyService::new(store.clone(), clock.clone(), rbac.clone());
        let auth = AuthService::new(
            store.clone(),
            clock,
            jwt,
            credentials.clone(),
            mfa.clone(),
            sessions.clone(),
            rbac.clone(),
        );

        let limits = &config.rate_limit;
        let login_rate_limiter =
            create_ip_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let login_email_limiter =
            create_keyed_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let mfa_rate_limiter = create_ip_rate_limiter(limits.mfa_attempts, limits.mfa_window_seconds);
        let password_reset_rate_limiter = create_ip_rate_limiter(
            limits.password_reset_attempts,
            limits.password_reset_window_seconds,
        );
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);

        Ok(Self {
            config: Arc::new(config),
            store,
            auth,
            credentials,
            mfa,
            sessions,
            invitations,
            rbac,
            api_keys,
            login_rate_limiter,
            login_email_limiter,
            mfa_rate_limiter,
            password_reset_rate_limiter,
            ip_rate_limiter,
        })
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let mfa_challenge_route = Router::new()
        .route("/auth/mfa/challenge", post(handlers::auth::mfa_challenge))
        .layer(from_fn_with_state(
            state.mfa_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let email_dispatch_routes = Router::new()
        .route(
            "/auth/password-reset/request",
            post(handlers::credentials::request_password_reset),
        )
        .route(
            "/auth/email-verification/send",
            post(handlers::credentials::send_verification),
        )
        .layer(from_fn_with_state(
            state.password_reset_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/mfa/setup", post(handlers::mfa::setup))
        .route("/auth/mfa/verify", post(handlers::mfa::verify))
        .route("/auth/mfa/disable", post(handlers::mfa::disable))
        .route(
            "/invites",
            post(handlers::invitation::create_invite).get(handlers::invitation::list_invites),
        )
        .route("/invites/:id", delete(handlers::invitation::revoke_invite))
        .route("/sessions", get(handlers::session::list_sessions))
        .route("/sessions/org", get(handlers::session::list_org_sessions))
        .route("/sessions/:id/revoke", patch(handlers::session::revoke_session))
        .route(
            "/sessions/revoke-others",
            post(handlers::session::revoke_other_sessions),
        )
        .route(
            "/rbac/roles",
            get(handlers::role::list_roles).post(handlers::role::create_role),
        )
        .route(
            "/rbac/roles/:id",
            get(handlers::role::get_role)
                .patch(handlers::role::update_role)
                .delete(handlers::role::delete_role),
        )
        .route("/users/:id/role", patch(handlers::user::assign_role))
        .route("/users/:id/status", patch(handlers::user::set_status))
        .route(
            "/api-keys",
            get(handlers::api_key::list_api_keys).post(handlers::api_key::create_api_key),
        )
        .route("/api-keys/:id", delete(handlers::api_key::revoke_api_key))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new().route("/health", get(handlers::health::health_check));

    if state.config.is_prod() {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    } else {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    }

    app.route("/auth/register-org", post(handlers::auth::register_org))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route(
            "/auth/password-reset/reset",
            post(handlers::credentials::reset_password),
        )
        .route(
            "/auth/email-verification/verify",
            post(handlers::credentials::verify_email),
        )
        .route(
            "/invites/preview/:token",
            get(handlers::invitation::preview_invite),
        )
        .route("/invites/accept", post(handlers::invitation::accept_invite))
        .merge(login_route)
        .merge(mfa_challenge_route)
        .merge(email_dispatch_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

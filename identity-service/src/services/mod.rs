//! Services layer for the identity service.
//!
//! Business logic lives here and talks to persistence only through
//! [`CredentialStore`], so every flow runs the same against Postgres and the
//! in-memory store.

pub mod api_keys;
pub mod auth;
mod clock;
pub mod credentials;
mod database;
pub mod email;
pub mod error;
pub mod invitations;
pub mod jwt;
mod memory;
pub mod mfa;
pub mod policy;
pub mod rbac;
pub mod sessions;
pub mod store;

pub use api_keys::{ApiKeyService, CreatedApiKey, API_KEY_PREFIX};
pub use auth::{AuthService, LoginOutcome, RegisteredOrganization, TokenBundle};
pub use clock::{Clock, MockClock, SystemClock};
pub use credentials::CredentialService;
pub use database::Database;
pub use email::{Delivery, EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use invitations::{CreatedInvitation, InvitationPreview, InvitationService};
pub use jwt::{AccessTokenClaims, JwtService, RefreshTokenClaims};
pub use memory::InMemoryStore;
pub use mfa::{MfaEnrollment, MfaService};
pub use policy::PasswordPolicy;
pub use rbac::{Principal, RbacService, RoleUpdate};
pub use sessions::SessionService;
pub use store::{CredentialStore, RoleDeletion};

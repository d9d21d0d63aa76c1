pub mod api_key;
pub mod invitation;
pub mod one_time_token;
pub mod organization;
pub mod refresh_token;
pub mod role;
pub mod session;
pub mod user;

pub use api_key::{ApiKey, ApiKeyStatus};
pub use invitation::{Invitation, InvitationStatus};
pub use one_time_token::{OneTimeToken, TokenEffect, TokenPurpose};
pub use organization::{Organization, OrganizationStatus};
pub use refresh_token::RefreshToken;
pub use role::{Permission, Role, SystemRole};
pub use session::{Session, SessionStatus};
pub use user::{User, UserStatus};

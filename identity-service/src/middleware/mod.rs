pub mod auth;

pub use auth::{auth_middleware, AuthUser, API_KEY_HEADER};

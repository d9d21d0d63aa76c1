//! Refresh token record. The signed token itself is never stored; the row is
//! keyed by its `jti` and is the single-use ledger for rotation.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub expires_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(
        jti: Uuid,
        user_id: Uuid,
        session_id: Uuid,
        expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            jti,
            user_id,
            session_id,
            expires_utc,
            revoked_utc: None,
            created_utc: now,
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && now < self.expires_utc
    }
}

//! Session model - one record per successful login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Revoked,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Revoked => "revoked",
        }
    }
}

/// A session is a record of a login, not a capability. Only its status ever
/// changes after creation.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub login_utc: DateTime<Utc>,
    pub status: String,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        user_id: Uuid,
        organization_id: Uuid,
        device_info: Option<String>,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            organization_id,
            device_info,
            ip_address,
            login_utc: now,
            status: SessionStatus::Active.as_str().to_string(),
            revoked_utc: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active.as_str()
    }
}

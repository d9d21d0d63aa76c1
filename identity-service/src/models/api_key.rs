//! API key model - organization-scoped machine credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::Permission;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyStatus::Active => "active",
            ApiKeyStatus::Revoked => "revoked",
        }
    }
}

/// Only `key_hash` (SHA-256 of the key material) is persisted; `key_prefix`
/// lets an admin recognise a key without revealing it.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub permissions: BTreeSet<Permission>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub status: String,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn new(
        organization_id: Uuid,
        name: String,
        key_prefix: String,
        key_hash: String,
        permissions: BTreeSet<Permission>,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            key_prefix,
            key_hash,
            permissions,
            created_by,
            created_utc: now,
            last_used_utc: None,
            status: ApiKeyStatus::Active.as_str().to_string(),
            revoked_utc: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ApiKeyStatus::Active.as_str()
    }
}

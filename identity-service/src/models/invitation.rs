//! Invitation model - tenant-scoped, role-carrying onboarding tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Invitation status codes. `Expired` is never stored; it is derived from
/// `expires_utc` when a pending invite is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Revoked,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Revoked => "revoked",
            InvitationStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    /// Cleared when the role is deleted after the invitation settled
    pub role_id: Option<Uuid>,
    pub token_hash: String,
    pub invited_by: Uuid,
    pub sent_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub status: String,
    pub accepted_utc: Option<DateTime<Utc>>,
    pub accepted_user_id: Option<Uuid>,
}

impl Invitation {
    pub fn new(
        organization_id: Uuid,
        email: String,
        role_id: Uuid,
        token_hash: String,
        invited_by: Uuid,
        now: DateTime<Utc>,
        expires_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            email,
            role_id: Some(role_id),
            token_hash,
            invited_by,
            sent_utc: now,
            expires_utc,
            status: InvitationStatus::Pending.as_str().to_string(),
            accepted_utc: None,
            accepted_user_id: None,
        }
    }

    /// Status as observed at `now`, with expiry folded in.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        match self.status.as_str() {
            "accepted" => InvitationStatus::Accepted,
            "revoked" => InvitationStatus::Revoked,
            _ if now >= self.expires_utc => InvitationStatus::Expired,
            _ => InvitationStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invite(now: DateTime<Utc>) -> Invitation {
        Invitation::new(
            Uuid::new_v4(),
            "bob@x.com".to_string(),
            Uuid::new_v4(),
            "hash".to_string(),
            Uuid::new_v4(),
            now,
            now + Duration::days(7),
        )
    }

    #[test]
    fn expiry_is_computed_not_stored() {
        let now = Utc::now();
        let inv = invite(now);

        assert_eq!(inv.effective_status(now), InvitationStatus::Pending);
        assert_eq!(
            inv.effective_status(now + Duration::days(7)),
            InvitationStatus::Expired
        );
        assert_eq!(inv.status, "pending");
    }

    #[test]
    fn terminal_states_win_over_expiry() {
        let now = Utc::now();
        let mut inv = invite(now);
        inv.status = InvitationStatus::Accepted.as_str().to_string();

        assert_eq!(
            inv.effective_status(now + Duration::days(30)),
            InvitationStatus::Accepted
        );
    }
}

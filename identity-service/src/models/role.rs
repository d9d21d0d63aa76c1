//! Role model - organization-scoped named bundles of typed permissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Every action the platform gates. Serialised as `"resource:action"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Permission {
    #[serde(rename = "clients:read")]
    ClientsRead,
    #[serde(rename = "clients:write")]
    ClientsWrite,
    #[serde(rename = "disputes:read")]
    DisputesRead,
    #[serde(rename = "disputes:write")]
    DisputesWrite,
    #[serde(rename = "payments:read")]
    PaymentsRead,
    #[serde(rename = "payments:write")]
    PaymentsWrite,
    #[serde(rename = "invoices:read")]
    InvoicesRead,
    #[serde(rename = "invoices:write")]
    InvoicesWrite,
    #[serde(rename = "letters:manage")]
    LettersManage,
    #[serde(rename = "users:manage")]
    UsersManage,
    #[serde(rename = "invites:manage")]
    InvitesManage,
    #[serde(rename = "sessions:manage")]
    SessionsManage,
    #[serde(rename = "roles:manage")]
    RolesManage,
    #[serde(rename = "api_keys:manage")]
    ApiKeysManage,
    #[serde(rename = "organization:manage")]
    OrganizationManage,
}

impl Permission {
    pub const ALL: [Permission; 15] = [
        Permission::ClientsRead,
        Permission::ClientsWrite,
        Permission::DisputesRead,
        Permission::DisputesWrite,
        Permission::PaymentsRead,
        Permission::PaymentsWrite,
        Permission::InvoicesRead,
        Permission::InvoicesWrite,
        Permission::LettersManage,
        Permission::UsersManage,
        Permission::InvitesManage,
        Permission::SessionsManage,
        Permission::RolesManage,
        Permission::ApiKeysManage,
        Permission::OrganizationManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ClientsRead => "clients:read",
            Permission::ClientsWrite => "clients:write",
            Permission::DisputesRead => "disputes:read",
            Permission::DisputesWrite => "disputes:write",
            Permission::PaymentsRead => "payments:read",
            Permission::PaymentsWrite => "payments:write",
            Permission::InvoicesRead => "invoices:read",
            Permission::InvoicesWrite => "invoices:write",
            Permission::LettersManage => "letters:manage",
            Permission::UsersManage => "users:manage",
            Permission::InvitesManage => "invites:manage",
            Permission::SessionsManage => "sessions:manage",
            Permission::RolesManage => "roles:manage",
            Permission::ApiKeysManage => "api_keys:manage",
            Permission::OrganizationManage => "organization:manage",
        }
    }

    /// Parses stored permission strings, dropping ones this build no longer knows.
    pub fn parse_set<I, S>(raw: I) -> BTreeSet<Permission>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .filter_map(|s| match s.as_ref().parse() {
                Ok(p) => Some(p),
                Err(_) => {
                    tracing::warn!(permission = %s.as_ref(), "Ignoring unknown stored permission");
                    None
                }
            })
            .collect()
    }

    pub fn to_strings(set: &BTreeSet<Permission>) -> Vec<String> {
        set.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown permission: {}", s))
    }
}

/// The three roles seeded into every organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemRole {
    Admin,
    Manager,
    User,
}

impl SystemRole {
    pub const ALL: [SystemRole; 3] = [SystemRole::Admin, SystemRole::Manager, SystemRole::User];

    pub fn name(&self) -> &'static str {
        match self {
            SystemRole::Admin => "admin",
            SystemRole::Manager => "manager",
            SystemRole::User => "user",
        }
    }

    pub fn default_permissions(&self) -> BTreeSet<Permission> {
        use Permission::*;
        match self {
            SystemRole::Admin => Permission::ALL.into_iter().collect(),
            SystemRole::Manager => [
                ClientsRead,
                ClientsWrite,
                DisputesRead,
                DisputesWrite,
                PaymentsRead,
                PaymentsWrite,
                InvoicesRead,
                InvoicesWrite,
                LettersManage,
            ]
            .into_iter()
            .collect(),
            SystemRole::User => [ClientsRead, DisputesRead, DisputesWrite, PaymentsRead, InvoicesRead]
                .into_iter()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: BTreeSet<Permission>,
    pub is_system: bool,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(
        organization_id: Uuid,
        name: String,
        description: Option<String>,
        permissions: BTreeSet<Permission>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name,
            description,
            permissions,
            is_system: false,
            created_utc: now,
        }
    }

    pub fn system(organization_id: Uuid, kind: SystemRole, now: DateTime<Utc>) -> Self {
        Self {
            is_system: true,
            ..Role::new(
                organization_id,
                kind.name().to_string(),
                None,
                kind.default_permissions(),
                now,
            )
        }
    }
}

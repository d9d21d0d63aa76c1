//! Organization-scoped role-based access control.
//!
//! Every check compares organizations first and only then looks at roles, so a
//! principal from another tenant is refused before any permission data is read.

use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Permission, Role, SystemRole, User, UserStatus};
use crate::services::store::RoleDeletion;
use crate::services::{Clock, CredentialStore, ServiceError};

/// Authenticated caller, as resolved by the gateway.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    /// Role name at issue time; display only
    pub role: String,
    pub session_id: Option<Uuid>,
    pub api_key: Option<ApiKeyGrant>,
}

/// Machine principal details. `user_id` of such a principal is the key's creator.
#[derive(Debug, Clone)]
pub struct ApiKeyGrant {
    pub key_id: Uuid,
    pub permissions: BTreeSet<Permission>,
}

impl Principal {
    pub fn is_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Rejects machine principals on endpoints that act on a human account.
    pub fn require_user(&self) -> Result<(), ServiceError> {
        if self.is_api_key() {
            return Err(ServiceError::Forbidden(
                "This operation requires a user session".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial role update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<BTreeSet<Permission>>,
}

#[derive(Clone)]
pub struct RbacService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl RbacService {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The three system roles every organization starts with.
    pub fn seed_roles(&self, organization_id: Uuid) -> Vec<Role> {
        let now = self.clock.now();
        SystemRole::ALL
            .iter()
            .map(|kind| Role::system(organization_id, *kind, now))
            .collect()
    }

    // ==================== Authorization ====================

    /// Permissions the principal holds right now, read from the store.
    pub async fn effective_permissions(
        &self,
        principal: &Principal,
    ) -> Result<BTreeSet<Permission>, ServiceError> {
        if let Some(grant) = &principal.api_key {
            return Ok(grant.permissions.clone());
        }

        let Some(user) = self.store.find_user(principal.user_id).await? else {
            return Ok(BTreeSet::new());
        };
        if user.organization_id != principal.organization_id {
            return Ok(BTreeSet::new());
        }
        self.user_permissions(&user).await
    }

    /// What `user`'s current role grants. Empty for suspended users.
    pub async fn user_permissions(
        &self,
        user: &User,
    ) -> Result<BTreeSet<Permission>, ServiceError> {
        if !user.is_active() {
            return Ok(BTreeSet::new());
        }
        Ok(self
            .current_role(user)
            .await?
            .map(|role| role.permissions)
            .unwrap_or_default())
    }

    async fn current_role(&self, user: &User) -> Result<Option<Role>, ServiceError> {
        Ok(self
            .store
            .find_role(user.role_id)
            .await?
            .filter(|role| role.organization_id == user.organization_id))
    }

    /// `Forbidden` unless the principal holds every permission in `granted`.
    async fn ensure_can_grant(
        &self,
        principal: &Principal,
        granted: &BTreeSet<Permission>,
        action: &str,
    ) -> Result<(), ServiceError> {
        let held = self.effective_permissions(principal).await?;
        if held.is_superset(granted) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "Cannot {} with permissions you do not hold",
                action
            )))
        }
    }

    pub async fn authorize(
        &self,
        principal: &Principal,
        organization_id: Uuid,
        permission: Permission,
    ) -> Result<bool, ServiceError> {
        if principal.organization_id != organization_id {
            return Ok(false);
        }
        Ok(self
            .effective_permissions(principal)
            .await?
            .contains(&permission))
    }

    /// `Forbidden` unless the principal holds `permission` in its own organization.
    pub async fn require(
        &self,
        principal: &Principal,
        permission: Permission,
    ) -> Result<(), ServiceError> {
        self.require_in(principal, principal.organization_id, permission)
            .await
    }

    /// `Forbidden` on tenant mismatch, then on missing permission.
    pub async fn require_in(
        &self,
        principal: &Principal,
        organization_id: Uuid,
        permission: Permission,
    ) -> Result<(), ServiceError> {
        ensure_same_tenant(principal, organization_id)?;
        if self.authorize(principal, organization_id, permission).await? {
            Ok(())
        } else {
            tracing::debug!(
                user_id = %principal.user_id,
                permission = %permission,
                "Permission denied"
            );
            Err(ServiceError::Forbidden(format!(
                "Missing permission {}",
                permission
            )))
        }
    }

    // ==================== Roles ====================

    pub async fn list_roles(&self, principal: &Principal) -> Result<Vec<Role>, ServiceError> {
        self.store.list_roles(principal.organization_id).await
    }

    pub async fn get_role(&self, principal: &Principal, role_id: Uuid) -> Result<Role, ServiceError> {
        let role = self.load_role(role_id).await?;
        ensure_same_tenant(principal, role.organization_id)?;
        Ok(role)
    }

    #[tracing::instrument(skip(self, principal, description, permissions), fields(organization_id = %principal.organization_id))]
    pub async fn create_role(
        &self,
        principal: &Principal,
        name: &str,
        description: Option<String>,
        permissions: BTreeSet<Permission>,
    ) -> Result<Role, ServiceError> {
        self.require(principal, Permission::RolesManage).await?;
        self.ensure_can_grant(principal, &permissions, "create a role")
            .await?;

        let name = normalize_role_name(name)?;
        let role = Role::new(
            principal.organization_id,
            name,
            description,
            permissions,
            self.clock.now(),
        );
        self.store.insert_role(&role).await?;

        tracing::info!(role_id = %role.id, "Role created");
        Ok(role)
    }

    #[tracing::instrument(skip(self, principal, update), fields(organization_id = %principal.organization_id))]
    pub async fn update_role(
        &self,
        principal: &Principal,
        role_id: Uuid,
        update: RoleUpdate,
    ) -> Result<Role, ServiceError> {
        let mut role = self.load_role(role_id).await?;
        ensure_same_tenant(principal, role.organization_id)?;
        self.require(principal, Permission::RolesManage).await?;
        self.ensure_not_own_role(principal, &role).await?;

        if let Some(name) = update.name {
            let name = normalize_role_name(&name)?;
            if role.is_system && name != role.name {
                return Err(ServiceError::Forbidden(
                    "System roles cannot be renamed".to_string(),
                ));
            }
            role.name = name;
        }

        if let Some(permissions) = update.permissions {
            if role.is_system && role.name == SystemRole::Admin.name() && permissions != role.permissions
            {
                return Err(ServiceError::Forbidden(
                    "The admin role's permissions cannot be changed".to_string(),
                ));
            }
            self.ensure_can_grant(principal, &permissions, "update a role")
                .await?;
            role.permissions = permissions;
        }

        if update.description.is_some() {
            role.description = update.description;
        }

        self.store.update_role(&role).await?;
        tracing::info!(role_id = %role.id, "Role updated");
        Ok(role)
    }

    /// Fails with `Conflict` while any user holds the role or a pending invitation grants it.
    #[tracing::instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn delete_role(&self, principal: &Principal, role_id: Uuid) -> Result<(), ServiceError> {
        let role = self.load_role(role_id).await?;
        ensure_same_tenant(principal, role.organization_id)?;
        self.require(principal, Permission::RolesManage).await?;

        if role.is_system {
            return Err(ServiceError::Forbidden(
                "System roles cannot be deleted".to_string(),
            ));
        }

        match self.store.delete_role_if_unassigned(role_id).await? {
            RoleDeletion::Deleted => {
                tracing::info!(role_id = %role_id, "Role deleted");
                Ok(())
            }
            RoleDeletion::InUse(count) => Err(ServiceError::Conflict(format!(
                "Role is assigned to {} user(s)",
                count
            ))),
            RoleDeletion::Invited(count) => Err(ServiceError::Conflict(format!(
                "Role is granted by {} pending invitation(s)",
                count
            ))),
            RoleDeletion::NotFound => Err(ServiceError::NotFound("Role not found".to_string())),
        }
    }

    // ==================== User administration ====================

    /// The actor may only hand out roles whose permissions it holds itself.
    #[tracing::instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn assign_role(
        &self,
        principal: &Principal,
        user_id: Uuid,
        role_id: Uuid,
    ) -> Result<User, ServiceError> {
        let target = self.load_user(user_id).await?;
        ensure_same_tenant(principal, target.organization_id)?;
        self.require(principal, Permission::UsersManage).await?;
        ensure_not_self(principal, user_id, "change your own role")?;

        let role = self.load_role(role_id).await?;
        if role.organization_id != target.organization_id {
            return Err(ServiceError::NotFound("Role not found".to_string()));
        }

        self.ensure_can_grant(principal, &role.permissions, "assign a role")
            .await?;

        self.store.set_user_role(user_id, role_id).await?;
        tracing::info!(user_id = %user_id, role_id = %role_id, "Role assigned");
        self.load_user(user_id).await
    }

    /// Suspending a user also revokes all of their sessions.
    #[tracing::instrument(skip(self, principal), fields(organization_id = %principal.organization_id))]
    pub async fn set_user_status(
        &self,
        principal: &Principal,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<User, ServiceError> {
        let target = self.load_user(user_id).await?;
        ensure_same_tenant(principal, target.organization_id)?;
        self.require(principal, Permission::UsersManage).await?;
        ensure_not_self(principal, user_id, "change your own status")?;

        self.store.set_user_status(user_id, status).await?;
        if status == UserStatus::Suspended {
            let revoked = self
                .store
                .revoke_user_sessions(user_id, self.clock.now())
                .await?;
            tracing::info!(user_id = %user_id, revoked_sessions = revoked, "User suspended");
        } else {
            tracing::info!(user_id = %user_id, status = status.as_str(), "User status changed");
        }
        self.load_user(user_id).await
    }

    /// Only admins may edit the role they hold themselves.
    async fn ensure_not_own_role(
        &self,
        principal: &Principal,
        role: &Role,
    ) -> Result<(), ServiceError> {
        if principal.is_api_key() {
            return Ok(());
        }
        let Some(actor) = self.store.find_user(principal.user_id).await? else {
            return Err(ServiceError::Forbidden("Unknown actor".to_string()));
        };
        if actor.role_id != role.id {
            return Ok(());
        }
        let is_admin = self
            .current_role(&actor)
            .await?
            .is_some_and(|r| r.is_system && r.name == SystemRole::Admin.name());
        if is_admin {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "Cannot change the role you hold".to_string(),
            ))
        }
    }

    async fn load_role(&self, role_id: Uuid) -> Result<Role, ServiceError> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Role not found".to_string()))
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }
}

pub(crate) fn ensure_same_tenant(
    principal: &Principal,
    organization_id: Uuid,
) -> Result<(), ServiceError> {
    if principal.organization_id != organization_id {
        tracing::warn!(
            user_id = %principal.user_id,
            organization_id = %principal.organization_id,
            target_organization_id = %organization_id,
            "Cross-organization access denied"
        );
        return Err(ServiceError::Forbidden(
            "Resource belongs to another organization".to_string(),
        ));
    }
    Ok(())
}

fn ensure_not_self(principal: &Principal, user_id: Uuid, action: &str) -> Result<(), ServiceError> {
    if !principal.is_api_key() && principal.user_id == user_id {
        return Err(ServiceError::Forbidden(format!("You cannot {}", action)));
    }
    Ok(())
}

fn normalize_role_name(name: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() || name.len() > 64 {
        return Err(ServiceError::Validation(
            "Role name must be between 1 and 64 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

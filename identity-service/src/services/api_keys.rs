//! Organization-scoped API keys for machine callers.

use std::collections::BTreeSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::models::{ApiKey, Permission};
use crate::services::rbac::{ensure_same_tenant, ApiKeyGrant, Principal, RbacService};
use crate::services::{Clock, CredentialStore, ServiceError};
use crate::utils::{generate_random_token, hash_token};

pub const API_KEY_PREFIX: &str = "idk_";
const DISPLAY_PREFIX_LEN: usize = API_KEY_PREFIX.len() + 8;

/// Key record plus the material, which is only ever returned here.
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    pub key: ApiKey,
    pub material: String,
}

#[derive(Clone)]
pub struct ApiKeyService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    rbac: RbacService,
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, rbac: RbacService) -> Self {
        Self { store, clock, rbac }
    }

    /// Keys are minted by users only, and never with more than the creator holds.
    #[tracing::instrument(skip(self, principal, permissions), fields(organization_id = %principal.organization_id))]
    pub async fn create(
        &self,
        principal: &Principal,
        name: &str,
        permissions: BTreeSet<Permission>,
    ) -> Result<CreatedApiKey, ServiceError> {
        principal.require_user()?;
        self.rbac
            .require(principal, Permission::ApiKeysManage)
            .await?;

        let held = self.rbac.effective_permissions(principal).await?;
        if !held.is_superset(&permissions) {
            return Err(ServiceError::Forbidden(
                "Cannot grant permissions you do not hold".to_string(),
            ));
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("Key name is required".to_string()));
        }

        let material = format!("{}{}", API_KEY_PREFIX, generate_random_token());
        let key = ApiKey::new(
            principal.organization_id,
            name.to_string(),
            material[..DISPLAY_PREFIX_LEN].to_string(),
            hash_token(&material),
            permissions,
            principal.user_id,
            self.clock.now(),
        );
        self.store.insert_api_key(&key).await?;

        tracing::info!(api_key_id = %key.id, "API key created");
        Ok(CreatedApiKey { key, material })
    }

    pub async fn list(&self, principal: &Principal) -> Result<Vec<ApiKey>, ServiceError> {
        self.rbac
            .require(principal, Permission::ApiKeysManage)
            .await?;
        self.store.list_api_keys(principal.organization_id).await
    }

    /// Terminal and idempotent.
    pub async fn revoke(&self, principal: &Principal, key_id: Uuid) -> Result<ApiKey, ServiceError> {
        let key = self.load(key_id).await?;
        ensure_same_tenant(principal, key.organization_id)?;
        self.rbac
            .require(principal, Permission::ApiKeysManage)
            .await?;

        self.store.revoke_api_key(key_id, self.clock.now()).await?;
        tracing::info!(api_key_id = %key_id, "API key revoked");
        self.load(key_id).await
    }

    /// Resolves presented key material into a machine principal.
    ///
    /// The grant is re-bounded by what the creator currently holds, so a
    /// suspended or demoted creator takes their keys down with them.
    pub async fn authenticate(&self, material: &str) -> Result<Principal, ServiceError> {
        if !material.starts_with(API_KEY_PREFIX) {
            return Err(ServiceError::InvalidToken);
        }

        let digest = hash_token(material);
        let key = self
            .store
            .find_api_key_by_hash(&digest)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        if !bool::from(key.key_hash.as_bytes().ct_eq(digest.as_bytes())) || !key.is_active() {
            return Err(ServiceError::InvalidToken);
        }

        let organization = self
            .store
            .find_organization(key.organization_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !organization.is_active() {
            return Err(ServiceError::AccountSuspended);
        }

        let creator = self
            .store
            .find_user(key.created_by)
            .await?
            .filter(|user| user.organization_id == key.organization_id)
            .ok_or(ServiceError::InvalidToken)?;
        if !creator.is_active() {
            return Err(ServiceError::AccountSuspended);
        }
        let held = self.rbac.user_permissions(&creator).await?;
        let permissions = key.permissions.intersection(&held).copied().collect();

        self.store.touch_api_key(key.id, self.clock.now()).await?;

        Ok(Principal {
            user_id: key.created_by,
            organization_id: key.organization_id,
            role: "api_key".to_string(),
            session_id: None,
            api_key: Some(ApiKeyGrant {
                key_id: key.id,
                permissions,
            }),
        })
    }

    async fn load(&self, key_id: Uuid) -> Result<ApiKey, ServiceError> {
        self.store
            .find_api_key(key_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("API key not found".to_string()))
    }
}

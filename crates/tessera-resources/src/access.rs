//! Who is acting and what they may do

use std::collections::HashSet;

use async_trait::async_trait;

use tessera_core::ResourceType;

/// The user on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: u64,
    pub user_name: String,
    pub tenant: String,
    pub is_admin: bool,
}

impl Actor {
    /// A regular user confined to their tenant
    pub fn user(user_id: u64, user_name: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            tenant: tenant.into(),
            is_admin: false,
        }
    }

    /// An administrator who may address any tenant
    pub fn admin(user_id: u64, user_name: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(user_id, user_name, tenant)
        }
    }

    /// Whether this actor may touch resources owned by `tenant`
    pub fn may_access(&self, tenant: &str) -> bool {
        self.is_admin || self.tenant == tenant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOperation {
    View,
    CreateDirectory,
    Upload,
    Edit,
    Rename,
    Delete,
    Download,
}

/// Yes/no capability check consulted before every operation
#[async_trait]
pub trait PermissionCheck: Send + Sync {
    async fn can_operate(
        &self,
        actor: &Actor,
        operation: ResourceOperation,
        resource_type: ResourceType,
    ) -> bool;
}

/// Grants everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PermissionCheck for AllowAll {
    async fn can_operate(&self, _: &Actor, _: ResourceOperation, _: ResourceType) -> bool {
        true
    }
}

/// Grants a fixed set of operations to non-admins; admins may do anything
#[derive(Debug, Default, Clone)]
pub struct StaticPermissions {
    allowed: HashSet<ResourceOperation>,
}

impl StaticPermissions {
    pub fn new(allowed: impl IntoIterator<Item = ResourceOperation>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn read_only() -> Self {
        Self::new([ResourceOperation::View, ResourceOperation::Download])
    }
}

#[async_trait]
impl PermissionCheck for StaticPermissions {
    async fn can_operate(
        &self,
        actor: &Actor,
        operation: ResourceOperation,
        _resource_type: ResourceType,
    ) -> bool {
        actor.is_admin || self.allowed.contains(&operation)
    }
}

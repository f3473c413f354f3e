//! Directory size bookkeeping

use async_trait::async_trait;
use dashmap::DashMap;
use tessera_core::ResourceType;
use tessera_core::path::ancestor_dirs;
use tracing::trace;

use crate::error::ResourceError;

/// External record of directory sizes
///
/// Only directories the store knows about are tracked; everything else is
/// skipped during propagation.
#[async_trait]
pub trait DirectorySizeStore: Send + Sync {
    /// Recorded size of a directory, `None` when untracked
    async fn size(
        &self,
        full_name: &str,
        resource_type: ResourceType,
    ) -> Result<Option<u64>, ResourceError>;

    async fn set_size(
        &self,
        full_name: &str,
        resource_type: ResourceType,
        size: u64,
    ) -> Result<(), ResourceError>;

    /// Stop tracking a directory
    async fn forget(&self, full_name: &str, resource_type: ResourceType)
    -> Result<(), ResourceError>;
}

/// Add `delta` to every tracked ancestor of `full_name`, never going below zero
///
/// Returns the number of directories updated.
pub async fn propagate_size(
    store: &dyn DirectorySizeStore,
    full_name: &str,
    resource_type: ResourceType,
    delta: i64,
) -> Result<usize, ResourceError> {
    if delta == 0 {
        return Ok(0);
    }

    let mut updated = 0;
    for dir in ancestor_dirs(full_name) {
        let Some(current) = store.size(&dir, resource_type).await? else {
            continue;
        };
        let next = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta.unsigned_abs())
        };
        store.set_size(&dir, resource_type, next).await?;
        trace!(dir = %dir, from = current, to = next, "directory size updated");
        updated += 1;
    }
    Ok(updated)
}

/// Directory sizes held in memory
#[derive(Default)]
pub struct InMemoryDirectorySizeStore {
    sizes: DashMap<(ResourceType, String), u64>,
}

impl InMemoryDirectorySizeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `full_name` at `size`
    pub fn track(&self, full_name: &str, resource_type: ResourceType, size: u64) {
        self.sizes
            .insert((resource_type, full_name.to_string()), size);
    }

    pub fn get(&self, full_name: &str, resource_type: ResourceType) -> Option<u64> {
        self.sizes
            .get(&(resource_type, full_name.to_string()))
            .map(|size| *size)
    }
}

#[async_trait]
impl DirectorySizeStore for InMemoryDirectorySizeStore {
    async fn size(
        &self,
        full_name: &str,
        resource_type: ResourceType,
    ) -> Result<Option<u64>, ResourceError> {
        Ok(self.get(full_name, resource_type))
    }

    async fn set_size(
        &self,
        full_name: &str,
        resource_type: ResourceType,
        size: u64,
    ) -> Result<(), ResourceError> {
        self.track(full_name, resource_type, size);
        Ok(())
    }

    async fn forget(
        &self,
        full_name: &str,
        resource_type: ResourceType,
    ) -> Result<(), ResourceError> {
        self.sizes.remove(&(resource_type, full_name.to_string()));
        Ok(())
    }
}

//! Storage backends for Tessera
//!
//! One hierarchical namespace over three very different stores.
//!
//! # Features
//!
//! - **Object store**: flat keys, directories simulated with `dir/` marker
//!   objects, paginated prefix listings ([`object::ObjectStoreBackend`])
//! - **Distributed filesystem**: native directories and renames
//!   ([`dfs::DfsBackend`])
//! - **Local disk**: a root directory on the host ([`local::LocalBackend`])
//! - **Configuration**: TOML-driven variant selection with a fail-fast
//!   reachability check ([`config::open_backend`])
//!
//! # Example
//!
//! ```ignore
//! use tessera_storage::{StorageBackend, config::{StorageConfig, open_backend}};
//!
//! let config = StorageConfig::load("tessera.toml")?;
//! let backend = open_backend(&config).await?;
//! let root = backend.resolver().resource_root("t1");
//! let tree = backend.list_recursive(&root, &root, "t1", ResourceType::File).await?;
//! backend.shutdown().await?;
//! ```

pub mod config;
pub mod dfs;
pub mod local;
pub mod object;

pub use config::{BackendConfig, ConfigError, StorageConfig, open_backend};
pub use dfs::{DfsBackend, DfsClient, InMemoryDfsClient};
pub use local::LocalBackend;
pub use object::{
    InMemoryObjectClient, ObjectClient, ObjectStoreBackend, ObjectStoreSettings, S3ObjectClient,
};

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use tessera_core::{PathResolver, ResourceType, StorageEntity, StorageError, StorageKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Uniform file/directory operations over one physical store
///
/// Keys follow the layout of [`PathResolver`]: directory keys end with `/`,
/// file keys never do. Implementations are shared across concurrent callers
/// and hold no per-call state.
///
/// # Errors
///
/// Write-class operations (`mkdir`, `upload`, `delete`, `delete_batch`,
/// `copy`) log a failed remote call and return `Ok(false)`. `Err` is reserved
/// for missing keys on reads, local I/O failures and a released client
/// ([`StorageError::ShutDown`]).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which family of store this is
    fn storage_kind(&self) -> StorageKind;

    /// Path layout used for tenant roots
    fn resolver(&self) -> &PathResolver;

    /// Whether directories can be renamed in one native call
    ///
    /// Object stores cannot: copying a directory key moves only its marker.
    fn supports_native_rename(&self) -> bool {
        self.storage_kind() != StorageKind::ObjectStore
    }

    /// Whether `key` exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Create the directory `dir_path` (idempotent)
    async fn mkdir(&self, tenant: &str, dir_path: &str) -> Result<bool, StorageError>;

    /// Store the content of `local_path` under `remote_key`
    async fn upload(
        &self,
        tenant: &str,
        local_path: &Path,
        remote_key: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError>;

    /// Write the object at `remote_key` to `local_path`, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the key does not exist.
    async fn download(
        &self,
        tenant: &str,
        remote_key: &str,
        local_path: &Path,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<(), StorageError>;

    /// Remove `key`; `recursive` on a directory removes everything below it
    async fn delete(&self, key: &str, recursive: bool) -> Result<bool, StorageError>;

    /// Remove every key in `keys`
    ///
    /// The result is all-or-nothing from the caller's view: `false` if any
    /// key could not be removed.
    async fn delete_batch(&self, keys: &[String]) -> Result<bool, StorageError>;

    /// Copy `src` to `dst`, removing `src` afterwards when `delete_source`
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError>;

    /// Every key under `prefix`, following pagination to the end
    async fn list_keys_under_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Immediate children of `path`
    ///
    /// `default_path` is the tenant root used to compute each entity's
    /// relative `file_name`.
    async fn list_one_level(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<StorageEntity>, StorageError>;

    /// [`StorageBackend::list_one_level`] that gives up once `cancel` fires
    ///
    /// Paginated variants check the token before every page request.
    async fn list_one_level_until(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
        cancel: &CancellationToken,
    ) -> Result<Vec<StorageEntity>, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled(path.to_string()));
        }
        self.list_one_level(path, default_path, tenant, resource_type)
            .await
    }

    /// [`StorageBackend::list_keys_under_prefix`] that gives up once `cancel` fires
    async fn list_keys_under_prefix_until(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled(prefix.to_string()));
        }
        self.list_keys_under_prefix(prefix).await
    }

    /// Every descendant of `path`, parents before children
    async fn list_recursive(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<StorageEntity>, StorageError> {
        self.list_recursive_until(path, default_path, tenant, resource_type, &CancellationToken::new())
            .await
    }

    /// Breadth-first recursive listing that stops when `cancel` fires
    ///
    /// The whole subtree is collected in memory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] if the token is cancelled before
    /// the walk completes.
    async fn list_recursive_until(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
        cancel: &CancellationToken,
    ) -> Result<Vec<StorageEntity>, StorageError> {
        let mut entities = Vec::new();
        let mut pending = VecDeque::from([path.to_string()]);

        while let Some(dir) = pending.pop_front() {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled(path.to_string()));
            }
            let level = self
                .list_one_level_until(&dir, default_path, tenant, resource_type, cancel)
                .await?;
            for entity in level {
                if entity.is_directory && entity.full_name.len() > dir.len() {
                    pending.push_back(entity.full_name.clone());
                }
                entities.push(entity);
            }
        }

        debug!(path, count = entities.len(), "recursive listing complete");
        Ok(entities)
    }

    /// Entity for a single path
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if nothing exists at `path`.
    async fn get_status(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<StorageEntity, StorageError>;

    /// Up to `limit` lines of a text object after skipping `skip` lines
    async fn read_lines(
        &self,
        key: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<String>, StorageError>;

    /// Make sure the tenant's resource and UDF roots exist
    async fn create_tenant_dirs(&self, tenant: &str) -> Result<bool, StorageError> {
        let resource_root = self.resolver().resource_root(tenant);
        let udf_root = self.resolver().udf_root(tenant);
        let resources = self.mkdir(tenant, &resource_root).await?;
        let udfs = self.mkdir(tenant, &udf_root).await?;
        Ok(resources && udfs)
    }

    /// Remove both tenant roots and everything below them
    async fn delete_tenant(&self, tenant: &str) -> Result<bool, StorageError> {
        let resource_root = self.resolver().resource_root(tenant);
        let udf_root = self.resolver().udf_root(tenant);
        let resources = self.delete(&resource_root, true).await?;
        let udfs = self.delete(&udf_root, true).await?;
        Ok(resources && udfs)
    }

    /// Release the underlying client
    ///
    /// Every later call fails with [`StorageError::ShutDown`].
    async fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Turn a write-class result into the logged boolean outcome
pub(crate) fn write_outcome(
    operation: &'static str,
    key: &str,
    result: Result<(), StorageError>,
) -> Result<bool, StorageError> {
    match result {
        Ok(()) => Ok(true),
        Err(StorageError::ShutDown) => Err(StorageError::ShutDown),
        Err(e) => {
            error!(operation, key, error = %e, "storage write failed");
            Ok(false)
        }
    }
}

/// Lines `skip..skip + limit` of `text`
pub(crate) fn lines_window(text: &str, skip: usize, limit: usize) -> Vec<String> {
    text.lines()
        .skip(skip)
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// Create parent directories of a download target and clear what is in the way
pub(crate) async fn prepare_download_target(
    local_path: &Path,
    overwrite: bool,
) -> Result<(), StorageError> {
    if let Some(parent) = local_path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::metadata(local_path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(local_path).await?,
        Ok(_) if !overwrite => {
            return Err(StorageError::Io(format!(
                "{} already exists",
                local_path.display()
            )));
        }
        _ => {}
    }
    Ok(())
}

//! Resource consistency guard
//!
//! Mediates every mutating call against a [`StorageBackend`] and keeps the
//! external bookkeeping (reference index, directory sizes) in line with it.
//!
//! Deletion runs in four phases:
//!
//! ```text
//! Discover  list_recursive(target)            -> key set
//! Check     blocking_references(key set)      -> refuse if non-empty
//! Commit    delete_batch(key set)             -> storage changed
//! Scrub     sizes + reference index follow-up -> PartialCommit on failure
//! ```
//!
//! Nothing is deleted unless the check passes. Failures after the commit are
//! logged and reported, never retried.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_core::path::{
    ancestor_dirs, as_directory, file_alias, is_directory_key, is_traversal, parent_dir,
};
use tessera_core::{
    EntityTreeBuilder, ProgramType, ResourceNode, ResourceType, StorageEntity, StorageError,
};
use tessera_storage::StorageBackend;
use tracing::{debug, error, info, instrument, warn};

use crate::access::{Actor, AllowAll, PermissionCheck, ResourceOperation};
use crate::error::ResourceError;
use crate::page::PageInfo;
use crate::reference::ReferenceIndex;
use crate::size::{DirectorySizeStore, propagate_size};

/// Longest accepted full name
pub const DEFAULT_MAX_FULL_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub max_full_name_len: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_full_name_len: DEFAULT_MAX_FULL_NAME_LEN,
        }
    }
}

/// Outcome of a committed delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub target: String,
    /// Every key removed, target first
    pub deleted_keys: Vec<String>,
    /// Sum of the sizes of deleted files
    pub released_bytes: u64,
    /// Task definitions rewritten to drop the deleted paths
    pub scrubbed_tasks: usize,
}

/// Enforces name uniqueness, referential integrity on delete, rename
/// semantics and directory size bookkeeping on top of a storage backend
pub struct ResourceConsistencyGuard {
    backend: Arc<dyn StorageBackend>,
    references: Arc<dyn ReferenceIndex>,
    sizes: Arc<dyn DirectorySizeStore>,
    permissions: Arc<dyn PermissionCheck>,
    config: GuardConfig,
}

impl ResourceConsistencyGuard {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        references: Arc<dyn ReferenceIndex>,
        sizes: Arc<dyn DirectorySizeStore>,
    ) -> Self {
        Self {
            backend,
            references,
            sizes,
            permissions: Arc::new(AllowAll),
            config: GuardConfig::default(),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionCheck>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create directory `name` below `current_dir` (or the tenant root)
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant))]
    pub async fn create_directory(
        &self,
        actor: &Actor,
        name: &str,
        resource_type: ResourceType,
        current_dir: &str,
    ) -> Result<StorageEntity, ResourceError> {
        self.authorize(actor, ResourceOperation::CreateDirectory, resource_type)
            .await?;
        let tenant = actor.tenant.as_str();
        let full_name = as_directory(
            &self
                .target_name(tenant, resource_type, name, current_dir)
                .await?,
        );
        self.check_length(&full_name)?;
        self.ensure_unique(&full_name).await?;
        self.ensure_tenant_dirs(tenant).await?;

        if !self.backend.mkdir(tenant, &full_name).await? {
            return Err(ResourceError::failed("mkdir", full_name));
        }
        info!(full_name = %full_name, "created directory");

        self.after_commit(1, "track directory size", async {
            self.sizes.set_size(&full_name, resource_type, 0).await
        })
        .await?;
        self.lookup(&full_name, tenant, resource_type).await
    }

    /// Upload `local_file` as resource `name` below `current_dir`
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant))]
    pub async fn create_resource(
        &self,
        actor: &Actor,
        name: &str,
        resource_type: ResourceType,
        local_file: &Path,
        current_dir: &str,
    ) -> Result<StorageEntity, ResourceError> {
        self.authorize(actor, ResourceOperation::Upload, resource_type)
            .await?;
        let tenant = actor.tenant.as_str();
        let full_name = self
            .target_name(tenant, resource_type, name, current_dir)
            .await?;
        self.check_length(&full_name)?;
        self.ensure_unique(&full_name).await?;
        self.ensure_tenant_dirs(tenant).await?;

        let size = tokio::fs::metadata(local_file)
            .await
            .map_err(StorageError::from)?
            .len();
        if !self
            .backend
            .upload(tenant, local_file, &full_name, false, true)
            .await?
        {
            return Err(ResourceError::failed("upload", full_name));
        }
        info!(full_name = %full_name, size, "uploaded resource");

        self.after_commit(1, "propagate size", async {
            propagate_size(self.sizes.as_ref(), &full_name, resource_type, to_delta(size)).await
        })
        .await?;
        self.lookup(&full_name, tenant, resource_type).await
    }

    /// Create resource `file_name.suffix` from text content
    pub async fn create_resource_from_content(
        &self,
        actor: &Actor,
        file_name: &str,
        suffix: &str,
        content: &str,
        resource_type: ResourceType,
        current_dir: &str,
    ) -> Result<StorageEntity, ResourceError> {
        let name = if suffix.is_empty() {
            file_name.to_string()
        } else {
            format!("{file_name}.{suffix}")
        };
        let staged = stage_content(content).await?;
        self.create_resource(actor, &name, resource_type, staged.path(), current_dir)
            .await
    }

    /// Write `content` to the file at `file_path` below the tenant's resource root
    ///
    /// Missing directories along the path are created one level at a time.
    /// An existing file has its content replaced.
    #[instrument(skip(self, actor, content), fields(tenant = %actor.tenant))]
    pub async fn create_or_update(
        &self,
        actor: &Actor,
        file_path: &str,
        content: &str,
    ) -> Result<StorageEntity, ResourceError> {
        let resource_type = ResourceType::File;
        let relative = file_path.trim_start_matches('/');
        let alias = file_alias(relative);
        if is_traversal(relative) || !alias.contains('.') || alias.ends_with('.') {
            return Err(ResourceError::InvalidName(format!(
                "{file_path} needs a file name with a suffix"
            )));
        }
        let root = self.root(&actor.tenant, resource_type);
        let full_name = format!("{root}{relative}");
        if self.backend.exists(&full_name).await? {
            return self
                .update_content(actor, &full_name, content, resource_type)
                .await;
        }

        let mut current = root;
        for segment in parent_dir(relative).split('/').filter(|s| !s.is_empty()) {
            let next = format!("{current}{segment}/");
            if !self.backend.exists(&next).await? {
                self.create_directory(actor, segment, resource_type, &current)
                    .await?;
            }
            current = next;
        }
        self.create_resource_from_content(actor, alias, "", content, resource_type, &current)
            .await
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Replace the content of an existing file resource
    #[instrument(skip(self, actor, content), fields(tenant = %actor.tenant))]
    pub async fn update_content(
        &self,
        actor: &Actor,
        full_name: &str,
        content: &str,
        resource_type: ResourceType,
    ) -> Result<StorageEntity, ResourceError> {
        self.authorize(actor, ResourceOperation::Edit, resource_type)
            .await?;
        let tenant = self.owner_of(actor, full_name)?;
        let current = self.lookup(full_name, &tenant, resource_type).await?;
        if current.is_directory {
            return Err(ResourceError::InvalidName(format!(
                "{full_name} is a directory"
            )));
        }

        let staged = stage_content(content).await?;
        if !self
            .backend
            .upload(&tenant, staged.path(), full_name, false, true)
            .await?
        {
            return Err(ResourceError::failed("upload", full_name));
        }

        let delta = to_delta(content.len() as u64) - to_delta(current.size);
        self.after_commit(1, "propagate size", async {
            propagate_size(self.sizes.as_ref(), full_name, resource_type, delta).await
        })
        .await?;
        debug!(full_name, delta, "updated resource content");
        self.lookup(full_name, &tenant, resource_type).await
    }

    /// Rename a resource and optionally replace its content
    ///
    /// A rename is copy-then-delete on the backend followed by a path rewrite
    /// in the reference index. Backends without native rename refuse to move
    /// directories.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant))]
    pub async fn update_resource(
        &self,
        actor: &Actor,
        full_name: &str,
        new_name: &str,
        resource_type: ResourceType,
        replacement: Option<&Path>,
    ) -> Result<StorageEntity, ResourceError> {
        let operation = if replacement.is_some() {
            ResourceOperation::Upload
        } else {
            ResourceOperation::Rename
        };
        self.authorize(actor, operation, resource_type).await?;
        let tenant = self.owner_of(actor, full_name)?;
        let current = self.lookup(full_name, &tenant, resource_type).await?;

        let new_name = validate_name(new_name)?;
        if new_name.trim_end_matches('/').contains('/') {
            return Err(ResourceError::InvalidName(format!(
                "{new_name} must not contain a separator"
            )));
        }
        let mut new_full_name = format!("{}{}", parent_dir(&current.full_name), new_name);
        if current.is_directory {
            new_full_name = as_directory(&new_full_name);
        }
        let renamed = new_full_name != current.full_name;

        if current.is_directory {
            if replacement.is_some() {
                return Err(ResourceError::InvalidName(format!(
                    "{full_name} is a directory and cannot take file content"
                )));
            }
            if renamed && !self.backend.supports_native_rename() {
                return Err(ResourceError::DirectoryRenameUnsupported(
                    current.full_name.clone(),
                ));
            }
        }
        if !renamed && replacement.is_none() {
            return Ok(current);
        }
        if renamed {
            self.check_length(&new_full_name)?;
            self.ensure_unique(&new_full_name).await?;
        }

        match replacement {
            Some(file) => {
                let size = tokio::fs::metadata(file)
                    .await
                    .map_err(StorageError::from)?
                    .len();
                if !self
                    .backend
                    .upload(&tenant, file, &new_full_name, false, true)
                    .await?
                {
                    return Err(ResourceError::failed("upload", new_full_name));
                }
                if renamed && !self.backend.delete(&current.full_name, false).await? {
                    return Err(ResourceError::failed("delete", current.full_name));
                }
                let delta = to_delta(size) - to_delta(current.size);
                self.after_commit(1, "propagate size", async {
                    propagate_size(self.sizes.as_ref(), &new_full_name, resource_type, delta).await
                })
                .await?;
            }
            None => {
                if !self
                    .backend
                    .copy(&current.full_name, &new_full_name, true, true)
                    .await?
                {
                    return Err(ResourceError::failed("copy", current.full_name));
                }
            }
        }

        if renamed {
            let rewritten = self
                .after_commit(1, "rewrite references", async {
                    self.references
                        .rewrite_path(&current.full_name, &new_full_name, resource_type)
                        .await
                })
                .await?;
            info!(from = %current.full_name, to = %new_full_name, rewritten, "renamed resource");
        }
        self.lookup(&new_full_name, &tenant, resource_type).await
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a file, or a directory with everything below it
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::ReferentialIntegrity`] without touching
    /// storage if any affected key is still referenced, and
    /// [`ResourceError::PartialCommit`] if storage was changed but the
    /// bookkeeping that follows failed.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant))]
    pub async fn delete(
        &self,
        actor: &Actor,
        full_name: &str,
        resource_type: ResourceType,
    ) -> Result<DeleteReport, ResourceError> {
        self.authorize(actor, ResourceOperation::Delete, resource_type)
            .await?;
        let tenant = self.owner_of(actor, full_name)?;
        let root = self.root(&tenant, resource_type);
        let target = self.lookup(full_name, &tenant, resource_type).await?;
        if target.full_name == root {
            return Err(ResourceError::InvalidName(format!(
                "{root} is a tenant root"
            )));
        }

        // Discover
        let mut entities = vec![target.clone()];
        if target.is_directory {
            entities.extend(
                self.backend
                    .list_recursive(&target.full_name, &root, &tenant, resource_type)
                    .await?,
            );
        }
        let keys: Vec<String> = entities.iter().map(|e| e.full_name.clone()).collect();
        let released_bytes: u64 = entities
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.size)
            .sum();

        // Check
        let references = self
            .references
            .blocking_references(&keys, resource_type)
            .await?;
        if !references.is_empty() {
            warn!(
                resource = %target.full_name,
                references = references.len(),
                "delete refused, resource still referenced"
            );
            return Err(ResourceError::ReferentialIntegrity {
                target: target.full_name,
                references,
            });
        }

        // Commit
        if !self.backend.delete_batch(&keys).await? {
            return Err(ResourceError::failed("delete_batch", target.full_name));
        }
        info!(resource = %target.full_name, keys = keys.len(), released_bytes, "deleted resources");

        // Scrub
        let committed = keys.len();
        self.after_commit(committed, "update directory sizes", async {
            for dir in entities.iter().filter(|e| e.is_directory) {
                self.sizes.forget(&dir.full_name, resource_type).await?;
            }
            propagate_size(
                self.sizes.as_ref(),
                &target.full_name,
                resource_type,
                -to_delta(released_bytes),
            )
            .await
        })
        .await?;
        let scrubbed_tasks = self
            .after_commit(committed, "scrub references", async {
                self.references.scrub(&keys, resource_type).await
            })
            .await?;

        Ok(DeleteReport {
            target: target.full_name,
            deleted_keys: keys,
            released_bytes,
            scrubbed_tasks,
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fail with [`ResourceError::NameConflict`] if `full_name` is taken
    pub async fn verify_name(
        &self,
        actor: &Actor,
        full_name: &str,
        resource_type: ResourceType,
    ) -> Result<(), ResourceError> {
        self.authorize(actor, ResourceOperation::View, resource_type)
            .await?;
        self.owner_of(actor, full_name)?;
        self.ensure_unique(full_name).await
    }

    /// Entity of `file_name` relative to the tenant root
    pub async fn status(
        &self,
        actor: &Actor,
        tenant: &str,
        resource_type: ResourceType,
        file_name: &str,
    ) -> Result<StorageEntity, ResourceError> {
        self.authorize(actor, ResourceOperation::View, resource_type)
            .await?;
        check_tenant(actor, tenant)?;
        let full_name = self
            .backend
            .resolver()
            .file_name(resource_type, tenant, file_name);
        self.lookup(&full_name, tenant, resource_type).await
    }

    /// One page of the immediate children of `full_name` (or the tenant root)
    ///
    /// `search` keeps entries whose relative file name contains it.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_page(
        &self,
        actor: &Actor,
        tenant: &str,
        resource_type: ResourceType,
        full_name: Option<&str>,
        search: Option<&str>,
        page_no: usize,
        page_size: usize,
    ) -> Result<PageInfo<StorageEntity>, ResourceError> {
        self.authorize(actor, ResourceOperation::View, resource_type)
            .await?;
        check_tenant(actor, tenant)?;
        let root = self.root(tenant, resource_type);
        let dir = self.scoped_dir(&root, full_name)?;

        let entities = self
            .backend
            .list_one_level(&dir, &root, tenant, resource_type)
            .await?;
        Ok(PageInfo::slice(
            filter_search(entities, search),
            page_no,
            page_size,
        ))
    }

    /// One page across the roots of several tenants; administrators only
    pub async fn list_page_all_tenants(
        &self,
        actor: &Actor,
        tenants: &[String],
        resource_type: ResourceType,
        search: Option<&str>,
        page_no: usize,
        page_size: usize,
    ) -> Result<PageInfo<StorageEntity>, ResourceError> {
        if !actor.is_admin {
            return Err(ResourceError::PermissionDenied(format!(
                "{} may not list other tenants",
                actor.user_name
            )));
        }
        self.authorize(actor, ResourceOperation::View, resource_type)
            .await?;

        let mut entities = Vec::new();
        for tenant in tenants {
            let root = self.root(tenant, resource_type);
            entities.extend(
                self.backend
                    .list_one_level(&root, &root, tenant, resource_type)
                    .await?,
            );
        }
        Ok(PageInfo::slice(
            filter_search(entities, search),
            page_no,
            page_size,
        ))
    }

    /// Full tree below `full_name` (or the tenant root)
    pub async fn list_tree(
        &self,
        actor: &Actor,
        tenant: &str,
        resource_type: ResourceType,
        full_name: Option<&str>,
    ) -> Result<ResourceNode, ResourceError> {
        self.authorize(actor, ResourceOperation::View, resource_type)
            .await?;
        check_tenant(actor, tenant)?;
        let root = self.root(tenant, resource_type);
        let dir = self.scoped_dir(&root, full_name)?;

        let entities = self
            .backend
            .list_recursive(&dir, &root, tenant, resource_type)
            .await?;
        Ok(EntityTreeBuilder::new(&entities).build(&dir))
    }

    /// Tree of the resources a `program_type` task can load
    ///
    /// Keeps files with the program's suffix and the directories leading to
    /// them.
    pub async fn query_by_program_type(
        &self,
        actor: &Actor,
        tenant: &str,
        resource_type: ResourceType,
        program_type: ProgramType,
    ) -> Result<ResourceNode, ResourceError> {
        self.authorize(actor, ResourceOperation::View, resource_type)
            .await?;
        check_tenant(actor, tenant)?;
        let root = self.root(tenant, resource_type);
        let suffix = program_type.resource_suffix();
        let loadable = |e: &StorageEntity| e.suffix().is_some_and(|s| s.eq_ignore_ascii_case(suffix));

        let entities = self
            .backend
            .list_recursive(&root, &root, tenant, resource_type)
            .await?;
        let wanted_dirs: HashSet<String> = entities
            .iter()
            .filter(|e| loadable(*e))
            .flat_map(|e| ancestor_dirs(&e.full_name))
            .collect();
        let kept: Vec<StorageEntity> = entities
            .into_iter()
            .filter(|e| {
                if e.is_directory {
                    wanted_dirs.contains(&e.full_name)
                } else {
                    loadable(e)
                }
            })
            .collect();
        debug!(?program_type, suffix, kept = kept.len(), "filtered resources by program type");
        Ok(EntityTreeBuilder::new(&kept).build(&root))
    }

    /// Lines `skip..skip + limit` of a text resource
    pub async fn read_lines(
        &self,
        actor: &Actor,
        full_name: &str,
        resource_type: ResourceType,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<String>, ResourceError> {
        self.authorize(actor, ResourceOperation::View, resource_type)
            .await?;
        self.owner_of(actor, full_name)?;
        if is_directory_key(full_name) {
            return Err(ResourceError::InvalidName(format!(
                "{full_name} is a directory"
            )));
        }
        if !self.backend.exists(full_name).await? {
            return Err(ResourceError::NotFound(full_name.to_string()));
        }
        self.backend
            .read_lines(full_name, skip, limit)
            .await
            .map_err(|e| ResourceError::from_lookup(full_name, e))
    }

    /// Copy a file resource into `local_dir`, returning the written path
    pub async fn download(
        &self,
        actor: &Actor,
        full_name: &str,
        resource_type: ResourceType,
        local_dir: &Path,
    ) -> Result<PathBuf, ResourceError> {
        self.authorize(actor, ResourceOperation::Download, resource_type)
            .await?;
        let tenant = self.owner_of(actor, full_name)?;
        if is_directory_key(full_name) {
            return Err(ResourceError::DirectoryDownload(full_name.to_string()));
        }

        let target = local_dir.join(file_alias(full_name));
        self.backend
            .download(&tenant, full_name, &target, false, true)
            .await
            .map_err(|e| ResourceError::from_lookup(full_name, e))?;
        debug!(full_name, path = ?target, "downloaded resource");
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn authorize(
        &self,
        actor: &Actor,
        operation: ResourceOperation,
        resource_type: ResourceType,
    ) -> Result<(), ResourceError> {
        if self
            .permissions
            .can_operate(actor, operation, resource_type)
            .await
        {
            Ok(())
        } else {
            Err(ResourceError::PermissionDenied(format!(
                "{} may not {operation:?} {resource_type} resources",
                actor.user_name
            )))
        }
    }

    fn root(&self, tenant: &str, resource_type: ResourceType) -> String {
        self.backend.resolver().dir_for(resource_type, tenant)
    }

    /// Tenant owning `full_name`, provided the actor may access it
    fn owner_of(&self, actor: &Actor, full_name: &str) -> Result<String, ResourceError> {
        let tenant = self
            .backend
            .resolver()
            .tenant_of(full_name)
            .ok_or_else(|| {
                ResourceError::PermissionDenied(format!("{full_name} is outside any tenant root"))
            })?;
        check_tenant(actor, tenant)?;
        Ok(tenant.to_string())
    }

    /// Directory to list: `full_name` if given, else the root; never outside the root
    fn scoped_dir(&self, root: &str, full_name: Option<&str>) -> Result<String, ResourceError> {
        match full_name.filter(|name| !name.trim().is_empty()) {
            None => Ok(root.to_string()),
            Some(name) if is_traversal(name) => Err(ResourceError::InvalidName(name.to_string())),
            Some(name) => {
                let dir = as_directory(name);
                if dir.starts_with(root) {
                    Ok(dir)
                } else {
                    Err(ResourceError::PermissionDenied(format!(
                        "{dir} is outside {root}"
                    )))
                }
            }
        }
    }

    /// Full name for a new resource `name` created from `current_dir`
    ///
    /// A `current_dir` below the tenant root must already exist.
    async fn target_name(
        &self,
        tenant: &str,
        resource_type: ResourceType,
        name: &str,
        current_dir: &str,
    ) -> Result<String, ResourceError> {
        let name = validate_name(name)?;
        let root = self.root(tenant, resource_type);
        let current_dir = as_directory(current_dir);
        if is_traversal(&current_dir) {
            return Err(ResourceError::InvalidName(current_dir));
        }
        if current_dir.starts_with(&root) {
            if current_dir != root && !self.backend.exists(&current_dir).await? {
                return Err(ResourceError::NotFound(current_dir));
            }
            Ok(format!("{current_dir}{name}"))
        } else {
            Ok(format!("{root}{name}"))
        }
    }

    fn check_length(&self, full_name: &str) -> Result<(), ResourceError> {
        if full_name.chars().count() > self.config.max_full_name_len {
            return Err(ResourceError::FullNameTooLong {
                name: full_name.to_string(),
                max: self.config.max_full_name_len,
            });
        }
        Ok(())
    }

    /// Refuse names already taken as a file or as a directory
    ///
    /// Not atomic with the create that follows; concurrent creators may both
    /// pass.
    async fn ensure_unique(&self, full_name: &str) -> Result<(), ResourceError> {
        let plain = full_name.trim_end_matches('/');
        if self.backend.exists(plain).await? || self.backend.exists(&as_directory(plain)).await? {
            return Err(ResourceError::NameConflict(full_name.to_string()));
        }
        Ok(())
    }

    async fn ensure_tenant_dirs(&self, tenant: &str) -> Result<(), ResourceError> {
        if !self.backend.create_tenant_dirs(tenant).await? {
            return Err(ResourceError::failed(
                "create_tenant_dirs",
                self.backend.resolver().tenant_root(tenant),
            ));
        }
        Ok(())
    }

    async fn lookup(
        &self,
        full_name: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<StorageEntity, ResourceError> {
        let root = self.root(tenant, resource_type);
        self.backend
            .get_status(full_name, &root, tenant, resource_type)
            .await
            .map_err(|e| ResourceError::from_lookup(full_name, e))
    }

    /// Run bookkeeping that follows a storage commit, converting failure
    /// into [`ResourceError::PartialCommit`]
    async fn after_commit<T>(
        &self,
        committed: usize,
        step: &'static str,
        work: impl Future<Output = Result<T, ResourceError>>,
    ) -> Result<T, ResourceError> {
        work.await.map_err(|e| {
            error!(step, committed, error = %e, "follow-up after storage commit failed");
            ResourceError::PartialCommit {
                committed,
                reason: format!("{step}: {e}"),
            }
        })
    }
}

fn check_tenant(actor: &Actor, tenant: &str) -> Result<(), ResourceError> {
    if actor.may_access(tenant) {
        Ok(())
    } else {
        Err(ResourceError::PermissionDenied(format!(
            "{} may not access tenant {tenant}",
            actor.user_name
        )))
    }
}

fn validate_name(name: &str) -> Result<&str, ResourceError> {
    let name = name.strip_prefix('/').unwrap_or(name);
    if name.trim().is_empty() || is_traversal(name) {
        return Err(ResourceError::InvalidName(name.to_string()));
    }
    Ok(name)
}

fn filter_search(entities: Vec<StorageEntity>, search: Option<&str>) -> Vec<StorageEntity> {
    match search.filter(|s| !s.is_empty()) {
        Some(needle) => entities
            .into_iter()
            .filter(|e| e.file_name.contains(needle))
            .collect(),
        None => entities,
    }
}

fn to_delta(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// Write `content` to a temp file that lives as long as the returned handle
async fn stage_content(content: &str) -> Result<tempfile::NamedTempFile, ResourceError> {
    let staged = tempfile::NamedTempFile::new().map_err(StorageError::from)?;
    tokio::fs::write(staged.path(), content)
        .await
        .map_err(StorageError::from)?;
    Ok(staged)
}

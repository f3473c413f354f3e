//! [`StorageBackend`] over a [`DfsClient`]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tessera_core::path::{file_alias, is_directory_key, parent_dir};
use tessera_core::{
    ListingScope, PathResolver, ResourceType, StorageEntity, StorageError, StorageKind,
};
use tracing::{debug, info, instrument, warn};

use super::{DfsClient, DfsSettings, DfsStatus, STAGING_SUFFIX, to_dfs_path, to_key};
use crate::{StorageBackend, lines_window, prepare_download_target, write_outcome};

/// Distributed-filesystem backend
pub struct DfsBackend<C> {
    client: Arc<C>,
    settings: DfsSettings,
    resolver: PathResolver,
}

impl<C: DfsClient> DfsBackend<C> {
    /// Connect and make sure the base directory exists
    #[instrument(skip(client, settings, resolver), fields(root = %settings.root_uri))]
    pub async fn connect(
        client: Arc<C>,
        settings: DfsSettings,
        resolver: PathResolver,
    ) -> Result<Self, StorageError> {
        if client.get_file_status("/").await?.is_none() {
            return Err(StorageError::configuration(format!(
                "filesystem root of {} is not reachable",
                settings.root_uri
            )));
        }

        let base = to_dfs_path(resolver.base());
        if client.get_file_status(&base).await?.is_none() {
            client.mkdirs(&base).await?;
            info!(base = %base, "created base directory");
        }

        info!(base = %resolver.base(), "dfs backend ready");
        Ok(Self {
            client,
            settings,
            resolver,
        })
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn entity(scope: &ListingScope<'_>, status: &DfsStatus) -> StorageEntity {
        let key = status.key();
        if status.is_dir {
            scope.directory(&key, Some(status.modification_time))
        } else {
            scope.file(&key, status.len, Some(status.modification_time))
        }
    }

    /// Every entry below the directory `path`, breadth first
    async fn walk(&self, path: &str) -> Result<Vec<DfsStatus>, StorageError> {
        let mut found = Vec::new();
        let mut pending = VecDeque::from([path.to_string()]);
        while let Some(dir) = pending.pop_front() {
            for status in self.client.list_status(&dir).await? {
                if status.is_dir {
                    pending.push_back(status.path.clone());
                }
                found.push(status);
            }
        }
        Ok(found)
    }

    async fn copy_tree(&self, src: &str, dst: &str, overwrite: bool) -> Result<(), StorageError> {
        let mut pending = vec![(src.to_string(), dst.to_string())];
        while let Some((from, to)) = pending.pop() {
            let status = self
                .client
                .get_file_status(&from)
                .await?
                .ok_or_else(|| StorageError::not_found(from.clone()))?;
            if status.is_dir {
                self.client.mkdirs(&to).await?;
                for child in self.client.list_status(&from).await? {
                    let name = file_alias(&child.path);
                    pending.push((child.path.clone(), format!("{to}/{name}")));
                }
            } else {
                let body = self.client.open(&from).await?;
                self.client.create(&to, body, overwrite).await?;
            }
        }
        Ok(())
    }

    /// Move or copy `from` to the absent path `to`
    async fn transfer(&self, from: &str, to: &str, delete_source: bool) -> Result<(), StorageError> {
        if delete_source {
            self.client.rename(from, to).await
        } else {
            self.copy_tree(from, to, false).await
        }
    }

    fn is_staged(status: &DfsStatus) -> bool {
        status.path.ends_with(STAGING_SUFFIX)
    }
}

#[async_trait]
impl<C: DfsClient + 'static> StorageBackend for DfsBackend<C> {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Dfs
    }

    fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let status = self.client.get_file_status(&to_dfs_path(key)).await?;
        Ok(match status {
            Some(status) if is_directory_key(key) => status.is_dir,
            Some(_) => true,
            None => false,
        })
    }

    #[instrument(skip(self), fields(root = %self.settings.root_uri))]
    async fn mkdir(&self, tenant: &str, dir_path: &str) -> Result<bool, StorageError> {
        let path = to_dfs_path(dir_path);
        let result = self.client.mkdirs(&path).await;
        write_outcome("mkdir", &path, result)
    }

    #[instrument(skip(self), fields(root = %self.settings.root_uri))]
    async fn upload(
        &self,
        tenant: &str,
        local_path: &Path,
        remote_key: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError> {
        let body = tokio::fs::read(local_path).await?;
        let path = to_dfs_path(remote_key);
        let result = self.client.create(&path, Bytes::from(body), overwrite).await;
        let uploaded = write_outcome("upload", &path, result)?;
        if uploaded && delete_source {
            if let Err(e) = tokio::fs::remove_file(local_path).await {
                warn!(path = ?local_path, error = %e, "failed to remove upload source");
            }
        }
        Ok(uploaded)
    }

    #[instrument(skip(self), fields(root = %self.settings.root_uri))]
    async fn download(
        &self,
        tenant: &str,
        remote_key: &str,
        local_path: &Path,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let path = to_dfs_path(remote_key);
        let body = self.client.open(&path).await?;
        prepare_download_target(local_path, overwrite).await?;
        tokio::fs::write(local_path, &body).await?;

        if delete_source {
            let result = self.client.delete(&path, false).await.map(|_| ());
            write_outcome("delete", &path, result)?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<bool, StorageError> {
        let path = to_dfs_path(key);
        let result = self.client.delete(&path, recursive).await.map(|removed| {
            if !removed {
                debug!(path = %path, "nothing to delete");
            }
        });
        write_outcome("delete", &path, result)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<bool, StorageError> {
        let mut all_deleted = true;
        for key in keys {
            all_deleted &= self.delete(key, true).await?;
        }
        Ok(all_deleted)
    }

    #[instrument(skip(self), fields(root = %self.settings.root_uri))]
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError> {
        let (from, to) = (to_dfs_path(src), to_dfs_path(dst));
        if from == to {
            return Ok(true);
        }
        if self.client.get_file_status(&from).await?.is_none() {
            warn!(src, "copy source does not exist");
            return Ok(false);
        }
        if self.client.get_file_status(&to).await?.is_none() {
            let result = self.transfer(&from, &to, delete_source).await;
            return write_outcome("copy", &from, result);
        }
        if !overwrite {
            warn!(dst, "copy target exists and overwrite is off");
            return Ok(false);
        }

        // The existing target is only replaced once the staged copy is complete
        let staged = format!("{to}{STAGING_SUFFIX}");
        if let Err(e) = self.transfer(&from, &staged, delete_source).await {
            if let Err(cleanup) = self.client.delete(&staged, true).await {
                warn!(path = %staged, error = %cleanup, "failed to remove staged copy");
            }
            return write_outcome("copy", &from, Err(e));
        }
        let result = async {
            self.client.delete(&to, true).await?;
            self.client.rename(&staged, &to).await
        }
        .await;
        write_outcome("copy", &from, result)
    }

    async fn list_keys_under_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let start = if is_directory_key(prefix) {
            prefix
        } else {
            parent_dir(prefix)
        };
        let root = to_dfs_path(start);
        let mut keys = Vec::new();
        if let Some(status) = self.client.get_file_status(&root).await?
            && status.is_dir
        {
            keys.push(status.key());
            keys.extend(
                self.walk(&root)
                    .await?
                    .iter()
                    .filter(|status| !Self::is_staged(status))
                    .map(DfsStatus::key),
            );
        }
        keys.retain(|key| key.starts_with(prefix));
        Ok(keys)
    }

    async fn list_one_level(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<StorageEntity>, StorageError> {
        let scope = ListingScope::new(path, default_path, tenant, resource_type);
        match self.client.list_status(&to_dfs_path(path)).await {
            Ok(children) => Ok(children
                .iter()
                .filter(|status| !Self::is_staged(status))
                .map(|status| Self::entity(&scope, status))
                .collect()),
            Err(StorageError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn get_status(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<StorageEntity, StorageError> {
        let status = self
            .client
            .get_file_status(&to_dfs_path(path))
            .await?
            .ok_or_else(|| StorageError::not_found(path))?;
        let key = to_key(&status.path, status.is_dir);
        let scope = ListingScope::new(parent_dir(&key), default_path, tenant, resource_type);
        Ok(Self::entity(&scope, &status))
    }

    async fn read_lines(
        &self,
        key: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        if key.trim().is_empty() {
            return Ok(Vec::new());
        }
        let body = self.client.open(&to_dfs_path(key)).await?;
        Ok(lines_window(&String::from_utf8_lossy(&body), skip, limit))
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        info!(root = %self.settings.root_uri, "shutting down dfs client");
        self.client.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfs::InMemoryDfsClient;

    const ROOT: &str = "base/t1/resources/";

    async fn create_backend() -> (DfsBackend<InMemoryDfsClient>, Arc<InMemoryDfsClient>) {
        let client = Arc::new(InMemoryDfsClient::new());
        let backend = DfsBackend::connect(
            client.clone(),
            DfsSettings::new("memory://dfs"),
            PathResolver::new("base"),
        )
        .await
        .unwrap();
        (backend, client)
    }

    async fn put(client: &InMemoryDfsClient, path: &str, body: &'static [u8]) {
        client
            .create(path, Bytes::from_static(body), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_creates_base() {
        let (_backend, client) = create_backend().await;
        assert!(client.get_file_status("/base").await.unwrap().unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_tenant_dirs_and_listing() {
        let (backend, client) = create_backend().await;
        assert!(backend.create_tenant_dirs("t1").await.unwrap());
        put(&client, "/base/t1/resources/x.txt", b"hello").await;
        put(&client, "/base/t1/resources/sub/y.txt", b"y").await;

        let entities = backend
            .list_one_level(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(entities.len(), 2);
        let dir = entities.iter().find(|e| e.is_directory).unwrap();
        assert_eq!(dir.full_name, "base/t1/resources/sub/");
        assert_eq!(dir.alias, "sub");

        let all = backend
            .list_recursive(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(backend.exists("base/t1/udfs/").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let (backend, _client) = create_backend().await;
        let entities = backend
            .list_one_level("base/t9/resources/", ROOT, "t9", ResourceType::File)
            .await
            .unwrap();
        assert!(entities.is_empty());
    }

    #[tokio::test]
    async fn test_rename_moves_children() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/a/x", b"1").await;

        assert!(backend.supports_native_rename());
        assert!(backend
            .copy("base/t1/resources/a/", "base/t1/resources/b/", true, false)
            .await
            .unwrap());

        assert!(backend.exists("base/t1/resources/b/x").await.unwrap());
        assert!(!backend.exists("base/t1/resources/a/").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_without_delete_duplicates_tree() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/a/x", b"1").await;
        put(&client, "/base/t1/resources/a/s/y", b"2").await;

        assert!(backend
            .copy("base/t1/resources/a/", "base/t1/resources/c/", false, true)
            .await
            .unwrap());

        assert!(backend.exists("base/t1/resources/a/x").await.unwrap());
        assert!(backend.exists("base/t1/resources/c/s/y").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_under_prefix() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/a/x", b"1").await;
        put(&client, "/base/t1/resources/ab", b"2").await;

        let mut keys = backend.list_keys_under_prefix("base/t1/resources/a").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["base/t1/resources/a/", "base/t1/resources/a/x", "base/t1/resources/ab"]
        );
    }

    #[tokio::test]
    async fn test_get_status_and_read_lines() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/log.txt", b"l1\nl2\nl3").await;

        let status = backend
            .get_status("base/t1/resources/log.txt", ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(status.size, 8);
        assert_eq!(status.parent_full_name, ROOT);

        let lines = backend.read_lines("base/t1/resources/log.txt", 2, 1).await.unwrap();
        assert_eq!(lines, vec!["l3"]);
    }

    #[tokio::test]
    async fn test_write_failures_return_false() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/x", b"1").await;

        client.set_fail_writes(true);
        assert!(!backend.delete("base/t1/resources/x", false).await.unwrap());
        assert!(!backend.mkdir("t1", "base/t1/resources/d").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwriting_move_replaces_target() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/new.txt", b"new").await;
        put(&client, "/base/t1/resources/old.txt", b"old").await;

        assert!(backend
            .copy("base/t1/resources/new.txt", "base/t1/resources/old.txt", true, true)
            .await
            .unwrap());

        assert_eq!(
            client.open("/base/t1/resources/old.txt").await.unwrap(),
            Bytes::from_static(b"new")
        );
        assert!(!backend.exists("base/t1/resources/new.txt").await.unwrap());
        let keys = backend.list_keys_under_prefix(ROOT).await.unwrap();
        assert!(keys.iter().all(|key| !key.ends_with(STAGING_SUFFIX)));
    }

    #[tokio::test]
    async fn test_failed_overwrite_keeps_target() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/a.txt", b"a").await;
        put(&client, "/base/t1/resources/keep.txt", b"keep").await;

        client.set_fail_writes(true);
        assert!(!backend
            .copy("base/t1/resources/a.txt", "base/t1/resources/keep.txt", true, true)
            .await
            .unwrap());
        client.set_fail_writes(false);

        assert_eq!(
            client.open("/base/t1/resources/keep.txt").await.unwrap(),
            Bytes::from_static(b"keep")
        );
        assert!(backend.exists("base/t1/resources/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_staged_copies_are_hidden_from_listings() {
        let (backend, client) = create_backend().await;
        put(&client, "/base/t1/resources/x.txt", b"1").await;
        put(&client, &format!("/base/t1/resources/x.txt{STAGING_SUFFIX}"), b"2").await;

        let entities = backend
            .list_one_level(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].alias, "x.txt");
    }
}

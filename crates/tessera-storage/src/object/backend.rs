//! [`StorageBackend`] over an [`ObjectClient`]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tessera_core::path::{as_directory, is_directory_key, parent_dir};
use tessera_core::{
    ListingScope, PathResolver, ResourceType, StorageEntity, StorageError, StorageKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{ListObjectsRequest, ObjectClient, ObjectStoreSettings};
use crate::{StorageBackend, lines_window, prepare_download_target, write_outcome};

/// Keys accepted by one batch delete request
const MAX_DELETE_BATCH: usize = 1000;

/// Object-store backend
///
/// Simulates directories with zero-length marker objects (`dir/`). Renames
/// are copy-then-delete and only ever touch the addressed key, so copying a
/// directory marker leaves its children behind.
pub struct ObjectStoreBackend<C> {
    client: Arc<C>,
    settings: ObjectStoreSettings,
    resolver: PathResolver,
}

impl<C: ObjectClient> ObjectStoreBackend<C> {
    /// Connect to the configured bucket
    ///
    /// Fails with [`StorageError::Configuration`] when the bucket name is
    /// blank or the bucket does not exist. No later operation is attempted
    /// against a backend that failed this check.
    #[instrument(skip(client, settings, resolver), fields(bucket = %settings.bucket))]
    pub async fn connect(
        client: Arc<C>,
        settings: ObjectStoreSettings,
        resolver: PathResolver,
    ) -> Result<Self, StorageError> {
        if settings.bucket.trim().is_empty() {
            return Err(StorageError::configuration("object store bucket name is blank"));
        }
        if !client.bucket_exists(&settings.bucket).await? {
            return Err(StorageError::configuration(format!(
                "bucket `{}` does not exist",
                settings.bucket
            )));
        }

        info!(base = %resolver.base(), page_size = settings.page_size, "object store backend ready");
        Ok(Self {
            client,
            settings,
            resolver,
        })
    }

    /// The wire client
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    /// Lazy cursor over every key under `prefix`, one page per call
    pub fn key_pages(&self, prefix: &str) -> KeyPager<'_, C> {
        KeyPager {
            client: self.client.as_ref(),
            bucket: &self.settings.bucket,
            prefix: prefix.to_string(),
            page_size: self.settings.page_size,
            token: None,
            done: false,
        }
    }

    /// A directory exists if its marker does or any key lives below it
    async fn directory_exists(&self, prefix: &str) -> Result<bool, StorageError> {
        if self.client.head_object(self.bucket(), prefix).await?.is_some() {
            return Ok(true);
        }
        let request = ListObjectsRequest::new(prefix).with_max_keys(1);
        let page = self.client.list_objects_v2(self.bucket(), &request).await?;
        Ok(!page.objects.is_empty())
    }

    async fn delete_chunked(&self, keys: &[String]) -> Result<bool, StorageError> {
        let mut all_deleted = true;
        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            let result = self.client.delete_objects(self.bucket(), chunk).await;
            let first = chunk.first().map(String::as_str).unwrap_or_default();
            all_deleted &= write_outcome("delete_batch", first, result)?;
        }
        Ok(all_deleted)
    }
}

/// Lazy, finite, non-restartable sequence of key pages
///
/// Each call to [`KeyPager::next_page`] issues at most one list request.
pub struct KeyPager<'a, C> {
    client: &'a C,
    bucket: &'a str,
    prefix: String,
    page_size: usize,
    token: Option<String>,
    done: bool,
}

impl<C: ObjectClient> KeyPager<'_, C> {
    /// Next page of keys, `None` once the listing is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>, StorageError> {
        if self.done {
            return Ok(None);
        }
        let request = ListObjectsRequest::new(self.prefix.clone())
            .with_max_keys(self.page_size)
            .with_continuation_token(self.token.take());
        let page = self.client.list_objects_v2(self.bucket, &request).await?;

        self.token = page.next_continuation_token;
        self.done = !page.is_truncated || self.token.is_none();
        Ok(Some(page.objects.into_iter().map(|o| o.key).collect()))
    }

    /// Drain the remaining pages
    pub async fn collect_all(self) -> Result<Vec<String>, StorageError> {
        self.collect_until(&CancellationToken::new()).await
    }

    /// Drain the remaining pages, checking `cancel` before each request
    pub async fn collect_until(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled(self.prefix));
            }
            match self.next_page().await? {
                Some(page) => keys.extend(page),
                None => return Ok(keys),
            }
        }
    }
}

#[async_trait]
impl<C: ObjectClient + 'static> StorageBackend for ObjectStoreBackend<C> {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::ObjectStore
    }

    fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        if is_directory_key(key) {
            return self.directory_exists(key).await;
        }
        Ok(self.client.head_object(self.bucket(), key).await?.is_some())
    }

    #[instrument(skip(self), fields(bucket = %self.settings.bucket))]
    async fn mkdir(&self, tenant: &str, dir_path: &str) -> Result<bool, StorageError> {
        let marker = as_directory(dir_path);
        match self.client.head_object(self.bucket(), &marker).await {
            Ok(Some(_)) => return Ok(true),
            Ok(None) => {}
            Err(StorageError::ShutDown) => return Err(StorageError::ShutDown),
            Err(e) => warn!(error = %e, "marker lookup failed, creating anyway"),
        }
        let result = self
            .client
            .put_object(self.bucket(), &marker, Bytes::new())
            .await;
        debug!(marker = %marker, "created directory marker");
        write_outcome("mkdir", &marker, result)
    }

    #[instrument(skip(self), fields(bucket = %self.settings.bucket))]
    async fn upload(
        &self,
        tenant: &str,
        local_path: &Path,
        remote_key: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError> {
        let body = tokio::fs::read(local_path).await?;
        if !overwrite && self.client.head_object(self.bucket(), remote_key).await?.is_some() {
            warn!(key = remote_key, "upload target exists and overwrite is off");
            return Ok(false);
        }

        let size = body.len();
        let result = self
            .client
            .put_object(self.bucket(), remote_key, Bytes::from(body))
            .await;
        let uploaded = write_outcome("upload", remote_key, result)?;
        if uploaded {
            debug!(key = remote_key, size, "uploaded object");
            if delete_source {
                if let Err(e) = tokio::fs::remove_file(local_path).await {
                    warn!(path = ?local_path, error = %e, "failed to remove upload source");
                }
            }
        }
        Ok(uploaded)
    }

    #[instrument(skip(self), fields(bucket = %self.settings.bucket))]
    async fn download(
        &self,
        tenant: &str,
        remote_key: &str,
        local_path: &Path,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let body = self.client.get_object(self.bucket(), remote_key).await?;
        prepare_download_target(local_path, overwrite).await?;
        tokio::fs::write(local_path, &body).await?;
        debug!(key = remote_key, size = body.len(), "downloaded object");

        if delete_source {
            let result = self.client.delete_object(self.bucket(), remote_key).await;
            write_outcome("delete", remote_key, result)?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.settings.bucket))]
    async fn delete(&self, key: &str, recursive: bool) -> Result<bool, StorageError> {
        if recursive && is_directory_key(key) {
            let keys = match self.key_pages(key).collect_all().await {
                Ok(keys) => keys,
                Err(StorageError::ShutDown) => return Err(StorageError::ShutDown),
                Err(e) => return write_outcome("delete", key, Err(e)),
            };
            return self.delete_batch(&keys).await;
        }
        let result = self.client.delete_object(self.bucket(), key).await;
        write_outcome("delete", key, result)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<bool, StorageError> {
        if keys.is_empty() {
            return Ok(true);
        }
        let deleted = self.delete_chunked(keys).await?;
        debug!(count = keys.len(), deleted, "batch delete");
        Ok(deleted)
    }

    #[instrument(skip(self), fields(bucket = %self.settings.bucket))]
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError> {
        if !overwrite && self.client.head_object(self.bucket(), dst).await?.is_some() {
            warn!(dst, "copy target exists and overwrite is off");
            return Ok(false);
        }
        let result = self.client.copy_object(self.bucket(), src, dst).await;
        if !write_outcome("copy", src, result)? {
            return Ok(false);
        }
        if delete_source {
            let result = self.client.delete_object(self.bucket(), src).await;
            return write_outcome("delete", src, result);
        }
        Ok(true)
    }

    async fn list_keys_under_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.key_pages(prefix).collect_all().await
    }

    async fn list_keys_under_prefix_until(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StorageError> {
        self.key_pages(prefix).collect_until(cancel).await
    }

    async fn list_one_level(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<StorageEntity>, StorageError> {
        self.list_one_level_until(path, default_path, tenant, resource_type, &CancellationToken::new())
            .await
    }

    async fn list_one_level_until(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
        cancel: &CancellationToken,
    ) -> Result<Vec<StorageEntity>, StorageError> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            as_directory(path)
        };
        let scope = ListingScope::new(&prefix, default_path, tenant, resource_type);

        let mut entities = Vec::new();
        let mut token = None;
        loop {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled(prefix.clone()));
            }
            let request = ListObjectsRequest::new(prefix.clone())
                .with_delimiter("/")
                .with_max_keys(self.settings.page_size)
                .with_continuation_token(token.take());
            let page = self.client.list_objects_v2(self.bucket(), &request).await?;

            entities.extend(
                page.objects
                    .iter()
                    .filter(|o| !is_directory_key(&o.key))
                    .map(|o| scope.file(&o.key, o.size, Some(o.last_modified))),
            );
            entities.extend(
                page.common_prefixes
                    .iter()
                    .map(|common| scope.directory(common, None)),
            );

            match page.next_continuation_token {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }

        debug!(prefix = %prefix, count = entities.len(), "listed one level");
        Ok(entities)
    }

    async fn get_status(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<StorageEntity, StorageError> {
        let scope = ListingScope::new(parent_dir(path), default_path, tenant, resource_type);
        if is_directory_key(path) {
            if !self.directory_exists(path).await? {
                return Err(StorageError::not_found(path));
            }
            let modified = self
                .client
                .head_object(self.bucket(), path)
                .await?
                .map(|marker| marker.last_modified);
            return Ok(scope.directory(path, modified));
        }

        self.client
            .head_object(self.bucket(), path)
            .await?
            .map(|head| scope.file(&head.key, head.size, Some(head.last_modified)))
            .ok_or_else(|| StorageError::not_found(path))
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
        let body = self.client.get_object(self.bucket(), key).await?;
        Ok(lines_window(&String::from_utf8_lossy(&body), skip, limit))
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        info!(bucket = %self.settings.bucket, "shutting down object store client");
        self.client.shutdown().await
    }
}

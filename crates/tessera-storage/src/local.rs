//! Local-disk backend
//!
//! Keys are paths below a root directory. Directories are real directories,
//! so `dir/` keys map onto them directly and renames are native.

use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tessera_core::path::{as_directory, is_directory_key, parent_dir};
use tessera_core::{
    ListingScope, PathResolver, ResourceType, StorageEntity, StorageError, StorageKind,
};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument, warn};

use crate::{StorageBackend, prepare_download_target, write_outcome};

/// Storage rooted at a directory on the local filesystem
///
/// In-flight writes are staged in a sibling `<root>.staging` directory so
/// listings never see partial files.
pub struct LocalBackend {
    root: PathBuf,
    staging: PathBuf,
    resolver: PathResolver,
    shut_down: AtomicBool,
}

impl LocalBackend {
    /// Open (creating if needed) the root directory
    pub async fn open(root: impl Into<PathBuf>, resolver: PathResolver) -> Result<Self, StorageError> {
        let root: PathBuf = root.into();
        let root: PathBuf = root.components().collect();
        let staging = Self::staging_dir(&root);
        for dir in [&root, &staging] {
            fs::create_dir_all(dir).await.map_err(|e| {
                StorageError::configuration(format!("cannot use {} as storage root: {e}", dir.display()))
            })?;
        }

        info!(path = %root.display(), base = %resolver.base(), "local backend ready");
        Ok(Self {
            root,
            staging,
            resolver,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(root: &Path) -> PathBuf {
        let mut staging = root.as_os_str().to_os_string();
        staging.push(".staging");
        PathBuf::from(staging)
    }

    /// Scratch directory for one write, removed with everything in it on drop
    fn stage(&self) -> Result<TempDir, StorageError> {
        Ok(tempfile::Builder::new()
            .prefix("write-")
            .tempdir_in(&self.staging)?)
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StorageError::ShutDown);
        }
        Ok(())
    }

    /// Filesystem path of `key`, refusing keys that climb out of the root
    fn path_of(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Io(format!("key escapes storage root: {key}")));
        }
        Ok(self.root.join(relative))
    }

    /// Storage key of a filesystem path below the root
    fn key_of(&self, path: &Path, is_dir: bool) -> String {
        let relative = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if is_dir {
            as_directory(&relative)
        } else {
            relative
        }
    }

    fn modified(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
        meta.modified().ok().map(DateTime::<Utc>::from)
    }

    /// Every entry below `dir`, breadth first, as (path, is_dir)
    async fn walk(dir: &Path) -> Result<Vec<(PathBuf, bool)>, StorageError> {
        let mut found = Vec::new();
        let mut pending = VecDeque::from([dir.to_path_buf()]);
        while let Some(current) = pending.pop_front() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let is_dir = entry.file_type().await?.is_dir();
                if is_dir {
                    pending.push_back(entry.path());
                }
                found.push((entry.path(), is_dir));
            }
        }
        Ok(found)
    }

    async fn copy_tree(src: &Path, dst: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(dst).await?;
        for (path, is_dir) in Self::walk(src).await? {
            let target = dst.join(path.strip_prefix(src).unwrap_or(&path));
            if is_dir {
                fs::create_dir_all(&target).await?;
            } else {
                fs::copy(&path, &target).await?;
            }
        }
        Ok(())
    }

    async fn remove(path: &Path, recursive: bool) -> Result<(), StorageError> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() && recursive => fs::remove_dir_all(path).await?,
            Ok(meta) if meta.is_dir() => fs::remove_dir(path).await?,
            Ok(_) => fs::remove_file(path).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn ensure_parent(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn move_or_copy(src: &Path, dst: &Path, delete_source: bool) -> Result<(), StorageError> {
        Self::ensure_parent(dst).await?;
        let is_dir = fs::metadata(src).await?.is_dir();
        if delete_source {
            if fs::rename(src, dst).await.is_ok() {
                return Ok(());
            }
            // Cross-device moves fall back to copy and remove
            if is_dir {
                Self::copy_tree(src, dst).await?;
            } else {
                fs::copy(src, dst).await?;
            }
            return Self::remove(src, true).await;
        }
        if is_dir {
            Self::copy_tree(src, dst).await
        } else {
            fs::copy(src, dst).await.map(|_| ()).map_err(Into::into)
        }
    }

    fn entity(&self, scope: &ListingScope<'_>, path: &Path, meta: &std::fs::Metadata) -> StorageEntity {
        let key = self.key_of(path, meta.is_dir());
        if meta.is_dir() {
            scope.directory(&key, Self::modified(meta))
        } else {
            scope.file(&key, meta.len(), Self::modified(meta))
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn storage_kind(&self) -> StorageKind {
        StorageKind::Local
    }

    fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.check_open()?;
        match fs::metadata(self.path_of(key)?).await {
            Ok(meta) => Ok(!is_directory_key(key) || meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn mkdir(&self, tenant: &str, dir_path: &str) -> Result<bool, StorageError> {
        self.check_open()?;
        let path = self.path_of(dir_path)?;
        let result: Result<(), StorageError> = fs::create_dir_all(&path).await.map_err(Into::into);
        write_outcome("mkdir", dir_path, result)
    }

    #[instrument(skip(self))]
    async fn upload(
        &self,
        tenant: &str,
        local_path: &Path,
        remote_key: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError> {
        self.check_open()?;
        fs::metadata(local_path).await?;
        let target = self.path_of(remote_key)?;
        if !overwrite && fs::metadata(&target).await.is_ok() {
            warn!(key = remote_key, "upload target exists and overwrite is off");
            return Ok(false);
        }

        let result = async {
            Self::ensure_parent(&target).await?;
            let scratch = self.stage()?;
            let staged = scratch.path().join("upload");
            Self::move_or_copy(local_path, &staged, delete_source).await?;
            Self::move_or_copy(&staged, &target, true).await
        }
        .await;
        let uploaded = write_outcome("upload", remote_key, result)?;
        if uploaded {
            debug!(key = remote_key, "stored file");
        }
        Ok(uploaded)
    }

    #[instrument(skip(self))]
    async fn download(
        &self,
        tenant: &str,
        remote_key: &str,
        local_path: &Path,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        self.check_open()?;
        let source = self.path_of(remote_key)?;
        if !fs::metadata(&source).await?.is_file() {
            return Err(StorageError::not_found(remote_key));
        }
        prepare_download_target(local_path, overwrite).await?;
        Self::move_or_copy(&source, local_path, delete_source).await
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<bool, StorageError> {
        self.check_open()?;
        let path = self.path_of(key)?;
        write_outcome("delete", key, Self::remove(&path, recursive).await)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<bool, StorageError> {
        let mut all_deleted = true;
        for key in keys {
            all_deleted &= self.delete(key, true).await?;
        }
        Ok(all_deleted)
    }

    #[instrument(skip(self))]
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        delete_source: bool,
        overwrite: bool,
    ) -> Result<bool, StorageError> {
        self.check_open()?;
        let (from, to) = (self.path_of(src)?, self.path_of(dst)?);
        if from == to {
            return Ok(true);
        }
        if fs::metadata(&from).await.is_err() {
            warn!(src, "copy source does not exist");
            return Ok(false);
        }
        if fs::metadata(&to).await.is_err() {
            let result = Self::move_or_copy(&from, &to, delete_source).await;
            return write_outcome("copy", src, result);
        }
        if !overwrite {
            warn!(dst, "copy target exists and overwrite is off");
            return Ok(false);
        }

        // The existing target is only replaced once the staged copy is complete
        let scratch = match self.stage() {
            Ok(scratch) => scratch,
            Err(e) => return write_outcome("copy", src, Err(e)),
        };
        let staged = scratch.path().join("copy");
        if let Err(e) = Self::move_or_copy(&from, &staged, delete_source).await {
            return write_outcome("copy", src, Err(e));
        }
        let swapped = async {
            Self::remove(&to, true).await?;
            Self::move_or_copy(&staged, &to, true).await
        }
        .await;
        if swapped.is_err()
            && delete_source
            && let Err(e) = Self::move_or_copy(&staged, &from, true).await
        {
            warn!(src, error = %e, "failed to restore copy source");
        }
        write_outcome("copy", src, swapped)
    }

    async fn list_keys_under_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.check_open()?;
        let start = if is_directory_key(prefix) {
            prefix
        } else {
            parent_dir(prefix)
        };
        let dir = self.path_of(start)?;
        if !fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut keys = vec![self.key_of(&dir, true)];
        keys.extend(
            Self::walk(&dir)
                .await?
                .iter()
                .map(|(path, is_dir)| self.key_of(path, *is_dir)),
        );
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    async fn list_one_level(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<Vec<StorageEntity>, StorageError> {
        self.check_open()?;
        let dir = self.path_of(path)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let scope = ListingScope::new(path, default_path, tenant, resource_type);
        let mut entities = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            entities.push(self.entity(&scope, &entry.path(), &meta));
        }
        entities.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(entities)
    }

    async fn get_status(
        &self,
        path: &str,
        default_path: &str,
        tenant: &str,
        resource_type: ResourceType,
    ) -> Result<StorageEntity, StorageError> {
        self.check_open()?;
        let target = self.path_of(path)?;
        let meta = match fs::metadata(&target).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(path));
            }
            Err(e) => return Err(e.into()),
        };
        let key = self.key_of(&target, meta.is_dir());
        let scope = ListingScope::new(parent_dir(&key), default_path, tenant, resource_type);
        Ok(self.entity(&scope, &target, &meta))
    }

    async fn read_lines(
        &self,
        key: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        self.check_open()?;
        if key.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(self.path_of(key)?).await?;
        let mut reader = BufReader::new(file).lines();

        let mut lines = Vec::new();
        let mut index = 0usize;
        while lines.len() < limit {
            let Some(line) = reader.next_line().await? else {
                break;
            };
            if index >= skip {
                lines.push(line);
            }
            index += 1;
        }
        Ok(lines)
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.shut_down.store(true, Ordering::SeqCst);
        info!(path = %self.root.display(), "local backend shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "base/t1/resources/";

    async fn create_test_backend() -> (LocalBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let backend = LocalBackend::open(temp_dir.path().join("store"), PathResolver::new("base"))
            .await
            .unwrap();
        (backend, temp_dir)
    }

    async fn write_local(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_and_list() {
        let (backend, temp_dir) = create_test_backend().await;
        backend.create_tenant_dirs("t1").await.unwrap();
        let src = write_local(&temp_dir, "x.txt", "hello").await;

        assert!(backend
            .upload("t1", &src, "base/t1/resources/x.txt", false, true)
            .await
            .unwrap());
        assert!(backend.mkdir("t1", "base/t1/resources/sub").await.unwrap());

        let entities = backend
            .list_one_level(ROOT, ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].full_name, "base/t1/resources/sub/");
        assert_eq!(entities[0].alias, "sub");
        assert_eq!(entities[1].alias, "x.txt");
        assert_eq!(entities[1].size, 5);
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_upload_respects_overwrite() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "a", "1").await;

        assert!(backend.upload("t1", &src, "base/t1/resources/a", false, false).await.unwrap());
        assert!(!backend.upload("t1", &src, "base/t1/resources/a", false, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (backend, _temp_dir) = create_test_backend().await;
        assert!(backend.exists("base/../../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_directory_copy_moves_children() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "x", "1").await;
        backend.upload("t1", &src, "base/t1/resources/a/x", false, true).await.unwrap();

        assert!(backend
            .copy("base/t1/resources/a/", "base/t1/resources/b/", true, false)
            .await
            .unwrap());

        assert!(backend.exists("base/t1/resources/b/x").await.unwrap());
        assert!(!backend.exists("base/t1/resources/a/").await.unwrap());
    }

    #[tokio::test]
    async fn test_recursive_listing_and_delete() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "f", "data").await;
        for key in ["base/t1/resources/a/x", "base/t1/resources/a/y", "base/t1/resources/a/s/z"] {
            backend.upload("t1", &src, key, false, true).await.unwrap();
        }

        let all = backend
            .list_recursive("base/t1/resources/a/", ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        // Parents precede children
        let s_pos = all.iter().position(|e| e.full_name == "base/t1/resources/a/s/").unwrap();
        let z_pos = all.iter().position(|e| e.full_name == "base/t1/resources/a/s/z").unwrap();
        assert!(s_pos < z_pos);

        let keys: Vec<String> = all.iter().map(|e| e.full_name.clone()).collect();
        assert!(backend.delete_batch(&keys).await.unwrap());
        for key in &keys {
            assert!(!backend.exists(key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_list_keys_under_prefix() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "f", "data").await;
        backend.upload("t1", &src, "base/t1/resources/a/x", false, true).await.unwrap();

        let keys = backend.list_keys_under_prefix("base/t1/resources/a/").await.unwrap();
        assert_eq!(keys, vec!["base/t1/resources/a/", "base/t1/resources/a/x"]);
    }

    #[tokio::test]
    async fn test_read_lines_window() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "log", "a\nb\nc\nd\n").await;
        backend.upload("t1", &src, "base/t1/resources/log", false, true).await.unwrap();

        let lines = backend.read_lines("base/t1/resources/log", 1, 2).await.unwrap();
        assert_eq!(lines, vec!["b", "c"]);
        assert!(backend.read_lines("", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_blocks_further_calls() {
        let (backend, _temp_dir) = create_test_backend().await;
        backend.shutdown().await.unwrap();
        assert!(matches!(
            backend.exists("base/t1/resources/").await,
            Err(StorageError::ShutDown)
        ));
        assert!(matches!(
            backend.mkdir("t1", "base/t1/resources/a/").await,
            Err(StorageError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_download_and_status() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "f", "payload").await;
        backend.upload("t1", &src, "base/t1/resources/f", false, true).await.unwrap();

        let out = temp_dir.path().join("out/f");
        backend
            .download("t1", "base/t1/resources/f", &out, false, true)
            .await
            .unwrap();
        assert_eq!(fs::read_to_string(&out).await.unwrap(), "payload");

        let status = backend
            .get_status("base/t1/resources/f", ROOT, "t1", ResourceType::File)
            .await
            .unwrap();
        assert_eq!(status.size, 7);
        assert!(matches!(
            backend
                .get_status("base/t1/resources/none", ROOT, "t1", ResourceType::File)
                .await,
            Err(StorageError::NotFound(_))
        ));
    }

    fn staged_entries(backend: &LocalBackend) -> usize {
        std::fs::read_dir(&backend.staging).unwrap().count()
    }

    #[tokio::test]
    async fn test_upload_stages_outside_the_root() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "x.txt", "hello").await;

        assert!(backend.upload("t1", &src, "base/t1/resources/x.txt", false, true).await.unwrap());

        assert!(!backend.staging.starts_with(backend.root()));
        assert_eq!(staged_entries(&backend), 0);
        let keys = backend.list_keys_under_prefix(ROOT).await.unwrap();
        assert_eq!(keys, vec![ROOT, "base/t1/resources/x.txt"]);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_no_staged_file() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "f", "data").await;
        backend.upload("t1", &src, "base/t1/resources/d/inner", false, true).await.unwrap();

        // A non-empty directory cannot be replaced by a file
        assert!(!backend.upload("t1", &src, "base/t1/resources/d", false, true).await.unwrap());
        assert_eq!(staged_entries(&backend), 0);
        assert!(backend.exists("base/t1/resources/d/inner").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_from_missing_source_keeps_target() {
        let (backend, temp_dir) = create_test_backend().await;
        let src = write_local(&temp_dir, "keep", "keep").await;
        backend.upload("t1", &src, "base/t1/resources/keep.txt", false, true).await.unwrap();

        assert!(!backend
            .copy("base/t1/resources/missing.txt", "base/t1/resources/keep.txt", true, true)
            .await
            .unwrap());
        assert!(backend.exists("base/t1/resources/keep.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwriting_copy_replaces_target() {
        let (backend, temp_dir) = create_test_backend().await;
        let old = write_local(&temp_dir, "old", "old").await;
        let new = write_local(&temp_dir, "new", "new").await;
        backend.upload("t1", &old, "base/t1/resources/a.txt", false, true).await.unwrap();
        backend.upload("t1", &new, "base/t1/resources/b.txt", false, true).await.unwrap();

        assert!(backend
            .copy("base/t1/resources/b.txt", "base/t1/resources/a.txt", true, true)
            .await
            .unwrap());

        let lines = backend.read_lines("base/t1/resources/a.txt", 0, 10).await.unwrap();
        assert_eq!(lines, vec!["new"]);
        assert!(!backend.exists("base/t1/resources/b.txt").await.unwrap());
        assert_eq!(staged_entries(&backend), 0);
    }
}

//! Distributed-filesystem backend
//!
//! Unlike the object store, the filesystem has real directories and an atomic
//! rename. Keys map onto absolute filesystem paths:
//!
//! ```text
//! base/t1/resources/a/    <->  /base/t1/resources/a   (directory)
//! base/t1/resources/a/x   <->  /base/t1/resources/a/x (file)
//! ```

mod backend;
mod memory;

pub use backend::DfsBackend;
pub use memory::InMemoryDfsClient;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::StorageError;
use tessera_core::path::as_directory;

/// Suffix of in-flight copies, hidden from listings
pub const STAGING_SUFFIX: &str = "._COPYING_";

/// Status of one filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsStatus {
    /// Absolute path, no trailing separator
    pub path: String,
    pub is_dir: bool,
    pub len: u64,
    pub modification_time: DateTime<Utc>,
}

impl DfsStatus {
    /// Storage key of this entry
    pub fn key(&self) -> String {
        to_key(&self.path, self.is_dir)
    }
}

/// Connection settings of a distributed-filesystem backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfsSettings {
    /// Filesystem URI, e.g. `hdfs://namenode:8020`
    pub root_uri: String,
    /// User the client acts as
    #[serde(default)]
    pub user: Option<String>,
}

impl DfsSettings {
    pub fn new(root_uri: impl Into<String>) -> Self {
        Self {
            root_uri: root_uri.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Wire-level operations against a distributed filesystem
#[async_trait]
pub trait DfsClient: Send + Sync {
    /// Status of `path`, `None` when absent
    async fn get_file_status(&self, path: &str) -> Result<Option<DfsStatus>, StorageError>;

    /// Direct children of the directory at `path`
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if `path` is not a directory.
    async fn list_status(&self, path: &str) -> Result<Vec<DfsStatus>, StorageError>;

    /// Create `path` and any missing parents
    async fn mkdirs(&self, path: &str) -> Result<(), StorageError>;

    /// Write a file, creating missing parents
    async fn create(&self, path: &str, body: Bytes, overwrite: bool) -> Result<(), StorageError>;

    /// Full content of the file at `path`
    async fn open(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Remove `path`; returns whether anything was removed
    async fn delete(&self, path: &str, recursive: bool) -> Result<bool, StorageError>;

    /// Atomically move `src` (and everything below it) to `dst`
    async fn rename(&self, src: &str, dst: &str) -> Result<(), StorageError>;

    /// Release the connection
    async fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Absolute filesystem path of a storage key
pub(crate) fn to_dfs_path(key: &str) -> String {
    format!("/{}", key.trim_matches('/'))
}

/// Storage key of an absolute filesystem path
pub(crate) fn to_key(path: &str, is_dir: bool) -> String {
    let key = path.trim_start_matches('/');
    if is_dir {
        as_directory(key)
    } else {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_mapping() {
        assert_eq!(to_dfs_path("base/t1/resources/a/"), "/base/t1/resources/a");
        assert_eq!(to_dfs_path("base/t1/resources/x"), "/base/t1/resources/x");
        assert_eq!(to_key("/base/t1/resources/a", true), "base/t1/resources/a/");
        assert_eq!(to_key("/base/t1/resources/x", false), "base/t1/resources/x");
    }

    #[test]
    fn test_settings_builder() {
        let settings = DfsSettings::new("hdfs://nn:8020").with_user("hdfs");
        assert_eq!(settings.user.as_deref(), Some("hdfs"));
    }
}

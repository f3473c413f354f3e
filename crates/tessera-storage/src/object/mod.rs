//! Object-store backend
//!
//! The backend speaks to the store through the [`ObjectClient`] seam, which
//! mirrors the handful of bucket operations it needs (head, put, get, delete,
//! batch delete, copy, paginated list). Directories do not exist natively:
//! they are zero-length marker objects whose key ends with `/`, plus any
//! prefix shared by existing keys.

mod backend;
mod memory;
mod s3;

pub use backend::{KeyPager, ObjectStoreBackend};
pub use memory::InMemoryObjectClient;
pub use s3::S3ObjectClient;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::StorageError;

/// Largest page most object stores return for one list call
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Metadata of one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Parameters of one list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    pub prefix: String,
    /// When set, keys containing the delimiter after the prefix are rolled
    /// up into common prefixes
    pub delimiter: Option<String>,
    /// Opaque token from the previous page
    pub continuation_token: Option<String>,
    pub max_keys: Option<usize>,
}

impl ListObjectsRequest {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_continuation_token(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }
}

/// One page of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

impl ListObjectsPage {
    /// Entries counted against the page limit
    pub fn len(&self) -> usize {
        self.objects.len() + self.common_prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Connection settings of an object-store backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Keys requested per list call
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl ObjectStoreSettings {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Wire-level operations against one object store
///
/// Implementations wrap a concrete SDK client. Every method addresses a single
/// bucket by name. Missing objects surface as [`StorageError::NotFound`],
/// remote failures as [`StorageError::Service`], and calls after
/// [`ObjectClient::shutdown`] as [`StorageError::ShutDown`].
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Whether `bucket` exists and is reachable
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;

    /// Metadata of `key`, `None` when absent
    async fn head_object(&self, bucket: &str, key: &str)
    -> Result<Option<ObjectSummary>, StorageError>;

    /// Store `body` under `key`, replacing any previous object
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), StorageError>;

    /// Full content of `key`
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Remove `key`; absent keys are not an error
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError>;

    /// Remove every key in one request
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError>;

    /// Server-side copy
    async fn copy_object(&self, bucket: &str, src: &str, dst: &str) -> Result<(), StorageError>;

    /// One page of keys under a prefix
    async fn list_objects_v2(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, StorageError>;

    /// Release the underlying connection pool
    async fn shutdown(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ListObjectsRequest::new("a/")
            .with_delimiter("/")
            .with_max_keys(10)
            .with_continuation_token(Some("a/x".into()));

        assert_eq!(request.prefix, "a/");
        assert_eq!(request.delimiter.as_deref(), Some("/"));
        assert_eq!(request.max_keys, Some(10));
        assert_eq!(request.continuation_token.as_deref(), Some("a/x"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ObjectStoreSettings::new("res").with_region("eu-west-1");
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert!(settings.endpoint.is_none());
    }

    #[test]
    fn test_client_is_object_safe() {
        fn _assert_object_safe(_: &dyn ObjectClient) {}
    }
}

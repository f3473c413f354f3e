//! In-memory object client used by tests and `memory://` endpoints

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tessera_core::StorageError;
use tracing::trace;

use super::{DEFAULT_PAGE_SIZE, ListObjectsPage, ListObjectsRequest, ObjectClient, ObjectSummary};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    last_modified: DateTime<Utc>,
}

type Bucket = BTreeMap<String, StoredObject>;

/// Object store held entirely in memory
///
/// Keys are kept ordered per bucket so listings paginate the way a real
/// store does. The page size cap, failure injection and call counters exist
/// for exercising pagination and error paths.
pub struct InMemoryObjectClient {
    buckets: RwLock<HashMap<String, Bucket>>,
    max_page_size: usize,
    fail_writes: AtomicBool,
    list_calls: AtomicUsize,
    shut_down: AtomicBool,
}

impl InMemoryObjectClient {
    /// Create a client with no buckets
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            max_page_size: DEFAULT_PAGE_SIZE,
            fail_writes: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Add an empty bucket
    pub fn with_bucket(self, bucket: impl Into<String>) -> Self {
        self.create_bucket(bucket);
        self
    }

    /// Cap every list page at `max_page_size` entries
    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    pub fn create_bucket(&self, bucket: impl Into<String>) {
        self.buckets.write().entry(bucket.into()).or_default();
    }

    /// Make every mutating call fail with a service error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of list calls served so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of objects in `bucket`
    pub fn object_count(&self, bucket: &str) -> usize {
        self.buckets.read().get(bucket).map_or(0, |b| b.len())
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StorageError::ShutDown);
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        self.check_open()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::service("injected write failure"));
        }
        Ok(())
    }

    fn no_such_bucket(bucket: &str) -> StorageError {
        StorageError::service(format!("no such bucket: {bucket}"))
    }

    fn summary(key: &str, object: &StoredObject) -> ObjectSummary {
        ObjectSummary {
            key: key.to_string(),
            size: object.body.len() as u64,
            last_modified: object.last_modified,
        }
    }
}

impl Default for InMemoryObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectClient for InMemoryObjectClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        self.check_open()?;
        Ok(self.buckets.read().contains_key(bucket))
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectSummary>, StorageError> {
        self.check_open()?;
        let buckets = self.buckets.read();
        let objects = buckets.get(bucket).ok_or_else(|| Self::no_such_bucket(bucket))?;
        Ok(objects.get(key).map(|object| Self::summary(key, object)))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        trace!(bucket, key, size = body.len(), "put object");
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.check_open()?;
        let buckets = self.buckets.read();
        let objects = buckets.get(bucket).ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects
            .get(key)
            .map(|object| object.body.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        for key in keys {
            objects.remove(key);
        }
        trace!(bucket, count = keys.len(), "deleted objects");
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, src: &str, dst: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut buckets = self.buckets.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        let body = objects
            .get(src)
            .map(|object| object.body.clone())
            .ok_or_else(|| StorageError::not_found(src))?;
        objects.insert(
            dst.to_string(),
            StoredObject {
                body,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, StorageError> {
        self.check_open()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let buckets = self.buckets.read();
        let objects = buckets.get(bucket).ok_or_else(|| Self::no_such_bucket(bucket))?;

        let limit = request
            .max_keys
            .unwrap_or(self.max_page_size)
            .clamp(1, self.max_page_size);
        let prefix = request.prefix.as_str();
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
        let start = match &request.continuation_token {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut page = ListObjectsPage::default();
        let mut last_key: Option<&String> = None;
        let mut rolled_up: Option<String> = None;

        for (key, object) in objects.range::<String, _>((start, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            // Keys already represented by an emitted common prefix
            if let Some(common) = &rolled_up {
                if key.starts_with(common.as_str()) {
                    last_key = Some(key);
                    continue;
                }
                rolled_up = None;
            }
            if page.len() == limit {
                page.is_truncated = true;
                page.next_continuation_token = last_key.cloned();
                break;
            }

            let rest = &key[prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|pos| pos + d.len())) {
                Some(end) => {
                    let common = format!("{prefix}{}", &rest[..end]);
                    page.common_prefixes.push(common.clone());
                    rolled_up = Some(common);
                }
                None => page.objects.push(Self::summary(key, object)),
            }
            last_key = Some(key);
        }

        Ok(page)
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

//! Object client backed by the AWS S3 SDK
//!
//! Works against AWS itself and S3-compatible stores (MinIO, Ceph RGW) when
//! `endpoint` is set; path-style addressing is forced in that case.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tessera_core::StorageError;
use tracing::{debug, trace};

use super::{ListObjectsPage, ListObjectsRequest, ObjectClient, ObjectStoreSettings, ObjectSummary};

/// Largest key count one DeleteObjects request accepts
const MAX_DELETE_BATCH: usize = 1000;

/// Name reported for credentials taken from settings
const CREDENTIALS_SOURCE: &str = "tessera-settings";

pub struct S3ObjectClient {
    client: Client,
    shut_down: AtomicBool,
}

impl S3ObjectClient {
    /// Build an SDK client from `settings`
    ///
    /// Region and credentials fall back to the SDK's default provider chain
    /// (environment, profile, instance metadata) when not set.
    pub async fn connect(settings: &ObjectStoreSettings) -> Result<Self, StorageError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(id), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    id.clone(),
                    secret.clone(),
                    None,
                    None,
                    CREDENTIALS_SOURCE,
                ));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::configuration(
                    "access_key_id and secret_access_key must be set together",
                ));
            }
        }
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint.is_some())
            .build();
        debug!(
            bucket = %settings.bucket,
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            "built s3 client"
        );
        Ok(Self::from_client(Client::from_conf(config)))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            shut_down: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(StorageError::ShutDown);
        }
        Ok(())
    }
}

fn service_error<E>(operation: &str, target: &str, err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Service(format!("{operation} {target}: {}", DisplayErrorContext(err)))
}

fn to_chrono(time: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    time.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

fn to_size(len: Option<i64>) -> u64 {
    len.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

/// `bucket/key` with the key percent-encoded, as CopyObject expects
fn copy_source(bucket: &str, key: &str) -> String {
    let mut encoded = String::with_capacity(bucket.len() + key.len() + 1);
    encoded.push_str(bucket);
    encoded.push('/');
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(char::from(byte))
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        self.check_open()?;
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(service_error("head_bucket", bucket, err)),
        }
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectSummary>, StorageError> {
        self.check_open()?;
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(out) => Ok(Some(ObjectSummary {
                key: key.to_string(),
                size: to_size(out.content_length()),
                last_modified: to_chrono(out.last_modified()),
            })),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => Err(service_error("head_object", key, err)),
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.check_open()?;
        let len = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| service_error("put_object", key, err))?;
        trace!(key, len, "put object");
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.check_open()?;
        let out = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(out) => out,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(err) => return Err(service_error("get_object", key, err)),
        };
        let body = out
            .body
            .collect()
            .await
            .map_err(|err| service_error("get_object body", key, err))?;
        Ok(body.into_bytes())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.check_open()?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| service_error("delete_object", key, err))?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), StorageError> {
        self.check_open()?;
        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            let ids = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| service_error("delete_objects", bucket, err))?;
            let delete = Delete::builder()
                .set_objects(Some(ids))
                .quiet(true)
                .build()
                .map_err(|err| service_error("delete_objects", bucket, err))?;

            let out = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|err| service_error("delete_objects", bucket, err))?;
            if let Some(failed) = out.errors().first() {
                return Err(StorageError::Service(format!(
                    "delete_objects: {} of {} keys failed, first {}: {}",
                    out.errors().len(),
                    chunk.len(),
                    failed.key().unwrap_or("?"),
                    failed.message().unwrap_or("no message")
                )));
            }
            debug!(bucket, count = chunk.len(), "deleted object batch");
        }
        Ok(())
    }

    async fn copy_object(&self, bucket: &str, src: &str, dst: &str) -> Result<(), StorageError> {
        self.check_open()?;
        match self
            .client
            .copy_object()
            .bucket(bucket)
            .copy_source(copy_source(bucket, src))
            .key(dst)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.raw_response().is_some_and(|r| r.status().as_u16() == 404) => {
                Err(StorageError::NotFound(src.to_string()))
            }
            Err(err) => Err(service_error("copy_object", src, err)),
        }
    }

    async fn list_objects_v2(
        &self,
        bucket: &str,
        request: &ListObjectsRequest,
    ) -> Result<ListObjectsPage, StorageError> {
        self.check_open()?;
        let out = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys.map(|n| i32::try_from(n).unwrap_or(i32::MAX)))
            .send()
            .await
            .map_err(|err| service_error("list_objects_v2", &request.prefix, err))?;

        let objects = out
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectSummary {
                    key: object.key()?.to_string(),
                    size: to_size(object.size()),
                    last_modified: to_chrono(object.last_modified()),
                })
            })
            .collect();
        let common_prefixes = out
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        Ok(ListObjectsPage {
            objects,
            common_prefixes,
            is_truncated: out.is_truncated().unwrap_or(false),
            next_continuation_token: out.next_continuation_token().map(str::to_string),
        })
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

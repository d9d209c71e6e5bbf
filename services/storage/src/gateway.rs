//! Storage gateway over the object store
//!
//! Every object is addressed by an opaque storage key. The gateway knows
//! nothing about owners; that is the catalog's job.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata},
    presigning::PresigningConfig,
    primitives::ByteStream,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::{StorageError, StorageResult};
use crate::models::{ObjectInfo, PresignedUrl};

/// Longest lifetime S3 accepts for a presigned URL
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Error codes S3-compatible backends use to refuse an object for its size
const QUOTA_ERROR_CODES: &[&str] = &["EntityTooLarge", "QuotaExceeded", "XMinioStorageFull"];

/// Operations the core needs from an object store
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `body` under `key`, replacing any existing object
    async fn put(&self, key: &str, body: Bytes, size_hint: u64) -> StorageResult<()>;

    /// Fetch the full contents of an object
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Delete an object; `NotFound` when there was nothing to delete
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Enumerate objects, optionally under a key prefix
    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<ObjectInfo>>;

    /// Produce a GET-only bearer URL for one object, valid for `ttl`
    async fn presign(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl>;
}

/// Checks shared by every backend before an upload
pub fn check_object_size(size: u64, limit: u64) -> StorageResult<()> {
    if size > limit {
        return Err(StorageError::QuotaExceeded { size, limit });
    }
    Ok(())
}

/// Checks shared by every backend before presigning
pub fn check_presign_ttl(ttl: Duration) -> StorageResult<()> {
    if ttl.is_zero() || ttl > MAX_PRESIGN_TTL {
        return Err(StorageError::Unavailable(format!(
            "presigned URL lifetime must be between 1 second and {} seconds",
            MAX_PRESIGN_TTL.as_secs()
        )));
    }
    Ok(())
}

/// Instant at which a link issued now with `ttl` stops working
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now + chrono::Duration::seconds(ttl.as_secs().min(MAX_PRESIGN_TTL.as_secs()) as i64)
}

/// S3 configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket holding every uploaded object
    pub bucket: String,
    /// Region; falls back to the AWS provider chain when unset
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (path-style addressing)
    pub endpoint_url: Option<String>,
    /// Largest object accepted by `put`
    pub max_object_bytes: u64,
    /// Upper bound on each S3 operation, retries included
    pub operation_timeout: Duration,
}

/// S3-backed storage gateway
#[derive(Clone)]
pub struct S3Gateway {
    client: Client,
    bucket: String,
    max_object_bytes: u64,
}

impl S3Gateway {
    /// Build a client from the AWS provider chain plus the given overrides.
    /// Credentials are never read from this crate's configuration.
    pub async fn new(config: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config).timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(config.operation_timeout)
                .build(),
        );
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!("S3 gateway initialized for bucket: {}", config.bucket);

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            max_object_bytes: config.max_object_bytes,
        }
    }

    /// Bucket this gateway writes to
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn unavailable<E: std::error::Error>(operation: &str, key: &str, err: E) -> StorageError {
    let message = DisplayErrorContext(err).to_string();
    error!("S3 {} failed for {}: {}", operation, key, message);
    StorageError::Unavailable(message)
}

#[async_trait]
impl ObjectStorage for S3Gateway {
    async fn put(&self, key: &str, body: Bytes, size_hint: u64) -> StorageResult<()> {
        let size = size_hint.max(body.len() as u64);
        check_object_size(size, self.max_object_bytes)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| match e.code() {
                Some(code) if QUOTA_ERROR_CODES.contains(&code) => StorageError::QuotaExceeded {
                    size,
                    limit: self.max_object_bytes,
                },
                _ => unavailable("put", key, e),
            })?;

        info!("Stored object {} ({} bytes)", key, size);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else if e.code() == Some("AccessDenied") {
                    StorageError::AccessDenied(key.to_string())
                } else {
                    unavailable("get", key, e)
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| unavailable("get", key, e))?;

        Ok(data.into_bytes())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        // S3 deletes succeed on missing keys, so look first
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    unavailable("head", key, e)
                }
            })?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| unavailable("delete", key, e))?;

        info!("Deleted object {}", key);
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<ObjectInfo>> {
        info!("Listing S3 bucket: {}", self.bucket);

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);

            if let Some(prefix) = prefix {
                request = request.prefix(prefix);
            }
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| unavailable("list", prefix.unwrap_or(""), e))?;

            for obj in response.contents() {
                let Some(key) = obj.key() else {
                    continue;
                };

                objects.push(ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                        .unwrap_or_else(Utc::now),
                });
            }

            if response.is_truncated().unwrap_or(false) {
                continuation_token = response.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        info!("Found {} objects in S3 bucket", objects.len());
        Ok(objects)
    }

    async fn presign(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl> {
        check_presign_ttl(ttl)?;
        let now = Utc::now();

        let presigning = PresigningConfig::expires_in(ttl).map_err(|e| unavailable("presign", key, e))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| unavailable("presign", key, e))?;

        Ok(PresignedUrl {
            url: request.uri().to_string(),
            expires_at: expiry_after(now, ttl),
        })
    }
}

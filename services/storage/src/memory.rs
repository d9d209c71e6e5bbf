//! In-memory object store and catalog
//!
//! Available behind the `test-util` feature or in `#[cfg(test)]` within this
//! crate. Both come with switches to simulate outages and slow backends so
//! the partial-failure paths of the workflows can be exercised.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog::FileCatalog;
use crate::error::{CatalogError, CatalogResult, StorageError, StorageResult};
use crate::gateway::{ObjectStorage, check_object_size, check_presign_ttl, expiry_after};
use crate::models::{FileRecord, NewFileRecord, ObjectInfo, PresignedUrl};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// Object store held in process memory
#[derive(Clone)]
pub struct InMemoryObjectStorage {
    bucket: String,
    max_object_bytes: u64,
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    available: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl InMemoryObjectStorage {
    pub fn new(bucket: impl Into<String>, max_object_bytes: u64) -> Self {
        Self {
            bucket: bucket.into(),
            max_object_bytes,
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            latency_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make every subsequent call fail with `Unavailable` (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Whether an object exists under `key`
    pub async fn contains(&self, key: &str) -> bool {
        self.objects.lock().await.contains_key(key)
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Follow a URL produced by `presign` as an anonymous client would at `at`
    pub async fn resolve_presigned(&self, url: &str, at: DateTime<Utc>) -> StorageResult<Bytes> {
        let denied = || StorageError::AccessDenied(url.to_string());

        let rest = url
            .strip_prefix("memory://")
            .and_then(|rest| rest.strip_prefix(self.bucket.as_str()))
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(denied)?;
        let (key, query) = rest.split_once('?').ok_or_else(denied)?;
        let expires: i64 = query
            .strip_prefix("expires=")
            .and_then(|ts| ts.parse().ok())
            .ok_or_else(denied)?;

        if at.timestamp() >= expires {
            return Err(denied());
        }

        self.objects
            .lock()
            .await
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn ready(&self) -> StorageResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "in-memory storage switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn put(&self, key: &str, body: Bytes, size_hint: u64) -> StorageResult<()> {
        self.ready().await?;
        check_object_size(size_hint.max(body.len() as u64), self.max_object_bytes)?;

        self.objects.lock().await.insert(
            key.to_string(),
            StoredObject {
                data: body,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.ready().await?;
        self.objects
            .lock()
            .await
            .get(key)
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ready().await?;
        self.objects
            .lock()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<ObjectInfo>> {
        self.ready().await?;
        let objects = self.objects.lock().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| prefix.is_none_or(|p| key.starts_with(p)))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .collect())
    }

    /// Unlike S3, refuses to sign keys with no object behind them
    async fn presign(&self, key: &str, ttl: Duration) -> StorageResult<PresignedUrl> {
        self.ready().await?;
        check_presign_ttl(ttl)?;
        if !self.objects.lock().await.contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let expires_at = expiry_after(Utc::now(), ttl);
        Ok(PresignedUrl {
            url: format!(
                "memory://{}/{}?expires={}",
                self.bucket,
                key,
                expires_at.timestamp()
            ),
            expires_at,
        })
    }
}

/// File catalog held in process memory, in insertion order
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    records: Arc<Mutex<Vec<FileRecord>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make record and remove calls fail as if the database were down
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> CatalogResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CatalogError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl FileCatalog for InMemoryCatalog {
    async fn record_upload(&self, upload: NewFileRecord) -> CatalogResult<FileRecord> {
        self.check_writable()?;

        let record = FileRecord {
            id: Uuid::new_v4(),
            storage_key: upload.storage_key,
            filename: upload.filename,
            size_bytes: upload.size_bytes,
            uploaded_on: upload.uploaded_on,
            owner_id: upload.owner_id,
        };

        let mut records = self.records.lock().await;
        records.retain(|r| r.storage_key != record.storage_key);
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_key(&self, key: &str) -> CatalogResult<Option<FileRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.storage_key == key).cloned())
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> CatalogResult<Vec<FileRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn remove(&self, key: &str) -> CatalogResult<()> {
        self.check_writable()?;

        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| r.storage_key != key);
        if records.len() == before {
            return Err(CatalogError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn remove_if_uploaded_on(
        &self,
        key: &str,
        uploaded_on: DateTime<Utc>,
    ) -> CatalogResult<bool> {
        self.check_writable()?;

        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|r| !(r.storage_key == key && r.uploaded_on == uploaded_on));
        Ok(records.len() < before)
    }

    async fn list_all(&self) -> CatalogResult<Vec<FileRecord>> {
        Ok(self.records.lock().await.clone())
    }
}

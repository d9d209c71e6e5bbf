//! Reconciliation between the object store and the catalog
//!
//! Uploads write the object before the record and deletes remove the object
//! before the record, so a failure in between leaves one side without the
//! other. A periodic pass removes both kinds of leftovers once they are older
//! than the grace period, which keeps in-flight uploads out of reach.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::catalog::FileCatalog;
use crate::error::StorageError;
use crate::gateway::ObjectStorage;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Objects deleted because no record referenced them
    pub orphaned_objects: Vec<String>,
    /// Records removed because their object was gone
    pub dangling_records: Vec<String>,
    /// Leftovers seen but still inside the grace period
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_objects.is_empty() && self.dangling_records.is_empty()
    }
}

/// Bound on each object store call unless `with_storage_timeout` says otherwise
const DEFAULT_STORAGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Clone)]
pub struct Reconciler {
    storage: Arc<dyn ObjectStorage>,
    catalog: Arc<dyn FileCatalog>,
    grace: Duration,
    storage_timeout: std::time::Duration,
}

impl Reconciler {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        catalog: Arc<dyn FileCatalog>,
        grace: std::time::Duration,
    ) -> Self {
        Self {
            storage,
            catalog,
            grace: Duration::seconds(grace.as_secs() as i64),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.storage_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Unavailable(format!(
                "{} timed out after {:?}",
                operation, self.storage_timeout
            ))),
        }
    }

    /// Run one pass, treating anything last touched before `now - grace` as settled
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let cutoff = now - self.grace;
        let mut report = ReconcileReport::default();

        let objects = self.bounded("list", self.storage.list(None)).await?;
        let records = self.catalog.list_all().await?;

        let recorded: HashMap<&str, DateTime<Utc>> = records
            .iter()
            .map(|r| (r.storage_key.as_str(), r.uploaded_on))
            .collect();
        let stored: HashSet<&str> = objects.iter().map(|o| o.key.as_str()).collect();

        for object in objects.iter().filter(|o| !recorded.contains_key(o.key.as_str())) {
            if object.last_modified > cutoff {
                report.skipped += 1;
                continue;
            }

            // An upload may have completed since the listing
            if self.catalog.find_by_key(&object.key).await?.is_some() {
                continue;
            }

            match self.bounded("delete", self.storage.delete(&object.key)).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {
                    warn!("Removed orphaned object {}", object.key);
                    report.orphaned_objects.push(object.key.clone());
                }
                Err(e) => error!("Failed to remove orphaned object {}: {}", object.key, e),
            }
        }

        for (key, uploaded_on) in recorded.iter().filter(|(key, _)| !stored.contains(*key)) {
            if *uploaded_on > cutoff {
                report.skipped += 1;
                continue;
            }

            // A re-upload since the listing replaces the record, which must survive
            match self.catalog.remove_if_uploaded_on(key, *uploaded_on).await {
                Ok(true) => {
                    warn!("Removed dangling file record {}", key);
                    report.dangling_records.push(key.to_string());
                }
                Ok(false) => info!("File record {} changed during reconciliation, kept", key),
                Err(e) => error!("Failed to remove dangling record {}: {}", key, e),
            }
        }

        report.dangling_records.sort();
        Ok(report)
    }

    /// Schedule `run_once` on a cron expression
    pub async fn start(&self, schedule: &str) -> Result<JobScheduler> {
        let reconciler = self.clone();

        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let reconciler = reconciler.clone();
            Box::pin(async move {
                info!("Reconciliation job executed");
                match reconciler.run_once(Utc::now()).await {
                    Ok(report) if report.is_clean() => {
                        info!("Reconciliation found nothing to repair ({} pending)", report.skipped)
                    }
                    Ok(report) => info!(
                        "Reconciliation removed {} orphaned objects and {} dangling records",
                        report.orphaned_objects.len(),
                        report.dangling_records.len()
                    ),
                    Err(e) => error!("Reconciliation failed: {}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started reconciliation scheduler with schedule: {}", schedule);
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogResult;
    use crate::memory::{InMemoryCatalog, InMemoryObjectStorage};
    use crate::models::{FileRecord, NewFileRecord};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    const GRACE: std::time::Duration = std::time::Duration::from_secs(600);

    fn setup() -> (InMemoryObjectStorage, InMemoryCatalog, Reconciler) {
        let storage = InMemoryObjectStorage::new("bucket", 1024);
        let catalog = InMemoryCatalog::new();
        let reconciler = Reconciler::new(
            Arc::new(storage.clone()),
            Arc::new(catalog.clone()),
            GRACE,
        );
        (storage, catalog, reconciler)
    }

    fn record(owner_id: Uuid, key: &str, uploaded_on: DateTime<Utc>) -> NewFileRecord {
        NewFileRecord {
            owner_id,
            storage_key: key.to_string(),
            filename: "a.txt".to_string(),
            size_bytes: 1,
            uploaded_on,
        }
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::seconds(GRACE.as_secs() as i64 + 1)
    }

    #[tokio::test]
    async fn consistent_state_is_left_alone() {
        let (storage, catalog, reconciler) = setup();
        let owner = Uuid::new_v4();
        storage.put("o/a.txt", Bytes::from_static(b"x"), 1).await.unwrap();
        catalog
            .record_upload(record(owner, "o/a.txt", Utc::now()))
            .await
            .unwrap();

        let report = reconciler.run_once(later()).await.unwrap();
        assert!(report.is_clean());
        assert!(storage.contains("o/a.txt").await);
        assert!(catalog.find_by_key("o/a.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn orphaned_objects_are_removed_after_grace() {
        let (storage, _catalog, reconciler) = setup();
        storage.put("o/lost.txt", Bytes::from_static(b"x"), 1).await.unwrap();

        let early = reconciler.run_once(Utc::now()).await.unwrap();
        assert!(early.is_clean());
        assert_eq!(early.skipped, 1);
        assert!(storage.contains("o/lost.txt").await);

        let report = reconciler.run_once(later()).await.unwrap();
        assert_eq!(report.orphaned_objects, vec!["o/lost.txt".to_string()]);
        assert!(!storage.contains("o/lost.txt").await);
    }

    #[tokio::test]
    async fn dangling_records_are_removed_after_grace() {
        let (_storage, catalog, reconciler) = setup();
        let owner = Uuid::new_v4();
        catalog
            .record_upload(record(owner, "o/gone.txt", Utc::now()))
            .await
            .unwrap();

        assert!(reconciler.run_once(Utc::now()).await.unwrap().is_clean());

        let report = reconciler.run_once(later()).await.unwrap();
        assert_eq!(report.dangling_records, vec!["o/gone.txt".to_string()]);
        assert!(catalog.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_outage_fails_the_pass() {
        let (storage, _catalog, reconciler) = setup();
        storage.set_available(false);
        assert!(reconciler.run_once(later()).await.is_err());
    }

    /// Catalog that lets a re-upload land right after the reconciler lists it
    struct ReuploadDuringListing {
        inner: InMemoryCatalog,
        storage: InMemoryObjectStorage,
        reupload: NewFileRecord,
        fired: AtomicBool,
    }

    #[async_trait]
    impl FileCatalog for ReuploadDuringListing {
        async fn record_upload(&self, upload: NewFileRecord) -> CatalogResult<FileRecord> {
            self.inner.record_upload(upload).await
        }

        async fn find_by_key(&self, key: &str) -> CatalogResult<Option<FileRecord>> {
            self.inner.find_by_key(key).await
        }

        async fn list_for_owner(&self, owner_id: Uuid) -> CatalogResult<Vec<FileRecord>> {
            self.inner.list_for_owner(owner_id).await
        }

        async fn remove(&self, key: &str) -> CatalogResult<()> {
            self.inner.remove(key).await
        }

        async fn remove_if_uploaded_on(
            &self,
            key: &str,
            uploaded_on: DateTime<Utc>,
        ) -> CatalogResult<bool> {
            self.inner.remove_if_uploaded_on(key, uploaded_on).await
        }

        async fn list_all(&self) -> CatalogResult<Vec<FileRecord>> {
            let snapshot = self.inner.list_all().await?;
            if !self.fired.swap(true, Ordering::SeqCst) {
                let key = self.reupload.storage_key.clone();
                self.storage
                    .put(&key, Bytes::from_static(b"fresh"), 5)
                    .await
                    .unwrap();
                self.inner.record_upload(self.reupload.clone()).await?;
            }
            Ok(snapshot)
        }
    }

    #[tokio::test]
    async fn reupload_during_a_pass_survives() {
        let storage = InMemoryObjectStorage::new("bucket", 1024);
        let inner = InMemoryCatalog::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        inner
            .record_upload(record(owner, "o/a.txt", now - Duration::days(1)))
            .await
            .unwrap();

        let catalog = Arc::new(ReuploadDuringListing {
            inner: inner.clone(),
            storage: storage.clone(),
            reupload: record(owner, "o/a.txt", now),
            fired: AtomicBool::new(false),
        });
        let reconciler = Reconciler::new(Arc::new(storage.clone()), catalog, GRACE);

        let report = reconciler.run_once(now).await.unwrap();
        assert!(report.dangling_records.is_empty());
        assert!(storage.contains("o/a.txt").await);
        let kept = inner.find_by_key("o/a.txt").await.unwrap().unwrap();
        assert_eq!(kept.uploaded_on, now);

        let next = reconciler.run_once(now).await.unwrap();
        assert!(next.is_clean());
        assert!(storage.contains("o/a.txt").await);
    }

    #[tokio::test]
    async fn stalled_storage_fails_the_pass_promptly() {
        let (storage, _catalog, reconciler) = setup();
        let reconciler = reconciler.with_storage_timeout(std::time::Duration::from_millis(50));
        storage.set_latency(std::time::Duration::from_secs(30));

        let outcome =
            tokio::time::timeout(std::time::Duration::from_secs(2), reconciler.run_once(later()))
                .await;
        assert!(matches!(outcome, Ok(Err(_))));
    }
}

//! Upload, download, listing and deletion of a user's files
//!
//! Uploads store the object before recording it and deletes remove the
//! object before the record. Whatever a failure in between leaves behind is
//! cleaned up by the reconciler.

use bytes::Bytes;
use chrono::Utc;
use storage::keys::{sanitize_filename, storage_key};
use storage::{CatalogError, FileRecord, NewFileRecord, StorageError};
use tracing::{error, info, warn};

use super::{Caller, WorkflowError, WorkflowResult, Workflows};

impl Workflows {
    pub async fn upload_file(
        &self,
        caller: Caller,
        filename: &str,
        data: Bytes,
    ) -> WorkflowResult<FileRecord> {
        let user = self.confirmed_user(caller).await?;

        let filename = sanitize_filename(filename)
            .ok_or_else(|| WorkflowError::Validation("Filename is empty or invalid".to_string()))?;
        let key = storage_key(user.id, &filename);
        let size = data.len() as u64;

        self.storage_call("put", self.storage.put(&key, data, size))
            .await?;

        let record = self
            .catalog
            .record_upload(NewFileRecord {
                owner_id: user.id,
                storage_key: key.clone(),
                filename,
                size_bytes: size,
                uploaded_on: Utc::now(),
            })
            .await
            .map_err(|e| {
                error!("Stored {} but failed to record it: {}", key, e);
                WorkflowError::CatalogInconsistent
            })?;

        info!("User {} uploaded {} ({} bytes)", user.id, key, size);
        Ok(record)
    }

    /// The caller's files, oldest upload first
    pub async fn list_files(&self, caller: Caller) -> WorkflowResult<Vec<FileRecord>> {
        let user = self.confirmed_user(caller).await?;
        Ok(self.catalog.list_for_owner(user.id).await?)
    }

    pub async fn download_file(&self, caller: Caller, key: &str) -> WorkflowResult<(FileRecord, Bytes)> {
        let record = self.owned_record(caller, key).await?;
        let data = self.storage_call("get", self.storage.get(key)).await?;
        Ok((record, data))
    }

    pub async fn delete_file(&self, caller: Caller, key: &str) -> WorkflowResult<()> {
        let record = self.owned_record(caller, key).await?;

        self.storage_call("delete", async {
            match self.storage.delete(key).await {
                Err(StorageError::NotFound(_)) => {
                    warn!("Object {} was already gone, removing its record", key);
                    Ok(())
                }
                other => other,
            }
        })
        .await?;

        match self.catalog.remove(&record.storage_key).await {
            Ok(()) | Err(CatalogError::NotFound(_)) => {
                info!("User {} deleted {}", caller.user_id, key);
                Ok(())
            }
            Err(e) => {
                error!("Deleted {} but failed to remove its record: {}", key, e);
                Err(WorkflowError::CatalogInconsistent)
            }
        }
    }

    /// The record for `key`, which must belong to a confirmed caller
    pub(crate) async fn owned_record(&self, caller: Caller, key: &str) -> WorkflowResult<FileRecord> {
        let user = self.confirmed_user(caller).await?;

        let record = self
            .catalog
            .find_by_key(key)
            .await?
            .ok_or(WorkflowError::NotFound)?;

        if record.owner_id != user.id {
            warn!("User {} tried to access {} owned by {}", user.id, key, record.owner_id);
            return Err(WorkflowError::NotOwner);
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use auth::UserStore;
    use storage::{FileCatalog, ObjectStorage};
    use storage::reconciler::Reconciler;
    use std::sync::Arc;

    use super::*;
    use crate::workflow::testing::{Harness, MAX_OBJECT_BYTES};

    #[tokio::test]
    async fn upload_then_list_and_download() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;

        let record = h
            .workflows
            .upload_file(alice, "report.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();
        assert_eq!(record.storage_key, format!("{}/report.pdf", alice.user_id));
        assert_eq!(record.size_bytes, 4);

        let files = h.workflows.list_files(alice).await.unwrap();
        assert_eq!(files, vec![record.clone()]);

        let (found, data) = h
            .workflows
            .download_file(alice, &record.storage_key)
            .await
            .unwrap();
        assert_eq!(found, record);
        assert_eq!(data, Bytes::from_static(b"%PDF"));
    }

    #[tokio::test]
    async fn same_filename_from_two_users_does_not_collide() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;
        let bob = h.confirmed_caller("bob").await;

        let a = h
            .workflows
            .upload_file(alice, "notes.txt", Bytes::from_static(b"alice"))
            .await
            .unwrap();
        let b = h
            .workflows
            .upload_file(bob, "notes.txt", Bytes::from_static(b"bob"))
            .await
            .unwrap();

        assert_ne!(a.storage_key, b.storage_key);
        assert_eq!(h.storage.get(&a.storage_key).await.unwrap(), Bytes::from_static(b"alice"));
        assert_eq!(h.storage.get(&b.storage_key).await.unwrap(), Bytes::from_static(b"bob"));
    }

    #[tokio::test]
    async fn unconfirmed_users_cannot_touch_files() {
        let h = Harness::new();
        let user = h.workflows.register("carol", "c@x.com", "pw1").await.unwrap();
        let carol = Caller { user_id: user.id };

        assert!(matches!(
            h.workflows
                .upload_file(carol, "a.txt", Bytes::from_static(b"x"))
                .await,
            Err(WorkflowError::Unconfirmed)
        ));
        assert!(matches!(
            h.workflows.list_files(carol).await,
            Err(WorkflowError::Unconfirmed)
        ));
        assert_eq!(h.storage.len().await, 0);
    }

    #[tokio::test]
    async fn invalid_filenames_are_rejected() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;

        assert!(matches!(
            h.workflows
                .upload_file(alice, "../", Bytes::from_static(b"x"))
                .await,
            Err(WorkflowError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn oversized_uploads_exceed_the_quota() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;
        let data = Bytes::from(vec![0u8; MAX_OBJECT_BYTES as usize + 1]);

        assert!(matches!(
            h.workflows.upload_file(alice, "big.bin", data).await,
            Err(WorkflowError::QuotaExceeded { .. })
        ));
        assert!(h.catalog.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_outage_and_timeout_surface_as_unavailable() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;

        h.storage.set_available(false);
        assert!(matches!(
            h.workflows
                .upload_file(alice, "a.txt", Bytes::from_static(b"x"))
                .await,
            Err(WorkflowError::StorageUnavailable)
        ));

        h.storage.set_available(true);
        h.storage.set_latency(Duration::from_secs(5));
        assert!(matches!(
            h.workflows
                .upload_file(alice, "a.txt", Bytes::from_static(b"x"))
                .await,
            Err(WorkflowError::StorageUnavailable)
        ));
        assert!(h.catalog.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_anothers_file_leaves_it_intact() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;
        let bob = h.confirmed_caller("bob").await;

        let record = h
            .workflows
            .upload_file(alice, "secret.txt", Bytes::from_static(b"s"))
            .await
            .unwrap();

        assert!(matches!(
            h.workflows.delete_file(bob, &record.storage_key).await,
            Err(WorkflowError::NotOwner)
        ));
        assert!(matches!(
            h.workflows.download_file(bob, &record.storage_key).await,
            Err(WorkflowError::NotOwner)
        ));
        assert!(h.storage.contains(&record.storage_key).await);
        assert!(
            h.catalog
                .find_by_key(&record.storage_key)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn delete_removes_object_and_record() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;
        let record = h
            .workflows
            .upload_file(alice, "a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();

        h.workflows
            .delete_file(alice, &record.storage_key)
            .await
            .unwrap();

        assert!(!h.storage.contains(&record.storage_key).await);
        assert!(h.workflows.list_files(alice).await.unwrap().is_empty());
        assert!(matches!(
            h.workflows.delete_file(alice, &record.storage_key).await,
            Err(WorkflowError::NotFound)
        ));
    }

    #[tokio::test]
    async fn delete_with_missing_object_still_removes_the_record() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;
        let record = h
            .workflows
            .upload_file(alice, "a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        h.storage.delete(&record.storage_key).await.unwrap();

        h.workflows
            .delete_file(alice, &record.storage_key)
            .await
            .unwrap();
        assert!(h.workflows.list_files(alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn catalog_failure_after_upload_is_reconciled() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;

        h.catalog.set_fail_writes(true);
        let result = h
            .workflows
            .upload_file(alice, "orphan.txt", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(WorkflowError::CatalogInconsistent)));

        let key = storage_key(alice.user_id, "orphan.txt");
        assert!(h.storage.contains(&key).await);
        h.catalog.set_fail_writes(false);

        let reconciler = Reconciler::new(
            Arc::new(h.storage.clone()),
            Arc::new(h.catalog.clone()),
            Duration::from_secs(60),
        );
        let report = reconciler
            .run_once(Utc::now() + chrono::Duration::seconds(120))
            .await
            .unwrap();

        assert_eq!(report.orphaned_objects, vec![key.clone()]);
        assert!(!h.storage.contains(&key).await);
    }

    #[tokio::test]
    async fn catalog_failure_after_delete_is_reported() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;
        let record = h
            .workflows
            .upload_file(alice, "a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();

        h.catalog.set_fail_writes(true);
        assert!(matches!(
            h.workflows.delete_file(alice, &record.storage_key).await,
            Err(WorkflowError::CatalogInconsistent)
        ));
        assert!(!h.storage.contains(&record.storage_key).await);
    }

    #[tokio::test]
    async fn unknown_callers_are_refused() {
        let h = Harness::new();
        let alice = h.confirmed_caller("alice").await;
        assert!(h.workflows.users.find_by_id(alice.user_id).await.unwrap().is_some());

        let ghost = Caller {
            user_id: uuid::Uuid::new_v4(),
        };
        assert!(matches!(
            h.workflows.list_files(ghost).await,
            Err(WorkflowError::Unconfirmed)
        ));
    }
}

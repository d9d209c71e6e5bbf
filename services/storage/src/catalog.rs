//! File metadata catalog
//!
//! The catalog is the source of truth for who owns what. A record is written
//! only after its object has been stored and removed only after its object
//! has been deleted; the workflows in the API service enforce that order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use crate::error::{CatalogError, CatalogResult};
use crate::models::{FileRecord, NewFileRecord};

/// Persistence for file records
#[async_trait]
pub trait FileCatalog: Send + Sync {
    /// Record a completed upload. A second upload under the same key replaces
    /// the earlier record (last write wins).
    async fn record_upload(&self, upload: NewFileRecord) -> CatalogResult<FileRecord>;

    async fn find_by_key(&self, key: &str) -> CatalogResult<Option<FileRecord>>;

    /// Records owned by `owner_id`, oldest upload first
    async fn list_for_owner(&self, owner_id: Uuid) -> CatalogResult<Vec<FileRecord>>;

    /// Remove the record for `key`; `NotFound` when there is none
    async fn remove(&self, key: &str) -> CatalogResult<()>;

    /// Remove the record for `key` only if it still carries `uploaded_on`.
    /// Returns false when the record is gone or has been replaced.
    async fn remove_if_uploaded_on(
        &self,
        key: &str,
        uploaded_on: DateTime<Utc>,
    ) -> CatalogResult<bool>;

    /// Every record, for reconciliation against the object store
    async fn list_all(&self) -> CatalogResult<Vec<FileRecord>>;

    /// Storage keys of every record
    async fn list_keys(&self) -> CatalogResult<Vec<String>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .map(|record| record.storage_key)
            .collect())
    }
}

/// Postgres-backed file catalog
#[derive(Clone)]
pub struct FileRepository {
    pool: PgPool,
}

const FILE_COLUMNS: &str = "id, storage_key, filename, size_bytes, uploaded_on, user_id";

impl FileRepository {
    /// Create a new file repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> FileRecord {
        let size_bytes: i64 = row.get("size_bytes");
        FileRecord {
            id: row.get("id"),
            storage_key: row.get("storage_key"),
            filename: row.get("filename"),
            size_bytes: size_bytes.max(0) as u64,
            uploaded_on: row.get("uploaded_on"),
            owner_id: row.get("user_id"),
        }
    }
}

#[async_trait]
impl FileCatalog for FileRepository {
    async fn record_upload(&self, upload: NewFileRecord) -> CatalogResult<FileRecord> {
        info!(
            "Recording upload {} for user {}",
            upload.storage_key, upload.owner_id
        );

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO files (id, storage_key, filename, size_bytes, uploaded_on, user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (storage_key) DO UPDATE SET
                id = EXCLUDED.id,
                filename = EXCLUDED.filename,
                size_bytes = EXCLUDED.size_bytes,
                uploaded_on = EXCLUDED.uploaded_on,
                user_id = EXCLUDED.user_id
            RETURNING {}
            "#,
            FILE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&upload.storage_key)
        .bind(&upload.filename)
        .bind(upload.size_bytes as i64)
        .bind(upload.uploaded_on)
        .bind(upload.owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::record_from_row(&row))
    }

    async fn find_by_key(&self, key: &str) -> CatalogResult<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM files WHERE storage_key = $1",
            FILE_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::record_from_row))
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> CatalogResult<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files WHERE user_id = $1 ORDER BY uploaded_on ASC, id ASC",
            FILE_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }

    async fn remove(&self, key: &str) -> CatalogResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE storage_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(key.to_string()));
        }

        info!("Removed file record {}", key);
        Ok(())
    }

    async fn remove_if_uploaded_on(
        &self,
        key: &str,
        uploaded_on: DateTime<Utc>,
    ) -> CatalogResult<bool> {
        let result = sqlx::query("DELETE FROM files WHERE storage_key = $1 AND uploaded_on = $2")
            .bind(key)
            .bind(uploaded_on)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!("Removed file record {}", key);
        }
        Ok(removed)
    }

    async fn list_all(&self) -> CatalogResult<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files ORDER BY uploaded_on ASC, id ASC",
            FILE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }
}

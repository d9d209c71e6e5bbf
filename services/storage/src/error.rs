//! Error types for the storage gateway and the catalog

use thiserror::Error;

/// Failures raised by the storage gateway
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object under this key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The backend could not be reached, failed, or timed out
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The object is larger than the backend accepts
    #[error("Object of {size} bytes exceeds the {limit} byte limit")]
    QuotaExceeded { size: u64, limit: u64 },

    /// The backend refused access to the object
    #[error("Access denied: {0}")]
    AccessDenied(String),
}

/// Type alias for storage results
pub type StorageResult<T> = Result<T, StorageError>;

/// Failures raised by the file catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    /// No record under this storage key
    #[error("File record not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Type alias for catalog results
pub type CatalogResult<T> = Result<T, CatalogError>;

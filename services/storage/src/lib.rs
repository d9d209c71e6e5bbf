//! File storage for filevault
//!
//! Three pieces live here: the storage gateway over the object store, the
//! metadata catalog that records who owns which object, and the reconciler
//! that converges the two after partial failures.

pub mod catalog;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod models;
pub mod reconciler;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use catalog::{FileCatalog, FileRepository};
pub use error::{CatalogError, CatalogResult, StorageError, StorageResult};
pub use gateway::{ObjectStorage, S3Config, S3Gateway};
pub use models::{FileRecord, NewFileRecord, ObjectInfo, PresignedUrl};
pub use reconciler::{ReconcileReport, Reconciler};

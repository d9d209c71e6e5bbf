use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog entry for one stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub storage_key: String,
    pub filename: String,
    pub size_bytes: u64,
    pub uploaded_on: DateTime<Utc>,
    pub owner_id: Uuid,
}

/// Payload for recording a completed upload
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub owner_id: Uuid,
    pub storage_key: String,
    pub filename: String,
    pub size_bytes: u64,
    pub uploaded_on: DateTime<Utc>,
}

/// An object as listed by the storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// A bearer URL granting read access to one object until `expires_at`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

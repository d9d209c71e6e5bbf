//! Application state shared across handlers

use std::sync::Arc;

use sqlx::PgPool;

use crate::{sessions::RevocationList, workflow::Workflows};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub workflows: Workflows,
    pub revocations: Arc<dyn RevocationList>,
    /// Probed by the health endpoint; absent when running without Postgres
    pub db_pool: Option<PgPool>,
    pub max_upload_bytes: usize,
}

//! Account, file and sharing workflows
//!
//! Every operation takes an explicit `Caller` where a signed-in user is
//! needed and reports failures through `WorkflowError`. Calls to the object
//! store and the mail API are bounded by the configured timeouts.

pub mod account;
pub mod files;
pub mod sharing;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use auth::{IdentityError, TokenError, TokenService, User, UserStore, rate_limiter::RateLimiter};
use storage::{CatalogError, FileCatalog, ObjectStorage, StorageError};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::mailer::{Email, MailError, Mailer};

/// The signed-in user an operation acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Username is already taken")]
    DuplicateUsername,

    #[error("Email is already registered")]
    DuplicateEmail,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Token is invalid")]
    TokenInvalid,

    #[error("Token has expired")]
    TokenExpired,

    #[error("File belongs to another user")]
    NotOwner,

    #[error("Not found")]
    NotFound,

    #[error("Storage is unavailable")]
    StorageUnavailable,

    #[error("File is too large: {size} bytes exceeds the {limit} byte limit")]
    QuotaExceeded { size: u64, limit: u64 },

    #[error("Email could not be sent")]
    NotificationFailed,

    /// The object store and the catalog disagree until the next reconciliation
    #[error("File storage is in an inconsistent state")]
    CatalogInconsistent,

    #[error("Please confirm your email address first")]
    Unconfirmed,

    #[error("Too many failed attempts, try again later")]
    RateLimited,

    #[error("{0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl From<IdentityError> for WorkflowError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::DuplicateUsername => WorkflowError::DuplicateUsername,
            IdentityError::DuplicateEmail => WorkflowError::DuplicateEmail,
            IdentityError::InvalidCredentials => WorkflowError::InvalidCredentials,
            IdentityError::UserNotFound(_) => WorkflowError::NotFound,
            IdentityError::Hashing(e) => WorkflowError::Internal(e),
            IdentityError::Database(e) => {
                error!("Identity store failure: {}", e);
                WorkflowError::Internal(e.to_string())
            }
        }
    }
}

impl From<TokenError> for WorkflowError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => WorkflowError::TokenInvalid,
            TokenError::Expired => WorkflowError::TokenExpired,
            other => WorkflowError::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for WorkflowError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => WorkflowError::NotFound,
            StorageError::QuotaExceeded { size, limit } => {
                WorkflowError::QuotaExceeded { size, limit }
            }
            StorageError::Unavailable(_) | StorageError::AccessDenied(_) => {
                WorkflowError::StorageUnavailable
            }
        }
    }
}

impl From<CatalogError> for WorkflowError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(_) => WorkflowError::NotFound,
            CatalogError::Database(e) => {
                error!("Catalog failure: {}", e);
                WorkflowError::Internal(e.to_string())
            }
        }
    }
}

impl From<MailError> for WorkflowError {
    fn from(_: MailError) -> Self {
        WorkflowError::NotificationFailed
    }
}

/// Limits and addresses the workflows work with
#[derive(Debug, Clone)]
pub struct Policy {
    /// Base of links put in emails, without a trailing slash
    pub public_base_url: String,
    pub mail_sender: String,
    pub share_link_ttl: Duration,
    pub storage_timeout: Duration,
    pub mail_timeout: Duration,
}

/// Shared handles for every workflow
#[derive(Clone)]
pub struct Workflows {
    pub users: Arc<dyn UserStore>,
    pub tokens: TokenService,
    pub catalog: Arc<dyn FileCatalog>,
    pub storage: Arc<dyn ObjectStorage>,
    pub mailer: Arc<dyn Mailer>,
    pub login_limiter: RateLimiter,
    pub policy: Policy,
}

impl Workflows {
    /// Run a storage call under the storage timeout
    async fn storage_call<T, F>(&self, operation: &str, call: F) -> WorkflowResult<T>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.policy.storage_timeout, call).await {
            Ok(result) => result.map_err(WorkflowError::from),
            Err(_) => {
                error!(
                    "Storage {} timed out after {:?}",
                    operation, self.policy.storage_timeout
                );
                Err(WorkflowError::StorageUnavailable)
            }
        }
    }

    /// Send an email under the mail timeout
    async fn notify(&self, email: &Email) -> WorkflowResult<()> {
        match tokio::time::timeout(self.policy.mail_timeout, self.mailer.send(email)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Failed to send \"{}\": {}", email.subject, e);
                Err(WorkflowError::NotificationFailed)
            }
            Err(_) => {
                error!(
                    "Sending \"{}\" timed out after {:?}",
                    email.subject, self.policy.mail_timeout
                );
                Err(WorkflowError::NotificationFailed)
            }
        }
    }

    fn link(&self, path: &str) -> String {
        format!("{}{}", self.policy.public_base_url.trim_end_matches('/'), path)
    }

    /// The caller's user record, which must exist and be confirmed
    async fn confirmed_user(&self, caller: Caller) -> WorkflowResult<User> {
        match self.users.find_by_id(caller.user_id).await? {
            Some(user) if user.confirmed() => Ok(user),
            _ => Err(WorkflowError::Unconfirmed),
        }
    }
}


#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Utc;

    use super::sharing::ShareRequest;
    use super::testing::Harness;
    use super::*;

    #[tokio::test]
    async fn register_confirm_upload_share_delete() {
        let h = Harness::new();
        let w = &h.workflows;

        w.register("alice", "a@x.com", "pw1").await.unwrap();
        let confirm = h.mailer.last_link_to("a@x.com").await.unwrap();
        let token = confirm.rsplit('/').next().unwrap();
        w.confirm_email(token).await.unwrap();

        let session = w.login("alice", "pw1").await.unwrap();
        let alice = Caller {
            user_id: session.user.id,
        };

        let record = w
            .upload_file(alice, "report.pdf", Bytes::from(vec![7u8; 1024]))
            .await
            .unwrap();
        let listed = w.list_files(alice).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].filename, "report.pdf");
        assert_eq!(listed[0].owner_id, alice.user_id);
        assert_eq!(listed[0].size_bytes, 1024);

        let emails_before = h.mailer.sent().await.len();
        let receipt = w
            .share_file(
                alice,
                ShareRequest {
                    key: record.storage_key.clone(),
                    recipient: "bob@x.com".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(h.mailer.sent().await.len(), emails_before + 1);

        let link = h.mailer.last_link_to("bob@x.com").await.unwrap();
        let lifetime = receipt.expires_at - Utc::now();
        assert!(lifetime.num_seconds() >= 3590);
        let inside = receipt.expires_at - chrono::Duration::seconds(1);
        assert_eq!(h.storage.resolve_presigned(&link, inside).await.unwrap().len(), 1024);
        assert!(h.storage.resolve_presigned(&link, receipt.expires_at).await.is_err());

        w.delete_file(alice, &record.storage_key).await.unwrap();
        assert!(!h.storage.contains(&record.storage_key).await);
        assert!(w.list_files(alice).await.unwrap().is_empty());
    }
}

//! Sharing a file by emailing a time-limited download link
//!
//! A share moves through `Requested`, `Authorized`, `LinkGenerated` and
//! `Notified` before it is `Complete`. Any step can end it as `Rejected`.
//! Nothing is persisted; the link itself carries its expiry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{FileRecord, PresignedUrl};
use tracing::{info, warn};

use auth::User;
use auth::validation::validate_email;

use super::{Caller, WorkflowError, WorkflowResult, Workflows};
use crate::mailer::Email;

#[derive(Debug, Clone, Deserialize)]
pub struct ShareRequest {
    pub key: String,
    pub recipient: String,
}

/// What the sharer gets back once the link has been sent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareReceipt {
    pub key: String,
    pub recipient: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum ShareStage {
    Requested(ShareRequest),
    Authorized {
        request: ShareRequest,
        owner: User,
        record: FileRecord,
    },
    LinkGenerated {
        request: ShareRequest,
        owner: User,
        record: FileRecord,
        link: PresignedUrl,
    },
    Notified {
        request: ShareRequest,
        link: PresignedUrl,
    },
    Complete(ShareReceipt),
    Rejected(WorkflowError),
}

impl ShareStage {
    pub fn name(&self) -> &'static str {
        match self {
            ShareStage::Requested(_) => "requested",
            ShareStage::Authorized { .. } => "authorized",
            ShareStage::LinkGenerated { .. } => "link_generated",
            ShareStage::Notified { .. } => "notified",
            ShareStage::Complete(_) => "complete",
            ShareStage::Rejected(_) => "rejected",
        }
    }
}

impl Workflows {
    /// Share one of the caller's files with `request.recipient`
    pub async fn share_file(&self, caller: Caller, request: ShareRequest) -> WorkflowResult<ShareReceipt> {
        let mut stage = ShareStage::Requested(request);

        loop {
            match stage {
                ShareStage::Complete(receipt) => return Ok(receipt),
                ShareStage::Rejected(reason) => {
                    warn!("Share for user {} rejected: {}", caller.user_id, reason);
                    return Err(reason);
                }
                pending => {
                    let from = pending.name();
                    stage = self.advance_share(caller, pending).await;
                    info!(
                        "Share for user {} moved from {} to {}",
                        caller.user_id,
                        from,
                        stage.name()
                    );
                }
            }
        }
    }

    /// Perform the work of one stage and return the next one
    pub async fn advance_share(&self, caller: Caller, stage: ShareStage) -> ShareStage {
        match stage {
            ShareStage::Requested(request) => {
                if let Err(message) = validate_email(&request.recipient) {
                    return ShareStage::Rejected(WorkflowError::Validation(message));
                }

                let owner = match self.confirmed_user(caller).await {
                    Ok(owner) => owner,
                    Err(e) => return ShareStage::Rejected(e),
                };
                match self.owned_record(caller, &request.key).await {
                    Ok(record) => ShareStage::Authorized {
                        request,
                        owner,
                        record,
                    },
                    Err(e) => ShareStage::Rejected(e),
                }
            }
            ShareStage::Authorized {
                request,
                owner,
                record,
            } => {
                let ttl = self.policy.share_link_ttl;
                match self
                    .storage_call("presign", self.storage.presign(&record.storage_key, ttl))
                    .await
                {
                    Ok(link) => ShareStage::LinkGenerated {
                        request,
                        owner,
                        record,
                        link,
                    },
                    Err(WorkflowError::NotFound) => {
                        warn!(
                            "File record {} has no stored object, refusing to share it",
                            record.storage_key
                        );
                        ShareStage::Rejected(WorkflowError::StorageUnavailable)
                    }
                    Err(e) => ShareStage::Rejected(e),
                }
            }
            ShareStage::LinkGenerated {
                request,
                owner,
                record,
                link,
            } => {
                let email = Email::share(
                    &self.policy.mail_sender,
                    &request.recipient,
                    &owner.username,
                    &record.filename,
                    &link.url,
                );
                match self.notify(&email).await {
                    Ok(()) => ShareStage::Notified { request, link },
                    Err(e) => ShareStage::Rejected(e),
                }
            }
            ShareStage::Notified { request, link } => ShareStage::Complete(ShareReceipt {
                key: request.key,
                recipient: request.recipient,
                expires_at: link.expires_at,
            }),
            done @ (ShareStage::Complete(_) | ShareStage::Rejected(_)) => done,
        }
    }
}

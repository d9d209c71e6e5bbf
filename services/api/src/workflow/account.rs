//! Registration, login, email confirmation and password reset

use auth::models::normalize_email;
use auth::{Confirmation, NewUser, TokenPurpose, User};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Caller, WorkflowError, WorkflowResult, Workflows};
use crate::mailer::Email;

/// Bearer session handed out on login
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

/// Outcome of asking for another confirmation email
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resend {
    Sent,
    AlreadyConfirmed,
}

impl Workflows {
    /// Create an unconfirmed account and email its confirmation link.
    ///
    /// The account is kept when the email cannot be sent; the caller gets
    /// `NotificationFailed` and can ask for the link again after logging in.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> WorkflowResult<User> {
        let user = self
            .users
            .register(&NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;

        self.send_confirmation(&user).await?;
        Ok(user)
    }

    /// Check credentials and open a session
    pub async fn login(&self, username: &str, password: &str) -> WorkflowResult<Session> {
        if !self.login_limiter.is_allowed(username).await {
            warn!("Login for {} refused by rate limiter", username);
            return Err(WorkflowError::RateLimited);
        }

        let user = match self.users.authenticate(username, password).await {
            Ok(user) => user,
            Err(e) => {
                self.login_limiter.record_failure(username).await;
                return Err(e.into());
            }
        };
        self.login_limiter.record_success(username).await;

        let token = self
            .tokens
            .issue_default(TokenPurpose::Session, &user.id.to_string())?;
        let claims = self.tokens.verify_claims(TokenPurpose::Session, &token)?;
        let expires_at = DateTime::from_timestamp(claims.exp as i64, 0)
            .ok_or_else(|| WorkflowError::Internal("session expiry out of range".to_string()))?;

        info!("User {} logged in", user.id);
        Ok(Session {
            token,
            expires_at,
            user,
        })
    }

    /// Confirm the email address a confirmation token was issued for.
    /// Confirming twice is reported, not rejected.
    pub async fn confirm_email(&self, token: &str) -> WorkflowResult<Confirmation> {
        let email = self.tokens.verify(TokenPurpose::EmailConfirmation, token)?;

        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(WorkflowError::TokenInvalid)?;

        Ok(self.users.mark_confirmed(user.id).await?)
    }

    /// Send a fresh confirmation link to an unconfirmed caller
    pub async fn resend_confirmation(&self, caller: Caller) -> WorkflowResult<Resend> {
        let user = self
            .users
            .find_by_id(caller.user_id)
            .await?
            .ok_or(WorkflowError::NotFound)?;

        if user.confirmed() {
            return Ok(Resend::AlreadyConfirmed);
        }

        self.send_confirmation(&user).await?;
        Ok(Resend::Sent)
    }

    /// Email a reset link if the address belongs to an account.
    ///
    /// Unknown addresses succeed silently so the endpoint cannot be used to
    /// find out who has an account.
    pub async fn request_password_reset(&self, email: &str) -> WorkflowResult<()> {
        let Some(user) = self.users.find_by_email(&normalize_email(email)).await? else {
            info!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = self
            .tokens
            .issue_default(TokenPurpose::PasswordReset, &user.id.to_string())?;
        let link = self.link(&format!("/auth/password-reset/{}", token));

        self.notify(&Email::password_reset(
            &self.policy.mail_sender,
            &user.email,
            &link,
            self.tokens.ttl(TokenPurpose::PasswordReset),
        ))
        .await?;

        info!("Password reset link sent to user {}", user.id);
        Ok(())
    }

    /// Replace the password of the user a reset token was issued for
    pub async fn reset_password(&self, token: &str, new_password: &str) -> WorkflowResult<()> {
        let subject = self.tokens.verify(TokenPurpose::PasswordReset, token)?;
        let user_id = Uuid::parse_str(&subject).map_err(|_| WorkflowError::TokenInvalid)?;

        self.users
            .set_password(user_id, new_password)
            .await
            .map_err(|e| match e {
                auth::IdentityError::UserNotFound(_) => WorkflowError::TokenInvalid,
                other => other.into(),
            })?;

        info!("Password reset for user {}", user_id);
        Ok(())
    }

    async fn send_confirmation(&self, user: &User) -> WorkflowResult<()> {
        let token = self
            .tokens
            .issue_default(TokenPurpose::EmailConfirmation, &user.email)?;
        let link = self.link(&format!("/auth/confirm/{}", token));

        self.notify(&Email::confirmation(&self.policy.mail_sender, &user.email, &link))
            .await
    }
}

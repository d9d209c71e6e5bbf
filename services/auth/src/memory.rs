//! In-memory user store
//!
//! Available behind the `test-util` feature or in `#[cfg(test)]` within this
//! crate. Uniqueness checks and inserts happen under one lock, matching the
//! guarantees the Postgres constraints give the real repository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{Confirmation, User, normalize_email};
use crate::repositories::UserStore;

#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<Mutex<Vec<User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored user
    pub async fn all(&self) -> Vec<User> {
        self.users.lock().await.clone()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: User) -> IdentityResult<User> {
        let mut users = self.users.lock().await;

        if users.iter().any(|u| u.username == user.username) {
            return Err(IdentityError::DuplicateUsername);
        }
        if users.iter().any(|u| u.email == user.email) {
            return Err(IdentityError::DuplicateEmail);
        }

        users.push(user.clone());
        Ok(user)
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> IdentityResult<()> {
        let mut users = self.users.lock().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(IdentityError::UserNotFound(user_id))?;

        user.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn confirm(&self, user_id: Uuid, at: DateTime<Utc>) -> IdentityResult<Confirmation> {
        let mut users = self.users.lock().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(IdentityError::UserNotFound(user_id))?;

        if user.confirmed_on.is_some() {
            return Ok(Confirmation::AlreadyConfirmed(user.clone()));
        }

        user.confirmed_on = Some(at);
        Ok(Confirmation::Confirmed(user.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> IdentityResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> IdentityResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        let email = normalize_email(email);
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.email == email).cloned())
    }
}

//! User repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::unique_violation;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{IdentityError, IdentityResult};
use crate::models::{Confirmation, NewUser, User, normalize_email};
use crate::password::{hash_password, verify_against_dummy, verify_password};

/// Persistence for user records.
///
/// Implementors provide the storage primitives; registration, authentication,
/// password changes and confirmation are built on top of them here so every
/// backend hashes and verifies credentials the same way.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a fully built user. Must reject a duplicate username or email
    /// atomically with the insert.
    async fn insert(&self, user: User) -> IdentityResult<User>;

    /// Replace the stored credential for a user
    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str)
    -> IdentityResult<()>;

    /// Set `confirmed_on` if it is not set yet, in a single step
    async fn confirm(&self, user_id: Uuid, at: DateTime<Utc>) -> IdentityResult<Confirmation>;

    async fn find_by_id(&self, id: Uuid) -> IdentityResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> IdentityResult<Option<User>>;

    /// Lookup by email; implementors compare normalized addresses
    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>>;

    /// Register a new, unconfirmed user
    async fn register(&self, new_user: &NewUser) -> IdentityResult<User> {
        info!("Registering new user: {}", new_user.username);

        let email = normalize_email(&new_user.email);

        if self.find_by_username(&new_user.username).await?.is_some() {
            return Err(IdentityError::DuplicateUsername);
        }

        if self.find_by_email(&email).await?.is_some() {
            return Err(IdentityError::DuplicateEmail);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username.clone(),
            email,
            password_hash: hash_password(&new_user.password)?,
            registered_on: Utc::now(),
            confirmed_on: None,
        };

        self.insert(user).await
    }

    /// Verify a username and password pair
    async fn authenticate(&self, username: &str, password: &str) -> IdentityResult<User> {
        match self.find_by_username(username).await? {
            Some(user) if verify_password(password, &user.password_hash) => Ok(user),
            Some(_) => {
                warn!("Failed login for user: {}", username);
                Err(IdentityError::InvalidCredentials)
            }
            None => {
                verify_against_dummy(password);
                warn!("Failed login for unknown user: {}", username);
                Err(IdentityError::InvalidCredentials)
            }
        }
    }

    /// Rehash and replace a user's password
    async fn set_password(&self, user_id: Uuid, new_password: &str) -> IdentityResult<()> {
        info!("Setting new password for user: {}", user_id);

        let password_hash = hash_password(new_password)?;
        self.update_password_hash(user_id, &password_hash).await
    }

    /// Mark a user's email as confirmed now
    async fn mark_confirmed(&self, user_id: Uuid) -> IdentityResult<Confirmation> {
        let outcome = self.confirm(user_id, Utc::now()).await?;

        match &outcome {
            Confirmation::Confirmed(_) => info!("Confirmed email for user: {}", user_id),
            Confirmation::AlreadyConfirmed(_) => info!("User {} was already confirmed", user_id),
        }

        Ok(outcome)
    }
}

/// Postgres-backed user repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

const USER_COLUMNS: &str = "id, username, email, password_hash, registered_on, confirmed_on";

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn user_from_row(row: &PgRow) -> User {
        User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            registered_on: row.get("registered_on"),
            confirmed_on: row.get("confirmed_on"),
        }
    }

    async fn find_one(&self, column: &str, value: &str) -> IdentityResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE {} = $1",
            USER_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::user_from_row))
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn insert(&self, user: User) -> IdentityResult<User> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (id, username, email, password_hash, registered_on, confirmed, confirmed_on)
            VALUES ($1, $2, $3, $4, $5, FALSE, NULL)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.registered_on)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some("users_username_key") => IdentityError::DuplicateUsername,
            Some("users_email_key") => IdentityError::DuplicateEmail,
            _ => IdentityError::Database(e),
        })?;

        Ok(Self::user_from_row(&row))
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> IdentityResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(IdentityError::UserNotFound(user_id));
        }

        Ok(())
    }

    async fn confirm(&self, user_id: Uuid, at: DateTime<Utc>) -> IdentityResult<Confirmation> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET confirmed = TRUE, confirmed_on = $2
            WHERE id = $1 AND confirmed = FALSE
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Confirmation::Confirmed(Self::user_from_row(&row)));
        }

        match self.find_by_id(user_id).await? {
            Some(user) => Ok(Confirmation::AlreadyConfirmed(user)),
            None => Err(IdentityError::UserNotFound(user_id)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> IdentityResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::user_from_row))
    }

    async fn find_by_username(&self, username: &str) -> IdentityResult<Option<User>> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> IdentityResult<Option<User>> {
        self.find_one("email", &normalize_email(email)).await
    }
}

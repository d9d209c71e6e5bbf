//! User model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User entity
///
/// Confirmation state is carried by `confirmed_on` alone, so a user can never
/// be confirmed without a confirmation time or the other way round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub registered_on: DateTime<Utc>,
    pub confirmed_on: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the user has confirmed their email address
    pub fn confirmed(&self) -> bool {
        self.confirmed_on.is_some()
    }
}

/// New user registration payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Outcome of marking a user as confirmed
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// The user was unconfirmed and is now confirmed
    Confirmed(User),
    /// The user had already confirmed; nothing changed
    AlreadyConfirmed(User),
}

impl Confirmation {
    pub fn user(&self) -> &User {
        match self {
            Confirmation::Confirmed(user) | Confirmation::AlreadyConfirmed(user) => user,
        }
    }
}

/// Canonical form of an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(confirmed_on: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "a@x.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            registered_on: Utc::now(),
            confirmed_on,
        }
    }

    #[test]
    fn confirmed_follows_confirmed_on() {
        assert!(!user(None).confirmed());
        assert!(user(Some(Utc::now())).confirmed());
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let json = serde_json::to_value(user(None)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }
}

//! Error types for the identity store and the token service

use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the identity store
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Another user already holds this username
    #[error("Username is already taken")]
    DuplicateUsername,

    /// Another user already registered this email
    #[error("Email is already registered")]
    DuplicateEmail,

    /// Unknown username or wrong password; the two are never distinguished
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// No user with this id
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    /// The password hasher failed
    #[error("Failed to hash password: {0}")]
    Hashing(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Type alias for identity store results
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Failures raised while issuing or verifying tokens
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Bad signature, malformed payload, or a token issued for another purpose
    #[error("Token is invalid")]
    Invalid,

    /// Signature is fine but the token is past its expiry
    #[error("Token has expired")]
    Expired,

    /// The token could not be signed
    #[error("Failed to encode token: {0}")]
    Encoding(String),

    /// Bad signing configuration
    #[error("Token configuration error: {0}")]
    Configuration(String),
}

/// Type alias for token results
pub type TokenResult<T> = Result<T, TokenError>;

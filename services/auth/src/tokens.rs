//! Purpose-scoped signed tokens
//!
//! Tokens are HS256 JWTs carrying a purpose, a subject and an expiry. They
//! are never stored: everything needed to verify one is in the token and the
//! process-wide secret. A token only verifies for the purpose it was issued
//! for, so a password-reset token can never confirm an email and vice versa.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{TokenError, TokenResult};

/// Shortest secret accepted for signing
pub const MIN_SECRET_LEN: usize = 32;

/// What a token may be used for
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    /// Confirms ownership of an email address; subject is the email
    EmailConfirmation,
    /// Authorizes a password reset; subject is the user id
    PasswordReset,
    /// Bearer session for the HTTP layer; subject is the user id
    Session,
}

/// Token configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HMAC secret shared by issuing and verifying
    pub secret: String,
    /// Lifetime of email confirmation tokens (default: 1 day)
    pub confirmation_ttl: Duration,
    /// Lifetime of password reset tokens (default: 10 minutes)
    pub reset_ttl: Duration,
    /// Lifetime of session tokens (default: 1 hour)
    pub session_ttl: Duration,
}

impl TokenConfig {
    /// Configuration with default lifetimes around the given secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            confirmation_ttl: Duration::from_secs(86_400),
            reset_ttl: Duration::from_secs(600),
            session_ttl: Duration::from_secs(3_600),
        }
    }

    /// Configuration around a random secret that lives only as long as the
    /// process. Tokens stop verifying after a restart.
    pub fn ephemeral() -> Self {
        warn!("No token secret configured, generating an ephemeral one");
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        Self::new(secret)
    }

    /// Configured lifetime for a purpose
    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::EmailConfirmation => self.confirmation_ttl,
            TokenPurpose::PasswordReset => self.reset_ttl,
            TokenPurpose::Session => self.session_ttl,
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: an email or a user id depending on the purpose
    pub sub: String,
    /// What the token may be used for
    pub purpose: TokenPurpose,
    /// Unique token id
    pub jti: Uuid,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// Issues and verifies purpose-scoped tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: TokenConfig,
}

impl TokenService {
    /// Initialize a new token service
    pub fn new(config: TokenConfig) -> TokenResult<Self> {
        if config.secret.len() < MIN_SECRET_LEN {
            return Err(TokenError::Configuration(format!(
                "token secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }

        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(TokenService {
            encoding_key,
            decoding_key,
            validation,
            config,
        })
    }

    /// Issue a token with an explicit lifetime
    pub fn issue(&self, purpose: TokenPurpose, subject: &str, ttl: Duration) -> TokenResult<String> {
        let now = unix_now()?;
        self.issue_at(purpose, subject, ttl, now)
    }

    /// Issue a token with the configured lifetime for its purpose
    pub fn issue_default(&self, purpose: TokenPurpose, subject: &str) -> TokenResult<String> {
        self.issue(purpose, subject, self.config.ttl(purpose))
    }

    pub(crate) fn issue_at(
        &self,
        purpose: TokenPurpose,
        subject: &str,
        ttl: Duration,
        issued_at: u64,
    ) -> TokenResult<String> {
        let claims = Claims {
            sub: subject.to_string(),
            purpose,
            jti: Uuid::new_v4(),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl.as_secs()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify a token for a purpose and return its subject
    pub fn verify(&self, purpose: TokenPurpose, token: &str) -> TokenResult<String> {
        self.verify_claims(purpose, token).map(|claims| claims.sub)
    }

    /// Verify a token for a purpose and return all of its claims
    pub fn verify_claims(&self, purpose: TokenPurpose, token: &str) -> TokenResult<Claims> {
        let token_data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                debug!("Token rejected: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Invalid,
                }
            })?;

        if token_data.claims.purpose != purpose {
            debug!(
                "Token purpose mismatch: expected {:?}, got {:?}",
                purpose, token_data.claims.purpose
            );
            return Err(TokenError::Invalid);
        }

        Ok(token_data.claims)
    }

    /// Configured lifetime for a purpose
    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        self.config.ttl(purpose)
    }
}

fn unix_now() -> TokenResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| TokenError::Encoding(format!("Failed to get current time: {}", e)))
}

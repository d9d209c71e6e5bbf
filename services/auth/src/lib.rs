//! Identity and token handling for filevault
//!
//! The identity store owns user records, password credentials and the
//! email-confirmation state. The token service issues the purpose-scoped
//! signed tokens used for email confirmation, password reset and sessions.

pub mod error;
pub mod models;
pub mod password;
pub mod rate_limiter;
pub mod repositories;
pub mod tokens;
pub mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use error::{IdentityError, IdentityResult, TokenError, TokenResult};
pub use models::{Confirmation, NewUser, User};
pub use repositories::{UserRepository, UserStore};
pub use tokens::{Claims, TokenConfig, TokenPurpose, TokenService};

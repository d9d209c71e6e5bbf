//! Identity models

pub mod user;

// Re-export for convenience
pub use user::{Confirmation, NewUser, User, normalize_email};

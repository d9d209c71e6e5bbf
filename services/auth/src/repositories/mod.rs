//! Repositories for identity persistence

pub mod user;

pub use user::{UserRepository, UserStore};

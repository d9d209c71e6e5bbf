//! Argon2 password hashing

use std::sync::OnceLock;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};

use crate::error::{IdentityError, IdentityResult};

/// Hash a plaintext password into a salted PHC string
pub fn hash_password(password: &str) -> IdentityResult<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| IdentityError::Hashing(e.to_string()))?
        .to_string();

    Ok(password_hash)
}

/// Check a plaintext password against a stored PHC string
///
/// An unparsable stored hash verifies as `false`.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(password_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Burn the same work as a real verification when the username is unknown,
/// so that login timing does not reveal which usernames exist.
pub fn verify_against_dummy(password: &str) {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    let dummy = DUMMY_HASH.get_or_init(|| hash_password("filevault-dummy-password").ok());

    if let Some(hash) = dummy {
        let _ = verify_password(password, hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_and_verifiable() {
        let first = hash_password("correct horse").unwrap();
        let second = hash_password("correct horse").unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("$argon2"));
        assert!(!first.contains("correct horse"));
        assert!(verify_password("correct horse", &first));
        assert!(verify_password("correct horse", &second));
    }

    #[test]
    fn wrong_password_does_not_verify() {
        let hash = hash_password("pw1").unwrap();
        assert!(!verify_password("pw2", &hash));
    }

    #[test]
    fn garbage_hash_does_not_verify() {
        assert!(!verify_password("pw1", "not-a-phc-string"));
    }
}

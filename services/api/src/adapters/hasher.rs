//! services/api/src/adapters/hasher.rs
//!
//! Argon2 implementation of the `CredentialHasher` port.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chat_core::ports::{CredentialHasher, PortError, PortResult};
use tracing::error;

#[derive(Clone, Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash_password(&self, password: &str) -> PortResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                PortError::Unexpected("Failed to hash password".to_string())
            })?;
        Ok(hash.to_string())
    }

    fn verify_password(&self, password: &str, hashed: &str) -> PortResult<bool> {
        let parsed_hash = PasswordHash::new(hashed).map_err(|e| {
            error!("Failed to parse password hash: {:?}", e);
            PortError::Unexpected("Stored password hash is unreadable".to_string())
        })?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_only_the_original_password() {
        let hasher = Argon2Hasher::new();
        let hash = hasher.hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(hasher.verify_password("hunter22", &hash).unwrap());
        assert!(!hasher.verify_password("hunter23", &hash).unwrap());
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = Argon2Hasher::new();
        assert_ne!(
            hasher.hash_password("same-password").unwrap(),
            hasher.hash_password("same-password").unwrap()
        );
    }

    #[test]
    fn garbage_hash_is_an_error() {
        assert!(Argon2Hasher::new().verify_password("x", "not-a-hash").is_err());
    }
}

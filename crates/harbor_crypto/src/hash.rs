//! One-way hashing.

use crate::error::{CryptoError, CryptoResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 digest of `input`.
///
/// Deterministic; used to derive cache keys from logical identifiers.
#[must_use]
pub fn hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Hashes a PIN or password into an Argon2id PHC string with a random salt.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn hash_credential(secret: &str) -> CryptoResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::credential(e.to_string()))
}

/// Checks `secret` against a PHC string from [`hash_credential`].
///
/// A malformed `phc` string verifies as false.
#[must_use]
pub fn verify_credential(secret: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

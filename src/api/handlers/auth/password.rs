//! Password verification against Argon2id PHC strings.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;

/// Throwaway hash verified when there is no real one, so unknown usernames
/// cost as much as wrong passwords.
static DECOY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("orgdir-decoy").ok());

/// Check a presented password against a stored PHC hash.
///
/// Malformed hashes verify as `false`. The comparison itself is constant-time
/// inside the Argon2 primitive.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Spend one verification against the decoy hash. Never succeeds.
pub fn verify_decoy(password: &str) {
    if let Some(hash) = DECOY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

/// Hash a password with a fresh random salt.
///
/// # Errors
/// Returns an error if Argon2 rejects the input.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

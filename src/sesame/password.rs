//! Password hashing with Argon2id.
//!
//! Digests are PHC strings (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`) carrying
//! their own salt and parameters, so verification does not depend on the
//! parameters the server is currently configured with.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::rngs::OsRng;
use tracing::error;

#[derive(Clone, Debug)]
pub struct PasswordScheme {
    params: Params,
}

impl Default for PasswordScheme {
    fn default() -> Self {
        Self {
            params: Params::default(),
        }
    }
}

impl PasswordScheme {
    #[must_use]
    pub fn with_params(params: Params) -> Self {
        Self { params }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash `plaintext` with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if Argon2 rejects the input.
    pub fn hash(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| anyhow!("failed to hash password: {e}"))?;
        Ok(hash.to_string())
    }

    /// Hash on the blocking pool so request workers are not stalled.
    ///
    /// # Errors
    /// Returns an error if hashing fails or the blocking task panics.
    pub async fn hash_blocking(&self, plaintext: String) -> Result<String> {
        let scheme = self.clone();
        tokio::task::spawn_blocking(move || scheme.hash(&plaintext))
            .await
            .context("password hashing task failed")?
    }
}

/// Check `plaintext` against a stored digest; malformed digests never verify.
#[must_use]
pub fn verify(digest: &str, plaintext: &str) -> bool {
    let parsed = match PasswordHash::new(digest) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Stored password hash is malformed: {e}");
            return false;
        }
    };

    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// [`verify`] on the blocking pool.
pub async fn verify_blocking(digest: String, plaintext: String) -> bool {
    match tokio::task::spawn_blocking(move || verify(&digest, &plaintext)).await {
        Ok(valid) => valid,
        Err(e) => {
            error!("Password verification task failed: {e}");
            false
        }
    }
}

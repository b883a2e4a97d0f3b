//! Password hashing and verification.
//!
//! Hashes are Argon2id PHC strings: algorithm id, salt, and cost
//! parameters travel inside the encoded blob, so verification needs no
//! out-of-band state. A fresh salt is generated per call, which means two
//! hashes of the same password never compare equal as strings; only
//! [`CredentialCodec::verify`] can relate them.
//!
//! CPU-heavy calls are offloaded to blocking threads so they do not
//! starve the async runtime.

use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tokio::task;

use crate::config::SecurityConfig;

/// Bytes of entropy behind a generated temporary password.
const TEMP_PASSWORD_BYTES: usize = 9;

#[derive(Debug, Clone)]
pub struct CredentialCodec {
    memory_cost_kib: u32,
    time_cost: u32,
    parallelism: u32,
}

impl CredentialCodec {
    pub fn new(config: &SecurityConfig) -> Result<Self> {
        // Validate the parameters once up front so hash() cannot fail on
        // misconfiguration mid-operation.
        Params::new(
            config.argon2_memory_cost_kib,
            config.argon2_time_cost,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;

        Ok(Self {
            memory_cost_kib: config.argon2_memory_cost_kib,
            time_cost: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        let params = Params::new(self.memory_cost_kib, self.time_cost, self.parallelism, None)
            .unwrap_or_else(|_| Params::default());
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }

    /// Hashes a password with a freshly generated salt.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

        Ok(hash.to_string())
    }

    /// Verifies a password against a stored PHC string.
    ///
    /// Returns `false` on any failure: malformed encoding, unknown
    /// parameters, or plain mismatch. Callers cannot distinguish a
    /// corrupted hash from a wrong password.
    #[must_use]
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(encoded) else {
            return false;
        };

        // Params are read from the encoded hash, so defaults suffice here.
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    /// Async wrapper around [`hash`] for use inside request handling.
    ///
    /// [`hash`]: Self::hash
    pub async fn hash_blocking(&self, password: String) -> Result<String> {
        let codec = self.clone();
        task::spawn_blocking(move || codec.hash(&password))
            .await
            .context("Password hashing task panicked")?
    }

    /// Async wrapper around [`verify`].
    ///
    /// [`verify`]: Self::verify
    pub async fn verify_blocking(&self, password: String, encoded: String) -> bool {
        let codec = self.clone();
        task::spawn_blocking(move || codec.verify(&password, &encoded))
            .await
            .unwrap_or(false)
    }
}

/// Generates a URL-safe temporary password from CSPRNG bytes.
#[must_use]
pub fn generate_temp_password() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; TEMP_PASSWORD_BYTES] = rng.random();

    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_codec() -> CredentialCodec {
        // Minimal cost so the suite stays fast.
        CredentialCodec::new(&SecurityConfig {
            argon2_memory_cost_kib: 1024,
            argon2_time_cost: 1,
            argon2_parallelism: 1,
            min_password_length: 4,
        })
        .unwrap()
    }

    #[test]
    fn verify_accepts_own_hash() {
        let codec = test_codec();
        let hash = codec.hash("hunter2").unwrap();
        assert!(codec.verify("hunter2", &hash));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let codec = test_codec();
        let hash = codec.hash("hunter2").unwrap();
        assert!(!codec.verify("hunter3", &hash));
        assert!(!codec.verify("", &hash));
    }

    #[test]
    fn hash_is_salted_per_call() {
        let codec = test_codec();
        let a = codec.hash("same-password").unwrap();
        let b = codec.hash("same-password").unwrap();
        assert_ne!(a, b);
        assert!(codec.verify("same-password", &a));
        assert!(codec.verify("same-password", &b));
    }

    #[test]
    fn verify_swallows_malformed_hashes() {
        let codec = test_codec();
        assert!(!codec.verify("anything", ""));
        assert!(!codec.verify("anything", "not-a-phc-string"));
        assert!(!codec.verify("anything", "$argon2id$v=19$garbage"));
    }

    #[test]
    fn temp_passwords_are_unique_and_verifiable() {
        let codec = test_codec();
        let a = generate_temp_password();
        let b = generate_temp_password();
        assert_ne!(a, b);
        assert!(a.len() >= 12);

        let hash = codec.hash(&a).unwrap();
        assert!(codec.verify(&a, &hash));
    }

    #[test]
    fn rejects_invalid_params() {
        let bad = SecurityConfig {
            argon2_memory_cost_kib: 1,
            argon2_time_cost: 0,
            argon2_parallelism: 0,
            min_password_length: 4,
        };
        assert!(CredentialCodec::new(&bad).is_err());
    }
}

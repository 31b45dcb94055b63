//! Credential store.
//!
//! Hashes and verifies human passwords and machine key secrets with Argon2id,
//! and mints the opaque tokens used for sessions, invitations and API keys.

use argon2::{
    password_hash::{rand_core::OsRng as SaltRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

use crate::config::CredentialConfig;
use crate::services::AuthorityError;

/// Every machine key starts with this marker.
pub const MACHINE_KEY_PREFIX: &str = "tsk_";

const MACHINE_KEY_SECRET_LEN: usize = 40;

/// Number of leading key characters kept for display.
pub const DISPLAY_PREFIX_LEN: usize = 12;

const TOKEN_BYTES: usize = 32;

#[derive(Clone)]
pub struct CredentialStore {
    params: Params,
    /// Hash of a random secret nobody knows; target of [`Self::dummy_verify`].
    dummy_hash: String,
}

impl CredentialStore {
    pub fn new(config: &CredentialConfig) -> Result<Self, AuthorityError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthorityError::Internal(anyhow::anyhow!("Invalid Argon2 parameters: {}", e)))?;

        let mut store = Self {
            params,
            dummy_hash: String::new(),
        };
        store.dummy_hash = store.hash_secret(&generate_token())?;
        Ok(store)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a secret into a PHC string. Each call uses a fresh salt.
    pub fn hash_secret(&self, plaintext: &str) -> Result<String, AuthorityError> {
        let salt = SaltString::generate(&mut SaltRng);

        self.argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthorityError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))
    }

    /// Verify `plaintext` against a stored hash.
    ///
    /// Returns `false` for a wrong secret and for a malformed hash alike.
    pub fn verify_secret(&self, plaintext: &str, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "Stored credential hash is malformed");
                return false;
            }
        };

        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// Spend one verification's worth of work on an unknown account or key.
    pub fn dummy_verify(&self, plaintext: &str) {
        let _ = self.verify_secret(plaintext, &self.dummy_hash);
    }
}

/// Generate a machine key: `tsk_` followed by 40 alphanumeric characters.
pub fn generate_machine_key() -> String {
    let secret: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(MACHINE_KEY_SECRET_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", MACHINE_KEY_PREFIX, secret)
}

/// Display prefix of a machine key.
pub fn key_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LEN).collect()
}

/// Generate an opaque hex token for sessions and invitations.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a token for storage and indexed lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
pub(crate) fn test_store() -> CredentialStore {
    CredentialStore::new(&CredentialConfig {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    })
    .expect("test params are valid")
}

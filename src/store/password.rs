use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed")]
    HashingFailed,
    #[error("Invalid hash format")]
    InvalidHash,
    #[error("Password worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Argon2id hashing with configurable cost.
///
/// Verification always uses the parameters embedded in the stored PHC string,
/// so hashes produced with different costs remain verifiable. The work runs
/// on the blocking pool so a slow hash never stalls the async workers.
#[derive(Clone, Default)]
pub struct Hasher {
    argon2: Argon2<'static>,
}

impl Hasher {
    /// Minimal cost, for in-memory stores and tests only.
    #[must_use]
    pub fn fast() -> Self {
        let params = Params::new(8, 1, 1, None).unwrap_or_default();
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Hash a password using Argon2id.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let hasher = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password)).await?
    }

    /// Verify a password against a stored hash.
    ///
    /// # Errors
    /// Returns an error if the stored hash cannot be parsed.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let hasher = self.clone();
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &hash)).await?
    }

    fn hash_blocking(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| PasswordError::HashingFailed)?;
        Ok(hash.to_string())
    }

    fn verify_blocking(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHash)?;
        Ok(self
            .argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

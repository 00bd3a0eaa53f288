//! One-way hashing for passwords, verification codes and temporary passwords.

use crate::error::ErrorKind;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to hash secret: {0}")]
    Hash(String),
    #[error("invalid hashing parameters: {0}")]
    Configuration(String),
}

impl HashError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Hash(_) => ErrorKind::Internal,
            Self::Configuration(_) => ErrorKind::ConfigurationFault,
        }
    }
}

/// Hash-and-compare service shared by every secret the crate stores.
pub trait SecretHasher: Send + Sync {
    /// Produce a self-describing digest of `raw`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to hash.
    fn hash(&self, raw: &str) -> Result<String, HashError>;

    /// `false` for a mismatch and for a digest that cannot be parsed.
    fn verify(&self, digest: &str, raw: &str) -> bool;
}

/// Argon2id hasher producing PHC strings, with an optional server-side pepper.
#[derive(Clone, Debug)]
pub struct Argon2Hasher {
    pepper: Option<SecretString>,
    params: Params,
}

impl Argon2Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pepper: None,
            params: Params::default(),
        }
    }

    #[must_use]
    pub fn with_pepper(mut self, pepper: SecretString) -> Self {
        self.pepper = Some(pepper);
        self
    }

    /// Override memory cost (KiB), iterations and parallelism.
    ///
    /// # Errors
    ///
    /// Returns `HashError::Configuration` if argon2 rejects the parameters.
    pub fn with_params(mut self, m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        self.params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| HashError::Configuration(e.to_string()))?;
        Ok(self)
    }

    fn argon2(&self) -> Result<Argon2<'_>, HashError> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper.expose_secret().as_bytes(),
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )
            .map_err(|e| HashError::Configuration(e.to_string())),
            None => Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )),
        }
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretHasher for Argon2Hasher {
    fn hash(&self, raw: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = self
            .argon2()?
            .hash_password(raw.as_bytes(), &salt)
            .map_err(|e| HashError::Hash(e.to_string()))?;
        Ok(digest.to_string())
    }

    fn verify(&self, digest: &str, raw: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!("unparseable digest: {err}");
                return false;
            }
        };
        self.argon2()
            .is_ok_and(|argon2| argon2.verify_password(raw.as_bytes(), &parsed).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> Result<Argon2Hasher, HashError> {
        Argon2Hasher::new().with_params(1024, 1, 1)
    }

    #[test]
    fn hash_then_verify() -> Result<(), HashError> {
        let hasher = hasher()?;
        let digest = hasher.hash("s3cret")?;
        assert!(digest.starts_with("$argon2id$"));
        assert!(hasher.verify(&digest, "s3cret"));
        assert!(!hasher.verify(&digest, "S3cret"));
        Ok(())
    }

    #[test]
    fn digests_are_salted() -> Result<(), HashError> {
        let hasher = hasher()?;
        assert_ne!(hasher.hash("same")?, hasher.hash("same")?);
        Ok(())
    }

    #[test]
    fn pepper_is_required_to_verify() -> Result<(), HashError> {
        let peppered = hasher()?.with_pepper(SecretString::from("pepper"));
        let digest = peppered.hash("s3cret")?;
        assert!(peppered.verify(&digest, "s3cret"));
        assert!(!hasher()?.verify(&digest, "s3cret"));
        Ok(())
    }

    #[test]
    fn garbage_digest_does_not_verify() -> Result<(), HashError> {
        assert!(!hasher()?.verify("not-a-digest", "anything"));
        Ok(())
    }

    #[test]
    fn invalid_params_are_a_configuration_fault() {
        let result = Argon2Hasher::new().with_params(1, 0, 0);
        assert!(matches!(result, Err(HashError::Configuration(_))));
        assert_eq!(
            HashError::Configuration(String::new()).kind(),
            ErrorKind::ConfigurationFault
        );
    }
}

use crate::error::{AppError, Result};
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use rand::{RngCore, rngs::OsRng};
use zeroize::Zeroize;

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 2;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 1;

/// Turns plaintext passwords into digests and checks them.
///
/// The session layer only consumes this capability; it never hashes anything itself.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String>;

    /// Returns `Ok(false)` for a wrong password and an error for a malformed digest.
    fn verify(&self, digest: &str, plain: &str) -> Result<bool>;
}

/// Argon2id in PHC string format.
#[derive(Clone)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl Argon2Hasher {
    pub fn new() -> Result<Self> {
        let params = ParamsBuilder::new()
            .m_cost(ARGON2_MEMORY_MB * 1024)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Internal(format!("Argon2 params: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plain: &str) -> Result<String> {
        let mut password_bytes = plain.as_bytes().to_vec();

        let mut salt_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::Internal(format!("Salt encoding error: {}", e)))?;

        let digest = self
            .argon2
            .hash_password(&password_bytes, &salt)
            .map_err(|e| AppError::Internal(format!("Argon2 hash error: {}", e)))?
            .to_string();

        password_bytes.zeroize();
        tracing::debug!("Password hashed successfully with Argon2");
        Ok(digest)
    }

    fn verify(&self, digest: &str, plain: &str) -> Result<bool> {
        let parsed = PasswordHash::new(digest)
            .map_err(|e| AppError::Internal(format!("Hash parse error: {}", e)))?;

        let mut password_bytes = plain.as_bytes().to_vec();
        let outcome = self.argon2.verify_password(&password_bytes, &parsed);
        password_bytes.zeroize();

        match outcome {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::Internal(format!("Argon2 verify error: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hasher = Argon2Hasher::new().unwrap();
        let digest = hasher.hash("correct horse").unwrap();

        assert!(digest.starts_with("$argon2id$"));
        assert!(hasher.verify(&digest, "correct horse").unwrap());
        assert!(!hasher.verify(&digest, "battery staple").unwrap());
    }

    #[test]
    fn malformed_digest_is_an_error() {
        let hasher = Argon2Hasher::new().unwrap();
        assert!(hasher.verify("not-a-digest", "x").is_err());
    }
}

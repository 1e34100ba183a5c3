//! Argon2id password hashing.
//!
//! Hashes are stored in the standard PHC encoding:
//! `$argon2id$v=19$m=<memory>,t=<iterations>,p=<parallelism>$<salt>$<hash>`.
//! Default cost parameters are m=19456 KiB, t=2, p=1 with a 32-byte output.

use crate::config::PasswordConfig;
use crate::error::PasswordError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Algorithm tag accepted by [`PasswordHasher::verify`].
const ALGORITHM_TAG: &str = "argon2id";

/// Argon2 version 1.3, the only version accepted by [`PasswordHasher::verify`].
const ARGON2_VERSION: u32 = 0x13;

/// Argon2id hasher with fixed cost parameters.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    /// Create a hasher with the default parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the default parameters are rejected by Argon2.
    pub fn new() -> Result<Self, PasswordError> {
        Self::with_params(&PasswordConfig::default())
    }

    /// Create a hasher with custom parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError::InvalidParams`] if Argon2 rejects the parameters.
    pub fn with_params(config: &PasswordConfig) -> Result<Self, PasswordError> {
        let params = Params::new(
            config.memory_cost,
            config.time_cost,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|e| PasswordError::InvalidParams(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Ok(Self { argon2 })
    }

    /// Hash a password with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError::EmptyPassword`] for an empty password, or
    /// [`PasswordError::Hashing`] if Argon2 fails.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        if password.is_empty() {
            return Err(PasswordError::EmptyPassword);
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::Hashing(e.to_string()))?
            .to_string();

        Ok(hash)
    }

    /// Verify a password against an encoded hash.
    ///
    /// Fails closed: malformed input, a foreign algorithm tag or an
    /// unsupported version all yield `false`. The comparison uses the
    /// parameters encoded in the hash and runs in constant time.
    #[must_use]
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        if password.is_empty() || encoded.is_empty() {
            return false;
        }

        let Ok(parsed) = PasswordHash::new(encoded) else {
            return false;
        };

        if parsed.algorithm.as_str() != ALGORITHM_TAG
            || parsed.version != Some(ARGON2_VERSION)
            || parsed.hash.is_none()
        {
            return false;
        }

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Run one derivation with the configured cost and reject.
    ///
    /// Used when no account matched, so a miss costs as much as a wrong
    /// password.
    #[must_use]
    pub fn verify_absent(&self, password: &str) -> bool {
        let salt = SaltString::generate(&mut OsRng);
        let _ = self.argon2.hash_password(password.as_bytes(), &salt);
        false
    }
}

/// Whether a stored credential is an Argon2id PHC string rather than plaintext.
#[must_use]
pub fn is_argon2_hash(value: &str) -> bool {
    value.starts_with("$argon2id$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fast_hasher() -> PasswordHasher {
        PasswordHasher::with_params(&PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            hash_length: 32,
        })
        .unwrap()
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hasher = fast_hasher();
        let hash = hasher.hash("mysecretpassword").unwrap();

        assert!(hasher.verify("mysecretpassword", &hash));
        assert!(!hasher.verify("wrongpassword", &hash));
    }

    #[test]
    fn test_hash_format() {
        let hasher = PasswordHasher::new().unwrap();
        let hash = hasher.hash("testpassword").unwrap();

        assert!(hash.starts_with("$argon2id$v=19$m=19456,t=2,p=1$"));
        assert_eq!(hash.split('$').count(), 6);
        assert!(is_argon2_hash(&hash));
    }

    #[test]
    fn test_hash_empty_password() {
        let hasher = fast_hasher();
        assert!(matches!(hasher.hash(""), Err(PasswordError::EmptyPassword)));
    }

    #[test]
    fn test_verify_empty_inputs() {
        let hasher = fast_hasher();
        let hash = hasher.hash("password").unwrap();
        assert!(!hasher.verify("", &hash));
        assert!(!hasher.verify("password", ""));
    }

    #[test]
    fn test_verify_invalid_hash() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("password", "invalid-hash-format"));
        assert!(!hasher.verify("password", "$argon2id$v=19$m=abc$$"));
        assert!(!hasher.verify("password", "$argon2id$"));
    }

    #[test]
    fn test_verify_rejects_foreign_algorithm() {
        let hasher = fast_hasher();
        let hash = hasher.hash("password").unwrap();
        let argon2i = hash.replacen("$argon2id$", "$argon2i$", 1);
        assert!(!hasher.verify("password", &argon2i));
        assert!(!hasher.verify(
            "password",
            "$2b$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW"
        ));
    }

    #[test]
    fn test_verify_rejects_unsupported_version() {
        let hasher = fast_hasher();
        let hash = hasher.hash("password").unwrap();
        let old = hash.replacen("$v=19$", "$v=16$", 1);
        assert!(!hasher.verify("password", &old));
    }

    #[test]
    fn test_verify_absent_costs_a_derivation() {
        let hasher = PasswordHasher::new().unwrap();
        let hash = hasher.hash("password").unwrap();

        let fastest = |f: &dyn Fn() -> bool| {
            (0..3)
                .map(|_| {
                    let started = std::time::Instant::now();
                    assert!(!f());
                    started.elapsed()
                })
                .min()
                .unwrap()
        };
        let miss = fastest(&|| hasher.verify_absent("guess"));
        let wrong = fastest(&|| hasher.verify("guess", &hash));

        assert!(miss * 4 >= wrong, "miss {miss:?} vs wrong password {wrong:?}");
    }

    #[test]
    fn test_invalid_params() {
        let result = PasswordHasher::with_params(&PasswordConfig {
            memory_cost: 1,
            time_cost: 0,
            parallelism: 1,
            hash_length: 32,
        });
        assert!(matches!(result, Err(PasswordError::InvalidParams(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_hash_roundtrips(password in "[ -~]{1,40}", other in "[ -~]{1,40}") {
            let hasher = fast_hasher();
            let hash = hasher.hash(&password).unwrap();
            prop_assert!(hasher.verify(&password, &hash));
            if other != password {
                prop_assert!(!hasher.verify(&other, &hash));
            }
        }

        #[test]
        fn prop_garbage_never_verifies(garbage in "\\PC{0,80}") {
            let hasher = fast_hasher();
            prop_assert!(!hasher.verify("password", &garbage));
        }
    }
}

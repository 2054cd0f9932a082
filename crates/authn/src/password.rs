//! Salted password credentials.
//!
//! A credential is a random 16-byte salt plus an iterated SHA-256 digest of
//! `salt || password`, both hex-encoded. Verification recomputes the digest
//! and compares in constant time.

use std::sync::LazyLock;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// Salt length in bytes.
pub const SALT_BYTES: usize = 16;

/// Digest rounds applied by [`PasswordHash::new`].
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// A stored password credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordHash {
    /// Hex-encoded salt.
    salt: String,
    /// Hex-encoded digest.
    digest: String,
    /// Number of SHA-256 rounds.
    iterations: u32,
}

impl PasswordHash {
    /// Hashes `password` under a fresh random salt.
    #[must_use]
    pub fn new(password: &str) -> Self {
        Self::with_iterations(password, DEFAULT_ITERATIONS)
    }

    /// Hashes `password` with an explicit round count (at least 1).
    #[must_use]
    pub fn with_iterations(password: &str, iterations: u32) -> Self {
        let mut salt = [0u8; SALT_BYTES];
        rand::rng().fill_bytes(&mut salt);
        let iterations = iterations.max(1);
        let digest = derive(&salt, password.as_bytes(), iterations);
        Self { salt: hex::encode(salt), digest: hex::encode(digest.as_slice()), iterations }
    }

    /// A process-wide credential with a random digest, at the default round
    /// count. Verifying against it costs as much as verifying a stored
    /// credential and never succeeds.
    #[must_use]
    pub fn placeholder() -> &'static Self {
        static PLACEHOLDER: LazyLock<PasswordHash> = LazyLock::new(|| {
            let mut salt = [0u8; SALT_BYTES];
            let mut digest = [0u8; 32];
            rand::rng().fill_bytes(&mut salt);
            rand::rng().fill_bytes(&mut digest);
            PasswordHash {
                salt: hex::encode(salt),
                digest: hex::encode(digest),
                iterations: DEFAULT_ITERATIONS,
            }
        });
        &PLACEHOLDER
    }

    /// Returns `true` if `password` matches this credential.
    ///
    /// A malformed stored credential never matches.
    #[must_use]
    pub fn verify(&self, password: &str) -> bool {
        let (Ok(salt), Ok(expected)) = (hex::decode(&self.salt), hex::decode(&self.digest)) else {
            return false;
        };
        let actual = derive(&salt, password.as_bytes(), self.iterations.max(1));
        actual.as_slice().ct_eq(&expected).into()
    }

    /// Like [`verify`](Self::verify) but as a `Result`.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] on mismatch.
    pub fn check(&self, password: &str) -> Result<()> {
        if self.verify(password) { Ok(()) } else { Err(AuthError::InvalidCredentials) }
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHash")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

fn derive(salt: &[u8], password: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut digest = Zeroizing::new([0u8; 32]);
    digest.copy_from_slice(&Sha256::new().chain_update(salt).chain_update(password).finalize());
    for _ in 1..iterations {
        let next = Sha256::new().chain_update(salt).chain_update(digest.as_slice()).finalize();
        digest.copy_from_slice(&next);
    }
    digest
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ascii("pw")]
    #[case::unicode("contraseña-ñandú")]
    #[case::long("a-much-longer-passphrase-with-spaces and symbols !@#")]
    fn matching_password_verifies(#[case] password: &str) {
        let hash = PasswordHash::with_iterations(password, 8);
        assert!(hash.verify(password));
        hash.check(password).unwrap();
    }

    #[rstest]
    #[case::wrong("pw", "pW")]
    #[case::prefix("pw", "p")]
    #[case::empty("pw", "")]
    fn wrong_password_is_rejected(#[case] stored: &str, #[case] attempt: &str) {
        let hash = PasswordHash::with_iterations(stored, 8);
        assert!(!hash.verify(attempt));
        assert!(matches!(hash.check(attempt), Err(AuthError::InvalidCredentials)));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = PasswordHash::with_iterations("pw", 2);
        let b = PasswordHash::with_iterations("pw", 2);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.digest, b.digest);
        assert_eq!(a.salt.len(), SALT_BYTES * 2);
    }

    #[test]
    fn corrupt_credential_never_matches() {
        let mut hash = PasswordHash::with_iterations("pw", 2);
        hash.salt = "zz".to_owned();
        assert!(!hash.verify("pw"));
    }

    #[rstest]
    #[case::empty("")]
    #[case::common("pw")]
    fn placeholder_rejects_everything(#[case] attempt: &str) {
        let placeholder = PasswordHash::placeholder();
        assert!(!placeholder.verify(attempt));
        assert_eq!(placeholder.iterations, DEFAULT_ITERATIONS);
        assert!(std::ptr::eq(placeholder, PasswordHash::placeholder()));
    }

    #[test]
    fn debug_hides_material() {
        let hash = PasswordHash::with_iterations("pw", 2);
        let rendered = format!("{hash:?}");
        assert!(!rendered.contains(&hash.digest));
        assert!(!rendered.contains(&hash.salt));
    }

    #[test]
    fn survives_json_round_trip() {
        let hash = PasswordHash::with_iterations("pw", 3);
        let restored: PasswordHash =
            serde_json::from_slice(&serde_json::to_vec(&hash).unwrap()).unwrap();
        assert!(restored.verify("pw"));
    }
}

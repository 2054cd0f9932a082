//! Authentication error types.
//!
//! This module defines errors that can occur while issuing or validating
//! sessions and while checking password credentials.

use expedientes_storage::StorageError;
use thiserror::Error;

/// Authentication errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The token does not name a live session (never issued, revoked, or
    /// already swept).
    #[error("Unknown session")]
    UnknownSession,

    /// The session existed but its expiry has passed. It has been removed.
    #[error("Session expired")]
    SessionExpired,

    /// Username or password did not match.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Storage failure while reading or writing sessions.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain for structured logging.
    #[error("Session storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),
}

impl AuthError {
    /// Returns `true` for the variants that mean "caller is not
    /// authenticated", as opposed to an infrastructure failure.
    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::UnknownSession | Self::SessionExpired | Self::InvalidCredentials)
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

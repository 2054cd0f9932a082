//! Record service error taxonomy.
//!
//! Every failure that leaves the service is a [`ServiceError`]. Storage and
//! authentication errors are folded into it at the service boundary, and the
//! gateway reduces each one to its [`ErrorKind`] plus a message.

use expedientes_authn::AuthError;
use expedientes_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Coarse error category reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input: unknown catalog code, unparseable date, empty field.
    InvalidArgument,
    /// Missing, expired or unknown token, or bad credentials.
    Unauthenticated,
    /// Authenticated, but the target lies outside the caller's scope.
    PermissionDenied,
    /// A referenced entity does not exist.
    NotFound,
    /// Duplicate unique key or lost race on a concurrent update.
    Conflict,
    /// The storage engine failed.
    #[serde(rename = "io_failure")]
    Io,
}

impl ErrorKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Io => "io_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the record service.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Malformed or out-of-catalog input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller could not be authenticated.
    #[error("Not authenticated: {reason}")]
    Unauthenticated {
        /// Why authentication failed.
        reason: &'static str,
    },

    /// The caller's scope does not cover the target.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// A uniqueness constraint or concurrent update failed.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The storage layer failed.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain for structured logging.
    #[error("Storage failure: {0}")]
    Io(#[source] StorageError),
}

impl ServiceError {
    /// Creates an `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a `PermissionDenied` error.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    /// Creates a `NotFound` error for one entity.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::NotFound { entity: entity.into(), id: id.to_string() }
    }

    /// Creates a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// The client-facing category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Unauthenticated { .. } => ErrorKind::Unauthenticated,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns `true` only for storage failures, the one kind that may
    /// leave the process unable to serve further requests.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Io
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { namespace, key } => Self::NotFound { entity: namespace, id: key },
            StorageError::Conflict => Self::Conflict("concurrent modification".to_owned()),
            other => Self::Io(other),
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UnknownSession => Self::Unauthenticated { reason: "unknown session" },
            AuthError::SessionExpired => Self::Unauthenticated { reason: "session expired" },
            AuthError::InvalidCredentials => {
                Self::Unauthenticated { reason: "invalid username or password" }
            },
            AuthError::Storage(e) => e.into(),
            // Future authentication failures are still authentication failures.
            _ => Self::Unauthenticated { reason: "authentication failed" },
        }
    }
}

/// Result type alias for record service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

//! Storage error types and result alias.
//!
//! Every engine maps its internal failures onto [`StorageError`], so the
//! layers above (registry, sessions, record service) only ever deal with this
//! one taxonomy.
//!
//! # Error Types
//!
//! - [`StorageError::NotFound`] - Key does not exist in the namespace
//! - [`StorageError::Conflict`] - A compare-and-set precondition failed at commit
//! - [`StorageError::Io`] - The underlying engine or device failed
//! - [`StorageError::Serialization`] - A stored value could not be encoded or decoded
//! - [`StorageError::Internal`] - Engine bookkeeping failures that fit nowhere else
//! - [`StorageError::Closed`] - The engine handle was closed
//!
//! # Example
//!
//! ```
//! use expedientes_storage::{StorageError, StorageResult};
//!
//! fn lookup(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found("users", key))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via `#[source]`, so logging the error
/// with `{:#}`-style reporters shows the engine's own diagnostic.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested key does not exist in the namespace.
    #[error("Key not found in {namespace}: {key}")]
    NotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Printable form of the missing key.
        key: String,
    },

    /// A compare-and-set precondition did not hold when the transaction
    /// committed. Nothing from the transaction was applied.
    #[error("Transaction conflict")]
    Conflict,

    /// The engine or the device beneath it failed.
    #[error("I/O failure: {message}")]
    Io {
        /// Description of the failure.
        message: String,
        /// The engine error that caused it.
        #[source]
        source: Option<BoxError>,
    },

    /// A value could not be encoded for storage or decoded after retrieval.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The codec error that caused it.
        #[source]
        source: Option<BoxError>,
    },

    /// Engine-internal failure that fits no other category.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The engine was closed; no further operations are accepted.
    #[error("Storage engine is closed")]
    Closed,
}

impl StorageError {
    /// Creates a new `NotFound` error for a key in a namespace.
    ///
    /// The key is rendered lossily as UTF-8; binary keys show replacement
    /// characters, which is enough for diagnostics.
    #[must_use]
    pub fn not_found(namespace: impl Into<String>, key: impl AsRef<[u8]>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
            key: String::from_utf8_lossy(key.as_ref()).into_owned(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Io` error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io { message: message.into(), source: None }
    }

    /// Creates a new `Io` error with a message and source error.
    #[must_use]
    pub fn io_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Closed` error.
    #[must_use]
    pub fn closed() -> Self {
        Self::Closed
    }

    /// Returns `true` for [`StorageError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when the storage layer itself is unusable: device or
    /// engine failure, or a closed handle. Callers treat these as potentially
    /// fatal to the process; every other variant is a per-request outcome.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Closed | Self::Internal { .. })
    }
}

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field required by the selected engine was not provided.
    #[error("{field} is required when engine is {engine}")]
    MissingField {
        /// The missing field.
        field: &'static str,
        /// The engine that requires it.
        engine: &'static str,
    },

    /// A numeric field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The offending field.
        field: &'static str,
        /// The minimum allowed value.
        min: String,
        /// The value that was provided.
        value: String,
    },

    /// A numeric field is above its allowed maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// The offending field.
        field: &'static str,
        /// The maximum allowed value.
        max: String,
        /// The value that was provided.
        value: String,
    },

    /// A list field that must hold at least one entry is empty.
    #[error("{field} must not be empty")]
    Empty {
        /// The offending field.
        field: &'static str,
    },
}

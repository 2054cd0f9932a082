//! Shared test utilities for storage engine testing.
//!
//! Helpers for creating test engines, generating test data, and asserting on
//! [`StorageResult`] values. Feature-gated behind `testutil` so none of it
//! leaks into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! expedientes-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use expedientes_storage::testutil::{make_key, populated_backend, temp_redb};
//! ```

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    redb_backend::RedbBackend,
};

/// Namespace used by helpers that need one.
pub const TEST_NAMESPACE: &str = "test";

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"` (zero-padded to 6 digits) encoded
/// as UTF-8 bytes. The zero-padding makes lexicographic order match numeric
/// order, which cursor tests rely on.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Create a test value tagged with a task ID and sequence number.
///
/// Produces values like `"task3-val042"`, so concurrent tests can tell which
/// task wrote which value.
#[must_use]
pub fn make_tagged_value(task: usize, seq: usize) -> Vec<u8> {
    format!("task{task}-val{seq}").into_bytes()
}

/// Create a [`MemoryBackend`] with `count` keys in [`TEST_NAMESPACE`].
///
/// # Panics
///
/// Panics if any `put` fails (should not happen with `MemoryBackend`).
pub async fn populated_backend(prefix: &str, count: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    for i in 0..count {
        backend
            .put(TEST_NAMESPACE, &make_key(prefix, i), make_tagged_value(0, i))
            .await
            .expect("populate put failed");
    }
    backend
}

/// Open a [`RedbBackend`] in a fresh temporary directory.
///
/// Keep the returned directory alive for as long as the engine is used; the
/// database file is removed when it drops.
///
/// # Panics
///
/// Panics if the directory or database cannot be created.
#[must_use]
pub fn temp_redb() -> (tempfile::TempDir, RedbBackend) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let backend = RedbBackend::open(dir.path().join("test.redb")).expect("open redb");
    (dir, backend)
}

/// Assert that a [`StorageResult`] is an error of the named variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use expedientes_storage::{StorageError, StorageResult, assert_storage_error};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_storage_error!(result, Conflict, "commit should conflict");
/// ```
#[macro_export]
macro_rules! assert_storage_error {
    ($result:expr, $variant:ident) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::StorageError::$variant { .. })),
            "expected StorageError::{}, got: {:?}",
            stringify!($variant),
            result,
        );
    }};
    ($result:expr, $variant:ident, $msg:expr) => {{
        let result = $result;
        assert!(
            matches!(&result, Err($crate::error::StorageError::$variant { .. })),
            "{}: expected StorageError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            result,
        );
    }};
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        $crate::assert_storage_error!($result, Conflict)
    };
    ($result:expr, $msg:expr) => {
        $crate::assert_storage_error!($result, Conflict, $msg)
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        $crate::assert_storage_error!($result, NotFound)
    };
    ($result:expr, $msg:expr) => {
        $crate::assert_storage_error!($result, NotFound, $msg)
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Helper to check whether a result is a `Conflict` error.
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict))
}

/// Helper to check whether a result is a `NotFound` error.
pub fn is_not_found<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::NotFound { .. }))
}

//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the capability interface every engine implements.
//! It is a namespace-partitioned byte store: each call names the namespace
//! (a logical partition, one per entity type) and works with raw bytes.
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: serialization lives in the
//!   [`registry`](crate::registry) layer, not in engines
//! - **Ordered**: key enumeration is byte-lexicographic within a namespace
//! - **Transactional**: multi-key, multi-namespace writes commit atomically
//! - **Scoped handle**: an engine is opened once, shared by every caller, and
//!   closed explicitly on shutdown
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Implement a corresponding [`Transaction`] type
//! 3. Map engine-specific errors to [`StorageError`](crate::StorageError)
//! 4. Run the [`conformance`](crate::conformance) suite against it
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation
//! and [`RedbBackend`](crate::RedbBackend) for the durable one.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    cursor::KeyCursor,
    error::StorageResult,
    transaction::Transaction,
    types::NamespaceDump,
};

/// Abstract, namespace-partitioned key-value engine.
///
/// Implementations must be thread-safe and cheap to clone; clones share one
/// underlying handle.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`put`](StorageBackend::put) | Upsert a key |
/// | [`get`](StorageBackend::get) | Read a key, `NotFound` when absent |
/// | [`delete`](StorageBackend::delete) | Remove a key (idempotent) |
/// | [`list_keys`](StorageBackend::list_keys) | Lazy cursor over every key in a namespace |
/// | [`keys_by_prefix`](StorageBackend::keys_by_prefix) | Lazy cursor over keys with a prefix |
/// | [`transaction`](StorageBackend::transaction) | Begin an atomic transaction |
/// | [`dump`](StorageBackend::dump) | Diagnostic dump of every namespace |
/// | [`close`](StorageBackend::close) | Release the engine handle |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use expedientes_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.put("users", b"doctorA", b"{}".to_vec()).await.unwrap();
/// assert_eq!(backend.get("users", b"doctorA").await.unwrap(), Bytes::from("{}"));
/// assert!(backend.get("users", b"nobody").await.unwrap_err().is_not_found());
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stores a value, overwriting any existing one.
    ///
    /// The write is durable when this returns (for durable engines).
    ///
    /// # Errors
    ///
    /// [`StorageError::Io`](crate::StorageError::Io) if the engine cannot
    /// persist the write.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()>;

    /// Retrieves a value.
    ///
    /// A namespace that was never written behaves as empty.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`](crate::StorageError::NotFound) if the key
    /// does not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Bytes>;

    /// Retrieves a value, mapping absence to `Ok(None)`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn try_get(&self, namespace: &str, key: &[u8]) -> StorageResult<Option<Bytes>> {
        match self.get(namespace, key).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Removes a key. Removing an absent key succeeds.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()>;

    /// Returns up to `limit` keys of `namespace` that start with `prefix` and
    /// sort strictly after `after`, in byte-lexicographic order.
    ///
    /// This is the paging primitive behind [`KeyCursor`]; most callers want
    /// [`list_keys`](Self::list_keys) or [`keys_by_prefix`](Self::keys_by_prefix).
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn scan_keys(
        &self,
        namespace: &str,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<Bytes>>;

    /// Lazy cursor over every key in `namespace`.
    ///
    /// Each call starts a fresh scan from the first key.
    fn list_keys(&self, namespace: &str) -> KeyCursor<'_, Self>
    where
        Self: Sized,
    {
        KeyCursor::new(self, namespace, Vec::new())
    }

    /// Lazy cursor over the keys in `namespace` starting with `prefix`.
    fn keys_by_prefix(&self, namespace: &str, prefix: &[u8]) -> KeyCursor<'_, Self>
    where
        Self: Sized,
    {
        KeyCursor::new(self, namespace, prefix.to_vec())
    }

    /// Begins a new transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Enumerates every namespace and every key/value pair.
    ///
    /// Diagnostic only; never call this on a request path.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn dump(&self) -> StorageResult<Vec<NamespaceDump>>;

    /// Releases the engine handle.
    ///
    /// Later operations fail with [`StorageError::Closed`](crate::StorageError::Closed).
    /// Closing an already-closed engine succeeds.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn close(&self) -> StorageResult<()>;

    /// Verifies the engine is open and readable.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}

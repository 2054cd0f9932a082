//! Transaction trait for atomic, multi-namespace storage operations.
//!
//! # Transaction Semantics
//!
//! - **Atomicity**: every buffered operation is applied at commit, or none is
//! - **Preconditions**: compare-and-set and compare-and-delete operations are
//!   checked at commit time
//!   under the engine's write exclusion; one failed check rejects the commit
//! - **Read-your-writes**: reads within a transaction see pending writes
//!
//! A record and its index entries are written through one transaction, so a
//! reader never observes one without the other.
//!
//! # Example
//!
//! ```
//! use expedientes_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.put("records", b"r1".to_vec(), b"{}".to_vec());
//! txn.put("record_index", b"p/1".to_vec(), b"[1]".to_vec());
//! txn.commit().await.unwrap();
//!
//! assert!(backend.get("record_index", b"p/1").await.is_ok());
//! # });
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// Operations are buffered until [`commit`](Transaction::commit). If another
/// writer changes a key guarded by [`compare_and_set`](Transaction::compare_and_set)
/// first, the commit fails with [`StorageError::Conflict`](crate::StorageError::Conflict)
/// and the caller decides whether to retry.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Gets a value within the transaction.
    ///
    /// Pending writes from this transaction win over committed data.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if the key doesn't exist or was deleted in this transaction
    /// - `Err(...)` on storage errors
    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers an upsert.
    fn put(&mut self, namespace: &str, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete. Deleting an absent key is not an error at commit.
    fn delete(&mut self, namespace: &str, key: Vec<u8>);

    /// Buffers a conditional write.
    ///
    /// At commit the committed value must equal `expected` byte for byte;
    /// `None` requires the key to be absent. A mismatch rejects the whole
    /// transaction. The check always compares against committed data, never
    /// against this transaction's own pending writes. The write half follows
    /// the same rule as `put`: the last operation buffered on a key is the
    /// one reads see and commit stores.
    fn compare_and_set(
        &mut self,
        namespace: &str,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    );

    /// Buffers a delete that rejects the commit unless the committed value
    /// still equals `expected`.
    fn compare_and_delete(&mut self, namespace: &str, key: Vec<u8>, expected: Vec<u8>);

    /// Commits all buffered operations atomically.
    ///
    /// Consumes the transaction; it cannot be reused whether or not the
    /// commit succeeded.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if a precondition failed
    /// - [`StorageError::Io`](crate::StorageError::Io) if the engine could not persist the write
    /// - [`StorageError::Closed`](crate::StorageError::Closed) if the engine was closed
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// A compare-and-set precondition, checked against committed data at commit.
#[derive(Debug, Clone)]
pub(crate) struct Precondition {
    pub(crate) namespace: String,
    pub(crate) key: Vec<u8>,
    pub(crate) expected: Option<Vec<u8>>,
}

/// Pending operations shared by the engine transaction implementations.
///
/// Each key keeps only its last buffered operation, whether a put, a delete
/// or the write half of a compare-and-set. Reads inside the transaction and
/// the commit both use that same final value. Preconditions are kept apart
/// and always compare against the data committed before this transaction.
#[derive(Debug, Default)]
pub(crate) struct WriteSet {
    /// `(namespace, key)` → final value, or `None` for a delete.
    pub(crate) writes: BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>,
    pub(crate) preconditions: Vec<Precondition>,
}

impl WriteSet {
    pub(crate) fn put(&mut self, namespace: &str, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert((namespace.to_owned(), key), Some(value));
    }

    pub(crate) fn delete(&mut self, namespace: &str, key: Vec<u8>) {
        self.writes.insert((namespace.to_owned(), key), None);
    }

    pub(crate) fn compare_and_set(
        &mut self,
        namespace: &str,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) {
        self.preconditions.push(Precondition {
            namespace: namespace.to_owned(),
            key: key.clone(),
            expected,
        });
        self.writes.insert((namespace.to_owned(), key), Some(new_value));
    }

    pub(crate) fn compare_and_delete(&mut self, namespace: &str, key: Vec<u8>, expected: Vec<u8>) {
        self.preconditions.push(Precondition {
            namespace: namespace.to_owned(),
            key: key.clone(),
            expected: Some(expected),
        });
        self.writes.insert((namespace.to_owned(), key), None);
    }

    /// Looks up a pending value: `Some(Some(v))` for a pending write,
    /// `Some(None)` for a pending delete, `None` when untouched.
    pub(crate) fn pending(&self, namespace: &str, key: &[u8]) -> Option<Option<Bytes>> {
        self.writes
            .get(&(namespace.to_owned(), key.to_vec()))
            .map(|value| value.as_deref().map(Bytes::copy_from_slice))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.preconditions.is_empty()
    }
}

/// Byte-exact precondition check shared by every engine.
pub(crate) fn precondition_holds(expected: Option<&[u8]>, current: Option<&[u8]>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(expected), Some(current)) => expected == current,
        _ => false,
    }
}

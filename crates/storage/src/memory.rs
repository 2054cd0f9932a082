//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps every namespace in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`].
//!
//! **Volatile: for tests and development only.** Nothing survives the
//! process; use [`RedbBackend`](crate::RedbBackend) for real deployments.
//!
//! # Features
//!
//! - **Thread-safe**: one `RwLock` guards all namespaces, so a transaction
//!   commit is a single critical section
//! - **Ordered storage**: byte-lexicographic key order per namespace
//! - **Transaction support**: buffered writes with read-your-writes and
//!   commit-time compare-and-set checks
//!
//! # Performance Characteristics
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | get | O(log n) |
//! | put | O(log n) |
//! | delete | O(log n) |
//! | scan_keys | O(log n + k) where k is the page size |

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::{Transaction, WriteSet, precondition_holds},
    types::{KeyValue, NamespaceDump},
};

type Namespaces = BTreeMap<String, BTreeMap<Vec<u8>, Bytes>>;

#[derive(Default)]
struct MemoryState {
    namespaces: Namespaces,
    closed: bool,
}

/// In-memory storage backend. Volatile; testing and development only.
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same data, and closing one closes all of them.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBackend {
    /// Creates an empty in-memory backend.
    ///
    /// # Example
    ///
    /// ```
    /// use expedientes_storage::MemoryBackend;
    ///
    /// let backend = MemoryBackend::new();
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, MemoryState>> {
        let guard = self.state.read();
        if guard.closed {
            return Err(StorageError::Closed);
        }
        Ok(guard)
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, MemoryState>> {
        let guard = self.state.write();
        if guard.closed {
            return Err(StorageError::Closed);
        }
        Ok(guard)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").finish_non_exhaustive()
    }
}

fn lookup<'a>(namespaces: &'a Namespaces, namespace: &str, key: &[u8]) -> Option<&'a Bytes> {
    namespaces.get(namespace).and_then(|entries| entries.get(key))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(level = "trace", skip(self, key, value))]
    async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()> {
        let mut state = self.write()?;
        state
            .namespaces
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_vec(), Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, key))]
    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Bytes> {
        let state = self.read()?;
        lookup(&state.namespaces, namespace, key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(namespace, key))
    }

    #[tracing::instrument(level = "trace", skip(self, key))]
    async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()> {
        let mut state = self.write()?;
        if let Some(entries) = state.namespaces.get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, prefix, after))]
    async fn scan_keys(
        &self,
        namespace: &str,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        let state = self.read()?;
        let Some(entries) = state.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let start = match after {
            Some(after) if after >= prefix => Bound::Excluded(after),
            _ => Bound::Included(prefix),
        };

        Ok(entries
            .range::<[u8], _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .take(limit)
            .map(|key| Bytes::copy_from_slice(key))
            .collect())
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        // Fail fast on a closed engine rather than at commit.
        drop(self.read()?);
        Ok(Box::new(MemoryTransaction { backend: self.clone(), writes: WriteSet::default() }))
    }

    #[tracing::instrument(skip(self))]
    async fn dump(&self) -> StorageResult<Vec<NamespaceDump>> {
        let state = self.read()?;
        Ok(state
            .namespaces
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(namespace, entries)| NamespaceDump {
                namespace: namespace.clone(),
                entries: entries
                    .iter()
                    .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
                    .collect(),
            })
            .collect())
    }

    async fn close(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        state.closed = true;
        state.namespaces.clear();
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the read lock proves we're not deadlocked.
        drop(self.read()?);
        Ok(())
    }
}

/// In-memory transaction.
///
/// Buffers writes until commit, then applies everything under one write
/// lock acquisition.
struct MemoryTransaction {
    backend: MemoryBackend,
    writes: WriteSet,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(pending) = self.writes.pending(namespace, key) {
            return Ok(pending);
        }
        self.backend.try_get(namespace, key).await
    }

    fn put(&mut self, namespace: &str, key: Vec<u8>, value: Vec<u8>) {
        self.writes.put(namespace, key, value);
    }

    fn delete(&mut self, namespace: &str, key: Vec<u8>) {
        self.writes.delete(namespace, key);
    }

    fn compare_and_set(
        &mut self,
        namespace: &str,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) {
        self.writes.compare_and_set(namespace, key, expected, new_value);
    }

    fn compare_and_delete(&mut self, namespace: &str, key: Vec<u8>, expected: Vec<u8>) {
        self.writes.compare_and_delete(namespace, key, expected);
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemoryTransaction { backend, writes } = *self;
        let mut state = backend.write()?;

        for pre in &writes.preconditions {
            let current = lookup(&state.namespaces, &pre.namespace, &pre.key);
            if !precondition_holds(pre.expected.as_deref(), current.map(|b| &b[..])) {
                return Err(StorageError::Conflict);
            }
        }

        for ((namespace, key), value) in writes.writes {
            match value {
                Some(v) => {
                    state.namespaces.entry(namespace).or_default().insert(key, Bytes::from(v));
                },
                None => {
                    if let Some(entries) = state.namespaces.get_mut(&namespace) {
                        entries.remove(&key);
                    }
                },
            }
        }

        Ok(())
    }
}

//! Durable storage backend built on [`redb`].
//!
//! Each namespace is one redb table with `&[u8]` keys and values. Every write
//! is a redb write transaction committed with the default (immediate)
//! durability, so a successful return means the data survives a process
//! crash. redb serializes write transactions itself; readers get MVCC
//! snapshots and never block writers.
//!
//! redb calls are synchronous and may touch the disk, so each one runs on
//! tokio's blocking pool.

use std::{
    ops::Bound,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use ::redb::{Database, ReadableTable, TableDefinition, TableError, TableHandle};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::{Transaction, WriteSet, precondition_holds},
    types::{KeyValue, NamespaceDump},
};

fn namespace_table(namespace: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(namespace)
}

fn engine_error(e: impl Into<::redb::Error>) -> StorageError {
    let e = e.into();
    StorageError::io_with_source(e.to_string(), e)
}

/// File-backed storage engine.
///
/// Clones share one database handle. [`close`](StorageBackend::close)
/// releases it for every clone; the file is unlocked once in-flight
/// operations finish.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<RwLock<Option<Arc<Database>>>>,
    path: Arc<PathBuf>,
}

impl RedbBackend {
    /// Opens the database at `path`, creating the file if it does not exist.
    ///
    /// # Errors
    ///
    /// [`StorageError::Io`] if the file cannot be created, is locked by
    /// another process, or is not a redb database.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| {
            StorageError::io_with_source(format!("cannot open {}", path.display()), e)
        })?;
        tracing::info!("opened redb database");
        Ok(Self { db: Arc::new(RwLock::new(Some(Arc::new(db)))), path: Arc::new(path.to_owned()) })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn database(&self) -> StorageResult<Arc<Database>> {
        self.db.read().as_ref().map(Arc::clone).ok_or(StorageError::Closed)
    }

    /// Runs `op` against the database on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        F: FnOnce(&Database) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.database()?;
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::internal_with_source("storage task failed", e))?
    }
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .field("open", &self.db.read().is_some())
            .finish()
    }
}

#[async_trait]
impl StorageBackend for RedbBackend {
    #[tracing::instrument(level = "trace", skip(self, key, value))]
    async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()> {
        let namespace = namespace.to_owned();
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(engine_error)?;
            {
                let mut table = txn.open_table(namespace_table(&namespace)).map_err(engine_error)?;
                table.insert(key.as_slice(), value.as_slice()).map_err(engine_error)?;
            }
            txn.commit().map_err(engine_error)
        })
        .await
    }

    #[tracing::instrument(level = "trace", skip(self, key))]
    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Bytes> {
        let namespace = namespace.to_owned();
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(engine_error)?;
            let table = match txn.open_table(namespace_table(&namespace)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(StorageError::not_found(namespace, key));
                },
                Err(e) => return Err(engine_error(e)),
            };
            let value = table.get(key.as_slice()).map_err(engine_error)?;
            match value {
                Some(guard) => Ok(Bytes::copy_from_slice(guard.value())),
                None => Err(StorageError::not_found(namespace, key)),
            }
        })
        .await
    }

    #[tracing::instrument(level = "trace", skip(self, key))]
    async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()> {
        let namespace = namespace.to_owned();
        let key = key.to_vec();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(engine_error)?;
            {
                let mut table = txn.open_table(namespace_table(&namespace)).map_err(engine_error)?;
                table.remove(key.as_slice()).map_err(engine_error)?;
            }
            txn.commit().map_err(engine_error)
        })
        .await
    }

    #[tracing::instrument(level = "trace", skip(self, prefix, after))]
    async fn scan_keys(
        &self,
        namespace: &str,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let namespace = namespace.to_owned();
        let prefix = prefix.to_vec();
        let after = after.map(<[u8]>::to_vec);
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(engine_error)?;
            let table = match txn.open_table(namespace_table(&namespace)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(e) => return Err(engine_error(e)),
            };

            let start = match after.as_deref() {
                Some(after) if after >= prefix.as_slice() => Bound::Excluded(after),
                _ => Bound::Included(prefix.as_slice()),
            };

            let mut keys = Vec::new();
            for entry in table.range::<&[u8]>((start, Bound::Unbounded)).map_err(engine_error)? {
                let (key, _) = entry.map_err(engine_error)?;
                let key = key.value();
                if !key.starts_with(&prefix) {
                    break;
                }
                keys.push(Bytes::copy_from_slice(key));
                if keys.len() >= limit {
                    break;
                }
            }
            Ok(keys)
        })
        .await
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        self.database()?;
        Ok(Box::new(RedbTransaction { backend: self.clone(), writes: WriteSet::default() }))
    }

    #[tracing::instrument(skip(self))]
    async fn dump(&self) -> StorageResult<Vec<NamespaceDump>> {
        self.blocking(|db| {
            let txn = db.begin_read().map_err(engine_error)?;
            let mut dumps = Vec::new();
            for handle in txn.list_tables().map_err(engine_error)? {
                let namespace = handle.name().to_owned();
                let table = txn.open_table(namespace_table(&namespace)).map_err(engine_error)?;
                let mut entries = Vec::new();
                for entry in table.iter().map_err(engine_error)? {
                    let (key, value) = entry.map_err(engine_error)?;
                    entries.push(KeyValue::new(
                        Bytes::copy_from_slice(key.value()),
                        Bytes::copy_from_slice(value.value()),
                    ));
                }
                if !entries.is_empty() {
                    dumps.push(NamespaceDump { namespace, entries });
                }
            }
            dumps.sort_by(|a, b| a.namespace.cmp(&b.namespace));
            Ok(dumps)
        })
        .await
    }

    async fn close(&self) -> StorageResult<()> {
        if self.db.write().take().is_some() {
            tracing::info!(path = %self.path.display(), "closed redb database");
        }
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.blocking(|db| db.begin_read().map(drop).map_err(engine_error)).await
    }
}

/// redb-backed transaction.
///
/// Buffered operations are replayed inside a single redb write transaction at
/// commit. Preconditions are checked inside that same write transaction, so
/// no other writer can interleave between the check and the write.
struct RedbTransaction {
    backend: RedbBackend,
    writes: WriteSet,
}

fn apply(db: &Database, writes: WriteSet) -> StorageResult<()> {
    let txn = db.begin_write().map_err(engine_error)?;

    let mut conflict = false;
    for pre in &writes.preconditions {
        let table = txn.open_table(namespace_table(&pre.namespace)).map_err(engine_error)?;
        let current = table.get(pre.key.as_slice()).map_err(engine_error)?.map(|g| g.value().to_vec());
        if !precondition_holds(pre.expected.as_deref(), current.as_deref()) {
            conflict = true;
            break;
        }
    }
    if conflict {
        txn.abort().map_err(engine_error)?;
        return Err(StorageError::Conflict);
    }

    for ((namespace, key), value) in &writes.writes {
        let mut table = txn.open_table(namespace_table(namespace)).map_err(engine_error)?;
        match value {
            Some(value) => {
                table.insert(key.as_slice(), value.as_slice()).map_err(engine_error)?;
            },
            None => {
                table.remove(key.as_slice()).map_err(engine_error)?;
            },
        }
    }

    txn.commit().map_err(engine_error)
}

#[async_trait]
impl Transaction for RedbTransaction {
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

    #[tracing::instrument(level = "trace", skip(self))]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let RedbTransaction { backend, writes } = *self;
        if writes.is_empty() {
            backend.database()?;
            return Ok(());
        }
        backend.blocking(move |db| apply(db, writes)).await
    }
}

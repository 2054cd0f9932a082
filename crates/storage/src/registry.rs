//! Namespace registry: the fixed set of namespaces, their key encodings and a
//! typed facade over any [`StorageBackend`].
//!
//! # Key Encoding
//!
//! | Namespace | Key |
//! |-----------|-----|
//! | `users` | username, UTF-8 |
//! | `sessions` | session token, UTF-8 |
//! | `patients` | patient id, 8 bytes big-endian |
//! | `records` | record id, 8 bytes big-endian |
//! | `record_index` | `p/` + patient id (8 BE), or `s/` + hospital (2 BE) + specialty (2 BE) |
//!
//! Big-endian ids make byte order equal numeric order, and since ids are
//! time-ordered, equal creation order.
//!
//! Values are JSON snapshots of the entity.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::StorageBackend,
    cursor::KeyCursor,
    error::{StorageError, StorageResult},
    transaction::Transaction,
};

/// The logical partitions of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Staff accounts, keyed by username.
    Users,
    /// Live sessions, keyed by token.
    Sessions,
    /// Patients, keyed by id.
    Patients,
    /// Clinical records, keyed by id.
    Records,
    /// Derived patient and scope indexes over `records`.
    RecordIndex,
}

impl Namespace {
    /// Every namespace, in declaration order.
    pub const ALL: [Namespace; 5] =
        [Self::Users, Self::Sessions, Self::Patients, Self::Records, Self::RecordIndex];

    /// The engine-level namespace name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Sessions => "sessions",
            Self::Patients => "patients",
            Self::Records => "records",
            Self::RecordIndex => "record_index",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key encoders for each namespace.
pub mod keys {
    use crate::error::{StorageError, StorageResult};

    /// Prefix of patient index entries.
    pub const PATIENT_INDEX_PREFIX: &[u8] = b"p/";

    /// Prefix of scope index entries.
    pub const SCOPE_INDEX_PREFIX: &[u8] = b"s/";

    /// Encodes a numeric id as 8 big-endian bytes.
    #[must_use]
    pub fn id(id: u64) -> Vec<u8> {
        id.to_be_bytes().to_vec()
    }

    /// Decodes an 8-byte big-endian id.
    ///
    /// # Errors
    ///
    /// [`StorageError::Serialization`] if `bytes` is not exactly 8 bytes long.
    pub fn decode_id(bytes: &[u8]) -> StorageResult<u64> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            StorageError::serialization(format!("id key must be 8 bytes, got {}", bytes.len()))
        })?;
        Ok(u64::from_be_bytes(raw))
    }

    /// Index key listing every record of one patient.
    #[must_use]
    pub fn patient_index(patient_id: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(PATIENT_INDEX_PREFIX.len() + 8);
        key.extend_from_slice(PATIENT_INDEX_PREFIX);
        key.extend_from_slice(&patient_id.to_be_bytes());
        key
    }

    /// Index key listing every record of one (hospital, specialty) scope.
    #[must_use]
    pub fn scope_index(hospital: u16, specialty: u16) -> Vec<u8> {
        let mut key = Vec::with_capacity(SCOPE_INDEX_PREFIX.len() + 4);
        key.extend_from_slice(SCOPE_INDEX_PREFIX);
        key.extend_from_slice(&hospital.to_be_bytes());
        key.extend_from_slice(&specialty.to_be_bytes());
        key
    }
}

/// A type persisted in exactly one namespace.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Namespace this entity lives in.
    const NAMESPACE: Namespace;

    /// The entity's storage key.
    fn key(&self) -> Vec<u8>;
}

/// Encodes a value as a JSON snapshot.
///
/// # Errors
///
/// [`StorageError::Serialization`] if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StorageError::serialization_with_source("encode failed", e))
}

/// Decodes a JSON snapshot.
///
/// # Errors
///
/// [`StorageError::Serialization`] if the bytes are not a valid snapshot of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::serialization_with_source("decode failed", e))
}

/// Typed facade over a storage engine.
///
/// Cheap to clone when the engine is.
#[derive(Debug, Clone)]
pub struct Registry<B> {
    backend: B,
}

impl<B: StorageBackend> Registry<B> {
    /// Wraps an open engine.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying engine.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Loads an entity by key.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotFound`] if absent, [`StorageError::Serialization`] if
    /// the stored snapshot does not decode.
    pub async fn load<E: Entity>(&self, key: &[u8]) -> StorageResult<E> {
        let bytes = self.backend.get(E::NAMESPACE.as_str(), key).await?;
        decode(&bytes)
    }

    /// Loads an entity by key, mapping absence to `None`.
    pub async fn try_load<E: Entity>(&self, key: &[u8]) -> StorageResult<Option<E>> {
        match self.backend.try_get(E::NAMESPACE.as_str(), key).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Loads an entity together with its raw snapshot, for later
    /// compare-and-set.
    pub async fn load_with_snapshot<E: Entity>(&self, key: &[u8]) -> StorageResult<(E, Bytes)> {
        let bytes = self.backend.get(E::NAMESPACE.as_str(), key).await?;
        let entity = decode(&bytes)?;
        Ok((entity, bytes))
    }

    /// Upserts an entity.
    pub async fn store<E: Entity>(&self, entity: &E) -> StorageResult<()> {
        self.backend.put(E::NAMESPACE.as_str(), &entity.key(), encode(entity)?).await
    }

    /// Inserts an entity only if its key is free.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`] if the key already holds a value.
    pub async fn insert_new<E: Entity>(&self, entity: &E) -> StorageResult<()> {
        let mut txn = self.transaction().await?;
        txn.insert_new(entity)?;
        txn.commit().await
    }

    /// Removes an entity. Idempotent.
    pub async fn remove<E: Entity>(&self, key: &[u8]) -> StorageResult<()> {
        self.backend.delete(E::NAMESPACE.as_str(), key).await
    }

    /// Lazy cursor over every key of a namespace.
    pub fn keys(&self, namespace: Namespace) -> KeyCursor<'_, B> {
        self.backend.list_keys(namespace.as_str())
    }

    /// Loads every entity of a namespace in key order.
    ///
    /// Entries deleted between listing and loading are skipped.
    pub async fn load_all<E: Entity>(&self) -> StorageResult<Vec<E>> {
        let mut cursor = self.keys(E::NAMESPACE);
        let mut entities = Vec::new();
        while let Some(key) = cursor.next_key().await? {
            if let Some(entity) = self.try_load(&key).await? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Begins a typed transaction.
    pub async fn transaction(&self) -> StorageResult<RegistryTransaction> {
        Ok(RegistryTransaction { inner: self.backend.transaction().await? })
    }
}

/// Typed wrapper over an engine [`Transaction`].
pub struct RegistryTransaction {
    inner: Box<dyn Transaction>,
}

impl RegistryTransaction {
    /// Reads an entity, seeing this transaction's pending writes.
    pub async fn load<E: Entity>(&self, key: &[u8]) -> StorageResult<Option<E>> {
        match self.inner.get(E::NAMESPACE.as_str(), key).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Reads raw bytes, seeing this transaction's pending writes.
    pub async fn get_raw(&self, namespace: Namespace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.get(namespace.as_str(), key).await
    }

    /// Buffers an upsert of `entity`.
    pub fn store<E: Entity>(&mut self, entity: &E) -> StorageResult<()> {
        self.inner.put(E::NAMESPACE.as_str(), entity.key(), encode(entity)?);
        Ok(())
    }

    /// Buffers an insert that fails the commit if the key is taken.
    pub fn insert_new<E: Entity>(&mut self, entity: &E) -> StorageResult<()> {
        self.inner.compare_and_set(E::NAMESPACE.as_str(), entity.key(), None, encode(entity)?);
        Ok(())
    }

    /// Buffers a replacement that fails the commit unless the stored snapshot
    /// still equals `previous`.
    pub fn replace<E: Entity>(&mut self, previous: &[u8], entity: &E) -> StorageResult<()> {
        self.inner.compare_and_set(
            E::NAMESPACE.as_str(),
            entity.key(),
            Some(previous.to_vec()),
            encode(entity)?,
        );
        Ok(())
    }

    /// Buffers a raw conditional write.
    pub fn compare_and_set_raw(
        &mut self,
        namespace: Namespace,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        value: Vec<u8>,
    ) {
        self.inner.compare_and_set(namespace.as_str(), key, expected, value);
    }

    /// Buffers a raw delete that fails the commit unless the stored bytes
    /// still equal `expected`.
    pub fn compare_and_delete_raw(&mut self, namespace: Namespace, key: Vec<u8>, expected: Vec<u8>) {
        self.inner.compare_and_delete(namespace.as_str(), key, expected);
    }

    /// Buffers a delete.
    pub fn delete(&mut self, namespace: Namespace, key: Vec<u8>) {
        self.inner.delete(namespace.as_str(), key);
    }

    /// Commits atomically.
    pub async fn commit(self) -> StorageResult<()> {
        self.inner.commit().await
    }
}

impl std::fmt::Debug for RegistryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryTransaction").finish_non_exhaustive()
    }
}

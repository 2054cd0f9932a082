//! Derived record index.
//!
//! The `record_index` namespace maps each patient (`p/` keys) and each scope
//! (`s/` keys) to the JSON array of record ids that reference it, sorted
//! ascending and deduplicated. Since ids are time-ordered, array order is
//! creation order.
//!
//! Entries are only ever changed inside the same transaction as the record
//! they describe, guarded by a compare-and-set on the entry's previous bytes.
//! The index is a cache: [`RecordIndex::verify`] compares it with `records`
//! and [`RecordIndex::rebuild`] re-derives it from scratch.

use std::collections::BTreeMap;

use bytes::Bytes;
use expedientes_storage::{
    Namespace, Registry, RegistryTransaction, StorageBackend, StorageResult,
    registry::{decode, encode, keys},
};

use crate::types::{PatientId, Record, RecordId, Scope};

/// Result of comparing the index with the records it derives from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Records scanned.
    pub records: usize,
    /// Index entries scanned.
    pub entries: usize,
    /// Printable keys of entries that are missing, stale, extra or undecodable.
    pub divergent: Vec<String>,
}

impl IndexReport {
    /// Returns `true` when the index matches the records exactly.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.divergent.is_empty()
    }
}

/// Renders an index key for logs: `p/<patient>` or `s/<hospital>/<specialty>`.
#[must_use]
pub fn describe_key(key: &[u8]) -> String {
    if let Some(rest) = key.strip_prefix(keys::PATIENT_INDEX_PREFIX)
        && let Ok(id) = keys::decode_id(rest)
    {
        return format!("p/{id}");
    }
    if let Some(rest) = key.strip_prefix(keys::SCOPE_INDEX_PREFIX)
        && let [h0, h1, s0, s1] = *rest
    {
        return format!("s/{}/{}", u16::from_be_bytes([h0, h1]), u16::from_be_bytes([s0, s1]));
    }
    format!("{key:?}")
}

/// Reads and maintains the record index.
#[derive(Debug, Clone)]
pub struct RecordIndex<B> {
    registry: Registry<B>,
}

impl<B: StorageBackend> RecordIndex<B> {
    /// Wraps a registry.
    pub fn new(registry: Registry<B>) -> Self {
        Self { registry }
    }

    /// Record ids of one patient, in creation order.
    pub async fn ids_for_patient(&self, patient: PatientId) -> StorageResult<Vec<RecordId>> {
        self.ids_at(&keys::patient_index(patient.0)).await
    }

    /// Record ids stamped with one scope, in creation order.
    pub async fn ids_for_scope(&self, scope: Scope) -> StorageResult<Vec<RecordId>> {
        self.ids_at(&scope.index_key()).await
    }

    async fn ids_at(&self, key: &[u8]) -> StorageResult<Vec<RecordId>> {
        let bytes = self.registry.backend().try_get(Namespace::RecordIndex.as_str(), key).await?;
        Ok(decode_ids(bytes.as_deref())?.into_iter().map(RecordId).collect())
    }

    /// Compares every index entry with what `records` implies.
    #[tracing::instrument(skip(self))]
    pub async fn verify(&self) -> StorageResult<IndexReport> {
        let actual = self.entries().await?;
        let (expected, records) = self.derive().await?;

        let mut report = IndexReport { records, entries: actual.len(), divergent: Vec::new() };
        for (key, ids) in &expected {
            let matches = actual
                .get(key)
                .is_some_and(|bytes| decode_ids(Some(bytes.as_ref())).is_ok_and(|stored| &stored == ids));
            if !matches {
                report.divergent.push(describe_key(key));
            }
        }
        for key in actual.keys().filter(|key| !expected.contains_key(*key)) {
            report.divergent.push(describe_key(key));
        }

        if report.is_consistent() {
            tracing::info!(records = report.records, entries = report.entries, "record index verified");
        } else {
            tracing::warn!(divergent = ?report.divergent, "record index diverges from records");
        }
        Ok(report)
    }

    /// Replaces the whole index with entries re-derived from `records`, in
    /// one transaction. Returns the number of entries written.
    ///
    /// The current entries are read before the records. Every write and
    /// every delete is conditional on an entry still holding the bytes read,
    /// so a record created while the rebuild runs makes it fail with
    /// `Conflict` and leaves that record's entries in place.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self) -> StorageResult<usize> {
        let actual = self.entries().await?;
        self.rebuild_over(actual).await
    }

    /// Second half of [`rebuild`](Self::rebuild): derives from `records` and
    /// commits against the `actual` entries read earlier.
    async fn rebuild_over(&self, actual: BTreeMap<Vec<u8>, Bytes>) -> StorageResult<usize> {
        let (expected, records) = self.derive().await?;

        let mut txn = self.registry.transaction().await?;
        for (key, bytes) in actual.iter().filter(|(key, _)| !expected.contains_key(*key)) {
            txn.compare_and_delete_raw(Namespace::RecordIndex, key.clone(), bytes.to_vec());
        }
        for (key, ids) in &expected {
            let previous = actual.get(key).map(|bytes| bytes.to_vec());
            txn.compare_and_set_raw(Namespace::RecordIndex, key.clone(), previous, encode(ids)?);
        }
        txn.commit().await?;

        tracing::info!(records, entries = expected.len(), "record index rebuilt");
        Ok(expected.len())
    }

    /// Index entries implied by `records`, plus the number of records seen.
    async fn derive(&self) -> StorageResult<(BTreeMap<Vec<u8>, Vec<u64>>, usize)> {
        let records: Vec<Record> = self.registry.load_all().await?;
        let mut expected: BTreeMap<Vec<u8>, Vec<u64>> = BTreeMap::new();
        // load_all yields key order, which is id order, so pushes stay sorted.
        for record in &records {
            expected.entry(record.patient_index_key()).or_default().push(record.id.0);
            expected.entry(record.scope.index_key()).or_default().push(record.id.0);
        }
        Ok((expected, records.len()))
    }

    /// Current raw index entries.
    async fn entries(&self) -> StorageResult<BTreeMap<Vec<u8>, Bytes>> {
        let backend = self.registry.backend();
        let mut cursor = self.registry.keys(Namespace::RecordIndex);
        let mut entries = BTreeMap::new();
        while let Some(key) = cursor.next_key().await? {
            if let Some(value) = backend.try_get(Namespace::RecordIndex.as_str(), &key).await? {
                entries.insert(key.to_vec(), value);
            }
        }
        Ok(entries)
    }
}

/// Buffers the insertion of `id` into the entry at `key`.
///
/// The write is conditional on the entry still holding the bytes read
/// here, so a concurrent update to the same entry makes the commit fail
/// with `Conflict` rather than lose an id.
pub async fn stage_insert(
    txn: &mut RegistryTransaction,
    key: Vec<u8>,
    id: RecordId,
) -> StorageResult<()> {
    let current = txn.get_raw(Namespace::RecordIndex, &key).await?;
    let mut ids = decode_ids(current.as_deref())?;
    if let Err(position) = ids.binary_search(&id.0) {
        ids.insert(position, id.0);
    }
    txn.compare_and_set_raw(
        Namespace::RecordIndex,
        key,
        current.map(|bytes| bytes.to_vec()),
        encode(&ids)?,
    );
    Ok(())
}

fn decode_ids(bytes: Option<&[u8]>) -> StorageResult<Vec<u64>> {
    match bytes {
        Some(bytes) => decode(bytes),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Utc;
    use expedientes_storage::MemoryBackend;

    use super::*;

    fn record(id: u64, patient: u64, scope: Scope) -> Record {
        let now = Utc::now();
        Record {
            id: RecordId(id),
            patient_id: PatientId(patient),
            author: "doctorA".to_owned(),
            scope,
            observations: format!("entry {id}"),
            created_at: now,
            modified_at: now,
        }
    }

    async fn insert(registry: &Registry<MemoryBackend>, record: &Record) {
        let mut txn = registry.transaction().await.unwrap();
        txn.insert_new(record).unwrap();
        stage_insert(&mut txn, record.patient_index_key(), record.id)
            .await
            .unwrap();
        stage_insert(&mut txn, record.scope.index_key(), record.id)
            .await
            .unwrap();
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn staged_ids_stay_sorted_and_unique() {
        let registry = Registry::new(MemoryBackend::new());
        let index = RecordIndex::new(registry.clone());
        let scope = Scope::new(2, 1);

        for id in [30, 10, 20] {
            insert(&registry, &record(id, 1, scope)).await;
        }
        let key = keys::patient_index(1);
        let mut txn = registry.transaction().await.unwrap();
        stage_insert(&mut txn, key, RecordId(20)).await.unwrap();
        txn.commit().await.unwrap();

        let ids = index.ids_for_patient(PatientId(1)).await.unwrap();
        assert_eq!(ids, vec![RecordId(10), RecordId(20), RecordId(30)]);
        assert_eq!(index.ids_for_scope(scope).await.unwrap().len(), 3);
        assert!(index.ids_for_patient(PatientId(99)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_stage_on_same_entry_conflicts() {
        let registry = Registry::new(MemoryBackend::new());
        let key = keys::scope_index(2, 1);

        let mut first = registry.transaction().await.unwrap();
        let mut second = registry.transaction().await.unwrap();
        stage_insert(&mut first, key.clone(), RecordId(1)).await.unwrap();
        stage_insert(&mut second, key, RecordId(2)).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(expedientes_storage::StorageError::Conflict)));
    }

    #[tokio::test]
    async fn verify_detects_and_rebuild_repairs_divergence() {
        let registry = Registry::new(MemoryBackend::new());
        let index = RecordIndex::new(registry.clone());
        insert(&registry, &record(1, 1, Scope::new(2, 1))).await;
        insert(&registry, &record(2, 2, Scope::new(3, 4))).await;
        assert!(index.verify().await.unwrap().is_consistent());

        // A record written without its index entries, and an orphan entry.
        registry.store(&record(3, 1, Scope::new(2, 1))).await.unwrap();
        registry
            .backend()
            .put(Namespace::RecordIndex.as_str(), &keys::patient_index(77), encode(&vec![99u64]).unwrap())
            .await
            .unwrap();

        let report = index.verify().await.unwrap();
        assert_eq!(report.records, 3);
        assert!(report.divergent.contains(&"p/1".to_owned()));
        assert!(report.divergent.contains(&"s/2/1".to_owned()));
        assert!(report.divergent.contains(&"p/77".to_owned()));

        assert_eq!(index.rebuild().await.unwrap(), 4);
        assert!(index.verify().await.unwrap().is_consistent());
        assert_eq!(index.ids_for_patient(PatientId(1)).await.unwrap(), vec![RecordId(1), RecordId(3)]);
        assert!(index.ids_for_patient(PatientId(77)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_created_during_rebuild_is_kept() {
        let registry = Registry::new(MemoryBackend::new());
        let index = RecordIndex::new(registry.clone());
        insert(&registry, &record(1, 1, Scope::new(2, 1))).await;

        let snapshot = index.entries().await.unwrap();
        insert(&registry, &record(2, 5, Scope::new(3, 4))).await;

        let result = index.rebuild_over(snapshot).await;
        assert!(matches!(result, Err(expedientes_storage::StorageError::Conflict)), "{result:?}");
        assert_eq!(index.ids_for_patient(PatientId(5)).await.unwrap(), vec![RecordId(2)]);
        assert_eq!(index.ids_for_scope(Scope::new(3, 4)).await.unwrap(), vec![RecordId(2)]);

        assert_eq!(index.rebuild().await.unwrap(), 4);
        assert!(index.verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn orphan_changed_during_rebuild_is_not_deleted() {
        let registry = Registry::new(MemoryBackend::new());
        let index = RecordIndex::new(registry.clone());
        let orphan = keys::patient_index(77);
        let backend = registry.backend();
        backend
            .put(Namespace::RecordIndex.as_str(), &orphan, encode(&vec![99u64]).unwrap())
            .await
            .unwrap();

        let snapshot = index.entries().await.unwrap();
        backend
            .put(Namespace::RecordIndex.as_str(), &orphan, encode(&vec![98u64, 99]).unwrap())
            .await
            .unwrap();

        let result = index.rebuild_over(snapshot).await;
        assert!(matches!(result, Err(expedientes_storage::StorageError::Conflict)), "{result:?}");
        assert_eq!(
            backend.try_get(Namespace::RecordIndex.as_str(), &orphan).await.unwrap(),
            Some(Bytes::from(encode(&vec![98u64, 99]).unwrap()))
        );

        assert_eq!(index.rebuild().await.unwrap(), 0);
        assert!(backend.try_get(Namespace::RecordIndex.as_str(), &orphan).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undecodable_entry_is_divergent() {
        let registry = Registry::new(MemoryBackend::new());
        let index = RecordIndex::new(registry.clone());
        insert(&registry, &record(1, 1, Scope::new(2, 1))).await;
        registry
            .backend()
            .put(Namespace::RecordIndex.as_str(), &keys::patient_index(1), b"not json".to_vec())
            .await
            .unwrap();

        assert_eq!(index.verify().await.unwrap().divergent, vec!["p/1".to_owned()]);
        index.rebuild().await.unwrap();
        assert!(index.verify().await.unwrap().is_consistent());
    }

    #[test]
    fn describes_keys() {
        assert_eq!(describe_key(&keys::patient_index(42)), "p/42");
        assert_eq!(describe_key(&keys::scope_index(2, 1)), "s/2/1");
        assert_eq!(describe_key(b"??"), "[63, 63]");
    }
}

//! Conformance test suite for [`StorageBackend`] implementations.
//!
//! Async check functions that validate whether an engine satisfies the trait
//! contract. Every engine (in-memory, redb, or a future one) runs the same
//! suite.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with
//! a fresh backend instance:
//!
//! ```no_run
//! use expedientes_storage::conformance;
//! use expedientes_storage::MemoryBackend;
//!
//! #[tokio::test]
//! async fn crud_get_missing_key_is_not_found() {
//!     conformance::crud_get_missing_key_is_not_found(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | put/get/delete semantics, namespace isolation |
//! | Cursor | ordered, prefix-bounded, restartable key enumeration |
//! | Transaction | atomic commit, read-your-writes, cross-namespace atomicity |
//! | CAS | commit-time compare-and-set preconditions |
//! | Concurrent | thread-safety under parallel access |
//! | Lifecycle | dump, health check, close |

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    assert_storage_error, backend::StorageBackend, error::StorageError, testutil::make_key,
};

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a nonexistent key fails with `NotFound`; `try_get` returns `None`.
pub async fn crud_get_missing_key_is_not_found<B: StorageBackend>(backend: &B) {
    let result = backend.get("crud", b"nonexistent").await;
    assert_storage_error!(result, NotFound, "missing key");
    assert_eq!(backend.try_get("crud", b"nonexistent").await.expect("try_get"), None);
}

/// `put` then `get` round-trips the value.
pub async fn crud_put_then_get_returns_value<B: StorageBackend>(backend: &B) {
    backend.put("crud", b"k1", b"v1".to_vec()).await.expect("put should succeed");
    let val = backend.get("crud", b"k1").await.expect("get should succeed");
    assert_eq!(val, Bytes::from("v1"));
}

/// `put` on an existing key overwrites the value.
pub async fn crud_put_overwrites_existing<B: StorageBackend>(backend: &B) {
    backend.put("crud", b"k2", b"original".to_vec()).await.expect("put");
    backend.put("crud", b"k2", b"updated".to_vec()).await.expect("overwrite");
    assert_eq!(backend.get("crud", b"k2").await.expect("get"), Bytes::from("updated"));
}

/// `delete` on a nonexistent key, or in a never-written namespace, is a no-op.
pub async fn crud_delete_nonexistent_is_noop<B: StorageBackend>(backend: &B) {
    backend.delete("crud", b"ghost").await.expect("delete of missing key");
    backend.delete("never_written", b"ghost").await.expect("delete in empty namespace");
}

/// Double delete is idempotent.
pub async fn crud_delete_is_idempotent<B: StorageBackend>(backend: &B) {
    backend.put("crud", b"k3", b"val".to_vec()).await.expect("put");
    backend.delete("crud", b"k3").await.expect("first delete");
    backend.delete("crud", b"k3").await.expect("second delete should be noop");
    assert_storage_error!(backend.get("crud", b"k3").await, NotFound);
}

/// Keys are byte-level distinct: `"key"` and `"key\x00"` are different.
pub async fn crud_keys_are_byte_distinct<B: StorageBackend>(backend: &B) {
    backend.put("crud", b"key", b"a".to_vec()).await.expect("put key");
    backend.put("crud", b"key\x00", b"b".to_vec()).await.expect("put key+null");
    assert_eq!(backend.get("crud", b"key").await.expect("get"), Bytes::from("a"));
    assert_eq!(backend.get("crud", b"key\x00").await.expect("get"), Bytes::from("b"));
}

/// The same key in two namespaces holds two independent values.
pub async fn crud_namespaces_are_isolated<B: StorageBackend>(backend: &B) {
    backend.put("users", b"shared", b"account".to_vec()).await.expect("put users");
    backend.put("sessions", b"shared", b"session".to_vec()).await.expect("put sessions");
    backend.delete("users", b"shared").await.expect("delete users");

    assert_storage_error!(backend.get("users", b"shared").await, NotFound);
    assert_eq!(backend.get("sessions", b"shared").await.expect("get"), Bytes::from("session"));
}

/// Large values (1 MiB) round-trip correctly.
pub async fn crud_large_value_roundtrip<B: StorageBackend>(backend: &B) {
    let big = vec![0xCDu8; 1_048_576];
    backend.put("crud", b"big", big.clone()).await.expect("put large value");
    let val = backend.get("crud", b"big").await.expect("get large value");
    assert_eq!(val, Bytes::from(big));
}

// ============================================================================
// Cursor
// ============================================================================

/// `list_keys` yields every key in byte-lexicographic order.
pub async fn cursor_lists_keys_in_order<B: StorageBackend>(backend: &B) {
    for id in [300u64, 1, 65_536, 2] {
        backend.put("cursor", &id.to_be_bytes(), b"v".to_vec()).await.expect("put");
    }
    let keys = backend.list_keys("cursor").with_page_size(2).collect_all().await.expect("list");
    let ids: Vec<u64> = keys
        .iter()
        .map(|k| u64::from_be_bytes(k[..].try_into().expect("8-byte key")))
        .collect();
    assert_eq!(ids, vec![1, 2, 300, 65_536]);
}

/// `keys_by_prefix` stops at the prefix boundary.
pub async fn cursor_prefix_is_bounded<B: StorageBackend>(backend: &B) {
    for key in [b"p/a".as_slice(), b"p/b", b"q/a", b"o/z", b"p"] {
        backend.put("prefix", key, Vec::new()).await.expect("put");
    }
    let keys = backend.keys_by_prefix("prefix", b"p/").collect_all().await.expect("scan");
    assert_eq!(keys, vec![Bytes::from("p/a"), Bytes::from("p/b")]);
}

/// A cursor over a never-written namespace is empty.
pub async fn cursor_empty_namespace_is_empty<B: StorageBackend>(backend: &B) {
    let keys = backend.list_keys("nothing_here").collect_all().await.expect("list");
    assert!(keys.is_empty());
}

/// Each `list_keys` call starts from the first key.
pub async fn cursor_is_restartable<B: StorageBackend>(backend: &B) {
    for i in 0..5 {
        backend.put("restart", &make_key("k", i), Vec::new()).await.expect("put");
    }
    let mut first = backend.list_keys("restart");
    first.next_key().await.expect("advance");
    first.next_key().await.expect("advance");

    let fresh = backend.list_keys("restart").collect_all().await.expect("list");
    assert_eq!(fresh.first(), Some(&Bytes::from(make_key("k", 0))));
    assert_eq!(fresh.len(), 5);
}

/// `scan_keys` honours its `after` bound and `limit`.
pub async fn cursor_scan_pages_after_bound<B: StorageBackend>(backend: &B) {
    for i in 0..6 {
        backend.put("page", &make_key("k", i), Vec::new()).await.expect("put");
    }
    let after = make_key("k", 1);
    let page = backend.scan_keys("page", b"k:", Some(after.as_slice()), 3).await.expect("scan");
    let expected: Vec<Bytes> = (2..5).map(|i| Bytes::from(make_key("k", i))).collect();
    assert_eq!(page, expected);
    assert!(backend.scan_keys("page", b"", None, 0).await.expect("scan").is_empty());
}

// ============================================================================
// Transaction
// ============================================================================

/// Reads inside a transaction see its own pending writes.
pub async fn tx_read_your_writes<B: StorageBackend>(backend: &B) {
    let mut tx = backend.transaction().await.expect("begin tx");
    tx.put("tx", b"ryw".to_vec(), b"pending".to_vec());
    assert_eq!(tx.get("tx", b"ryw").await.expect("tx get"), Some(Bytes::from("pending")));
    tx.delete("tx", b"ryw".to_vec());
    assert_eq!(tx.get("tx", b"ryw").await.expect("tx get"), None);
}

/// Transactions see data committed before they began.
pub async fn tx_reads_committed_data<B: StorageBackend>(backend: &B) {
    backend.put("tx", b"pre", b"existing".to_vec()).await.expect("put");
    let tx = backend.transaction().await.expect("begin tx");
    assert_eq!(tx.get("tx", b"pre").await.expect("tx get"), Some(Bytes::from("existing")));
}

/// Commit applies every buffered operation across namespaces.
pub async fn tx_commit_applies_all<B: StorageBackend>(backend: &B) {
    backend.put("tx_a", b"doomed", b"x".to_vec()).await.expect("put");

    let mut tx = backend.transaction().await.expect("begin tx");
    tx.put("tx_a", b"one".to_vec(), b"1".to_vec());
    tx.put("tx_b", b"two".to_vec(), b"2".to_vec());
    tx.delete("tx_a", b"doomed".to_vec());
    tx.commit().await.expect("commit");

    assert_eq!(backend.get("tx_a", b"one").await.expect("get"), Bytes::from("1"));
    assert_eq!(backend.get("tx_b", b"two").await.expect("get"), Bytes::from("2"));
    assert_storage_error!(backend.get("tx_a", b"doomed").await, NotFound);
}

/// Dropping a transaction without committing discards its writes.
pub async fn tx_drop_without_commit_is_noop<B: StorageBackend>(backend: &B) {
    {
        let mut tx = backend.transaction().await.expect("begin tx");
        tx.put("tx", b"dropped".to_vec(), b"val".to_vec());
    }
    assert_storage_error!(backend.get("tx", b"dropped").await, NotFound);
}

/// Pending writes are invisible outside the transaction until commit.
pub async fn tx_writes_invisible_before_commit<B: StorageBackend>(backend: &B) {
    let mut tx = backend.transaction().await.expect("begin tx");
    tx.put("tx", b"hidden".to_vec(), b"val".to_vec());
    assert_storage_error!(backend.get("tx", b"hidden").await, NotFound);
    tx.commit().await.expect("commit");
    assert!(backend.get("tx", b"hidden").await.is_ok());
}

/// The value a transaction reads back for a key is the value its commit
/// stores, whatever mix of puts, deletes and guarded writes touched the key.
pub async fn tx_read_matches_committed_value<B: StorageBackend>(backend: &B) {
    let mut tx = backend.transaction().await.expect("begin tx");
    tx.compare_and_set("tx_mix", b"guard_then_put".to_vec(), None, b"guarded".to_vec());
    tx.put("tx_mix", b"guard_then_put".to_vec(), b"plain-later".to_vec());
    tx.put("tx_mix", b"put_then_guard".to_vec(), b"plain".to_vec());
    tx.compare_and_set("tx_mix", b"put_then_guard".to_vec(), None, b"guarded-later".to_vec());
    tx.compare_and_set("tx_mix", b"guard_then_delete".to_vec(), None, b"short-lived".to_vec());
    tx.delete("tx_mix", b"guard_then_delete".to_vec());

    let keys: [&[u8]; 3] = [b"guard_then_put", b"put_then_guard", b"guard_then_delete"];
    let mut seen = Vec::new();
    for key in keys {
        seen.push(tx.get("tx_mix", key).await.expect("tx get"));
    }
    assert_eq!(
        seen,
        vec![Some(Bytes::from("plain-later")), Some(Bytes::from("guarded-later")), None]
    );

    tx.commit().await.expect("commit");
    for (key, expected) in keys.into_iter().zip(seen) {
        assert_eq!(backend.try_get("tx_mix", key).await.expect("get"), expected, "{key:?}");
    }
}

// ============================================================================
// CAS
// ============================================================================

/// `compare_and_set` with `expected = None` inserts when the key is absent.
pub async fn cas_insert_if_absent<B: StorageBackend>(backend: &B) {
    let mut tx = backend.transaction().await.expect("begin tx");
    tx.compare_and_set("cas", b"new".to_vec(), None, b"created".to_vec());
    tx.commit().await.expect("commit");
    assert_eq!(backend.get("cas", b"new").await.expect("get"), Bytes::from("created"));
}

/// `compare_and_set` with `expected = None` conflicts when the key exists.
pub async fn cas_insert_if_absent_fails_when_key_exists<B: StorageBackend>(backend: &B) {
    backend.put("cas", b"taken", b"first".to_vec()).await.expect("put");
    let mut tx = backend.transaction().await.expect("begin tx");
    tx.compare_and_set("cas", b"taken".to_vec(), None, b"second".to_vec());
    assert_storage_error!(tx.commit().await, Conflict, "insert on existing key should conflict");
    assert_eq!(backend.get("cas", b"taken").await.expect("get"), Bytes::from("first"));
}

/// `compare_and_set` with the current value succeeds.
pub async fn cas_update_with_matching_value<B: StorageBackend>(backend: &B) {
    backend.put("cas", b"m", b"old".to_vec()).await.expect("put");
    let mut tx = backend.transaction().await.expect("begin tx");
    tx.compare_and_set("cas", b"m".to_vec(), Some(b"old".to_vec()), b"new".to_vec());
    tx.commit().await.expect("commit");
    assert_eq!(backend.get("cas", b"m").await.expect("get"), Bytes::from("new"));
}

/// One failed precondition rejects the commit and applies nothing.
pub async fn cas_conflict_rejects_whole_commit<B: StorageBackend>(backend: &B) {
    backend.put("cas", b"guard", b"actual".to_vec()).await.expect("put");

    let mut tx = backend.transaction().await.expect("begin tx");
    tx.put("cas_other", b"side".to_vec(), b"effect".to_vec());
    tx.compare_and_set("cas", b"guard".to_vec(), Some(b"stale".to_vec()), b"nope".to_vec());
    assert_storage_error!(tx.commit().await, Conflict, "CAS mismatch should reject commit");

    assert_eq!(backend.get("cas", b"guard").await.expect("get"), Bytes::from("actual"));
    assert_storage_error!(backend.get("cas_other", b"side").await, NotFound);
}

/// `compare_and_delete` removes the key only while it still holds the
/// expected bytes.
pub async fn cas_delete_requires_expected_value<B: StorageBackend>(backend: &B) {
    backend.put("cas_del", b"kept", b"changed".to_vec()).await.expect("put");
    backend.put("cas_del", b"other", b"x".to_vec()).await.expect("put");
    let mut tx = backend.transaction().await.expect("begin tx");
    tx.compare_and_delete("cas_del", b"kept".to_vec(), b"seen".to_vec());
    tx.delete("cas_del", b"other".to_vec());
    assert_storage_error!(tx.commit().await, Conflict);
    assert_eq!(backend.get("cas_del", b"kept").await.expect("get"), Bytes::from("changed"));
    assert_eq!(backend.get("cas_del", b"other").await.expect("get"), Bytes::from("x"));

    let mut tx = backend.transaction().await.expect("begin tx");
    tx.compare_and_delete("cas_del", b"kept".to_vec(), b"changed".to_vec());
    tx.commit().await.expect("commit");
    assert_storage_error!(backend.get("cas_del", b"kept").await, NotFound);

    let mut tx = backend.transaction().await.expect("begin tx");
    tx.compare_and_delete("cas_del", b"kept".to_vec(), b"changed".to_vec());
    assert_storage_error!(tx.commit().await, Conflict, "absent key");
}

// ============================================================================
// Concurrent access
// ============================================================================

/// Concurrent puts to different keys all succeed.
///
/// Requires `B: 'static` so the backend can be shared across spawned tasks
/// via `Arc`.
pub async fn concurrent_puts_to_different_keys<B: StorageBackend + 'static>(backend: Arc<B>) {
    let mut handles = Vec::new();
    for i in 0usize..50 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            backend.put("conc", &make_key("c", i), format!("val:{i}").into_bytes()).await
        }));
    }
    for handle in handles {
        handle.await.expect("task join").expect("concurrent put");
    }

    let keys = backend.list_keys("conc").collect_all().await.expect("list");
    assert_eq!(keys.len(), 50);
}

/// Concurrent CAS on the same key: exactly one writer wins.
pub async fn concurrent_cas_exactly_one_winner<B: StorageBackend + 'static>(backend: Arc<B>) {
    backend.put("ccas", b"k", b"v0".to_vec()).await.expect("initial put");

    let mut handles = Vec::new();
    for i in 0u32..10 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            let mut tx = backend.transaction().await?;
            tx.compare_and_set(
                "ccas",
                b"k".to_vec(),
                Some(b"v0".to_vec()),
                format!("writer-{i}").into_bytes(),
            );
            tx.commit().await
        }));
    }

    let mut successes = 0u32;
    let mut conflicts = 0u32;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(()) => successes += 1,
            Err(StorageError::Conflict) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(successes, 1, "exactly one CAS writer should win");
    assert_eq!(conflicts, 9, "remaining writers should get Conflict");
}

// ============================================================================
// Lifecycle
// ============================================================================

/// `health_check` succeeds on an open engine.
pub async fn health_check_succeeds<B: StorageBackend>(backend: &B) {
    backend.health_check().await.expect("health_check");
}

/// `dump` lists every written namespace with its entries in key order.
pub async fn dump_lists_namespaces<B: StorageBackend>(backend: &B) {
    backend.put("dump_b", b"2", b"y".to_vec()).await.expect("put");
    backend.put("dump_a", b"b", b"x2".to_vec()).await.expect("put");
    backend.put("dump_a", b"a", b"x1".to_vec()).await.expect("put");

    let dump = backend.dump().await.expect("dump");
    let a = dump.iter().find(|d| d.namespace == "dump_a").expect("dump_a present");
    let keys: Vec<&[u8]> = a.entries.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![b"a".as_slice(), b"b"]);
    assert!(dump.iter().any(|d| d.namespace == "dump_b"));
}

/// After `close`, operations fail with `Closed`; closing again is a no-op.
///
/// Destructive: run it last.
pub async fn close_rejects_further_operations<B: StorageBackend>(backend: &B) {
    backend.close().await.expect("close");
    backend.close().await.expect("second close");
    assert_storage_error!(backend.get("crud", b"k1").await, Closed);
    assert_storage_error!(backend.put("crud", b"k1", Vec::new()).await, Closed);
    assert!(backend.transaction().await.is_err());
    assert!(backend.health_check().await.is_err());
}

// ============================================================================
// Convenience runner
// ============================================================================

/// Run the full conformance suite against the given backend.
///
/// Ends by closing the backend.
///
/// ```no_run
/// use std::sync::Arc;
/// use expedientes_storage::conformance;
/// use expedientes_storage::MemoryBackend;
///
/// #[tokio::test]
/// async fn memory_backend_conformance() {
///     conformance::run_all(Arc::new(MemoryBackend::new())).await;
/// }
/// ```
pub async fn run_all<B: StorageBackend + 'static>(backend: Arc<B>) {
    // CRUD
    crud_get_missing_key_is_not_found(backend.as_ref()).await;
    crud_put_then_get_returns_value(backend.as_ref()).await;
    crud_put_overwrites_existing(backend.as_ref()).await;
    crud_delete_nonexistent_is_noop(backend.as_ref()).await;
    crud_delete_is_idempotent(backend.as_ref()).await;
    crud_keys_are_byte_distinct(backend.as_ref()).await;
    crud_namespaces_are_isolated(backend.as_ref()).await;
    crud_large_value_roundtrip(backend.as_ref()).await;

    // Cursor
    cursor_lists_keys_in_order(backend.as_ref()).await;
    cursor_prefix_is_bounded(backend.as_ref()).await;
    cursor_empty_namespace_is_empty(backend.as_ref()).await;
    cursor_is_restartable(backend.as_ref()).await;
    cursor_scan_pages_after_bound(backend.as_ref()).await;

    // Transaction
    tx_read_your_writes(backend.as_ref()).await;
    tx_reads_committed_data(backend.as_ref()).await;
    tx_commit_applies_all(backend.as_ref()).await;
    tx_drop_without_commit_is_noop(backend.as_ref()).await;
    tx_writes_invisible_before_commit(backend.as_ref()).await;
    tx_read_matches_committed_value(backend.as_ref()).await;

    // CAS
    cas_insert_if_absent(backend.as_ref()).await;
    cas_insert_if_absent_fails_when_key_exists(backend.as_ref()).await;
    cas_update_with_matching_value(backend.as_ref()).await;
    cas_conflict_rejects_whole_commit(backend.as_ref()).await;
    cas_delete_requires_expected_value(backend.as_ref()).await;

    // Concurrent
    concurrent_puts_to_different_keys(Arc::clone(&backend)).await;
    concurrent_cas_exactly_one_winner(Arc::clone(&backend)).await;

    // Lifecycle
    health_check_succeeds(backend.as_ref()).await;
    dump_lists_namespaces(backend.as_ref()).await;
    close_rejects_further_operations(backend.as_ref()).await;
}

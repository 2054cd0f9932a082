//! Conformance suite run against every engine.
//!
//! Each check gets its own test per engine for fine-grained failure
//! reporting. The `run_all` tests exercise the full suite as a one-liner to
//! verify no check is accidentally omitted.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use expedientes_storage::{MemoryBackend, conformance, testutil::temp_redb};

macro_rules! conformance_tests {
    ($engine:ident, $open:expr) => {
        mod $engine {
            use super::*;

            conformance_tests!(@checks $open;
                crud_get_missing_key_is_not_found,
                crud_put_then_get_returns_value,
                crud_put_overwrites_existing,
                crud_delete_nonexistent_is_noop,
                crud_delete_is_idempotent,
                crud_keys_are_byte_distinct,
                crud_namespaces_are_isolated,
                crud_large_value_roundtrip,
                cursor_lists_keys_in_order,
                cursor_prefix_is_bounded,
                cursor_empty_namespace_is_empty,
                cursor_is_restartable,
                cursor_scan_pages_after_bound,
                tx_read_your_writes,
                tx_reads_committed_data,
                tx_commit_applies_all,
                tx_drop_without_commit_is_noop,
                tx_writes_invisible_before_commit,
                tx_read_matches_committed_value,
                cas_insert_if_absent,
                cas_insert_if_absent_fails_when_key_exists,
                cas_update_with_matching_value,
                cas_conflict_rejects_whole_commit,
                cas_delete_requires_expected_value,
                health_check_succeeds,
                dump_lists_namespaces,
                close_rejects_further_operations,
            );

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_puts_to_different_keys() {
                let (_guard, backend) = $open;
                conformance::concurrent_puts_to_different_keys(Arc::new(backend)).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_cas_exactly_one_winner() {
                let (_guard, backend) = $open;
                conformance::concurrent_cas_exactly_one_winner(Arc::new(backend)).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn run_all() {
                let (_guard, backend) = $open;
                conformance::run_all(Arc::new(backend)).await;
            }
        }
    };
    (@checks $open:expr; $($check:ident),+ $(,)?) => {
        $(
            #[tokio::test]
            async fn $check() {
                let (_guard, backend) = $open;
                conformance::$check(&backend).await;
            }
        )+
    };
}

conformance_tests!(memory, ((), MemoryBackend::new()));
conformance_tests!(redb_engine, temp_redb());

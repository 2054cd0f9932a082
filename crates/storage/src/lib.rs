//! Namespace-partitioned key-value storage for the expedientes service.
//!
//! This crate provides the [`StorageBackend`] trait, its two engines, and the
//! [`registry`] that maps the service's entities onto namespaces. Everything
//! above it (sessions, records) talks to storage only through these types.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Record Service                          │
//! │        (authorization, validation, record index)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   Namespace Registry                        │
//! │   users │ sessions │ patients │ records │ record_index      │
//! │          (key encoding, JSON snapshots, Entity)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  StorageBackend trait                       │
//! │  (put, get, delete, list_keys, keys_by_prefix, transaction) │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│                RedbBackend                   │
//! │   (testing)  │                (durable)                     │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use expedientes_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.put("users", b"doctorA", b"{}".to_vec()).await?;
//!     let value = backend.get("users", b"doctorA").await?;
//!     assert_eq!(value.as_ref(), b"{}");
//!
//!     // Use transactions for atomic operations
//!     let mut txn = backend.transaction().await?;
//!     txn.put("records", b"r1".to_vec(), b"{}".to_vec());
//!     txn.compare_and_set("record_index", b"p/1".to_vec(), None, b"[1]".to_vec());
//!     txn.commit().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryBackend`] | Testing, development | No |
//! | [`RedbBackend`] | Single-node deployments | Yes |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (key generators, temporary
//!   redb engines, assertion macros) and the [`conformance`] suite. Enable
//!   this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod backend_enum;
pub mod config;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod cursor;
pub mod error;
pub mod memory;
pub mod redb_backend;
pub mod registry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod transaction;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::StorageBackend;
pub use backend_enum::Backend;
pub use config::{EngineKind, StorageConfig};
pub use cursor::KeyCursor;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;
pub use registry::{Entity, Namespace, Registry, RegistryTransaction};
pub use transaction::Transaction;
pub use types::{KeyValue, NamespaceDump};

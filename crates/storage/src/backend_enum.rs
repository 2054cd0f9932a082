//! Unified backend enum.
//!
//! [`Backend`] wraps every engine this crate ships so the engine can be chosen
//! at startup from a [`StorageConfig`] while calls stay statically dispatched.
//!
//! # Available Backends
//!
//! | Variant | Use Case |
//! |---------|----------|
//! | [`Backend::Memory`] | Testing, development |
//! | [`Backend::Redb`] | Durable single-node deployments |
//!
//! # Usage
//!
//! ```
//! use expedientes_storage::{Backend, StorageBackend, StorageConfig};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = Backend::open(&StorageConfig::memory()).unwrap();
//!
//! backend.put("users", b"doctorA", b"{}".to_vec()).await.unwrap();
//! assert!(backend.get("users", b"doctorA").await.is_ok());
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    MemoryBackend, RedbBackend, StorageBackend, StorageError, StorageResult, Transaction,
    config::{EngineKind, StorageConfig},
    types::NamespaceDump,
};

/// Storage engine selected at runtime.
#[derive(Clone)]
pub enum Backend {
    /// In-memory backend for testing and development.
    Memory(MemoryBackend),
    /// Durable file-backed backend.
    Redb(RedbBackend),
}

impl Backend {
    /// Opens the engine described by `config`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Internal`] if the configuration is inconsistent
    /// - [`StorageError::Io`] if a durable engine cannot open its file
    pub fn open(config: &StorageConfig) -> StorageResult<Self> {
        config
            .validate()
            .map_err(|e| StorageError::internal_with_source("invalid storage configuration", e))?;

        match (config.engine(), config.path()) {
            (EngineKind::Memory, _) => {
                tracing::warn!("using volatile in-memory storage; data is lost on exit");
                Ok(Self::memory())
            },
            (EngineKind::Redb, Some(path)) => RedbBackend::open(path).map(Self::Redb),
            (EngineKind::Redb, None) => Err(StorageError::internal("redb engine requires a path")),
        }
    }

    /// Creates a new memory backend.
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(MemoryBackend::new())
    }

    /// Returns true if this is a memory backend.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Returns the engine kind behind this handle.
    #[must_use]
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Memory(_) => EngineKind::Memory,
            Self::Redb(_) => EngineKind::Redb,
        }
    }
}

#[async_trait]
impl StorageBackend for Backend {
    async fn put(&self, namespace: &str, key: &[u8], value: Vec<u8>) -> StorageResult<()> {
        match self {
            Self::Memory(b) => b.put(namespace, key, value).await,
            Self::Redb(b) => b.put(namespace, key, value).await,
        }
    }

    async fn get(&self, namespace: &str, key: &[u8]) -> StorageResult<Bytes> {
        match self {
            Self::Memory(b) => b.get(namespace, key).await,
            Self::Redb(b) => b.get(namespace, key).await,
        }
    }

    async fn delete(&self, namespace: &str, key: &[u8]) -> StorageResult<()> {
        match self {
            Self::Memory(b) => b.delete(namespace, key).await,
            Self::Redb(b) => b.delete(namespace, key).await,
        }
    }

    async fn scan_keys(
        &self,
        namespace: &str,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> StorageResult<Vec<Bytes>> {
        match self {
            Self::Memory(b) => b.scan_keys(namespace, prefix, after, limit).await,
            Self::Redb(b) => b.scan_keys(namespace, prefix, after, limit).await,
        }
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        match self {
            Self::Memory(b) => b.transaction().await,
            Self::Redb(b) => b.transaction().await,
        }
    }

    async fn dump(&self) -> StorageResult<Vec<NamespaceDump>> {
        match self {
            Self::Memory(b) => b.dump().await,
            Self::Redb(b) => b.dump().await,
        }
    }

    async fn close(&self) -> StorageResult<()> {
        match self {
            Self::Memory(b) => b.close().await,
            Self::Redb(b) => b.close().await,
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        match self {
            Self::Memory(b) => b.health_check().await,
            Self::Redb(b) => b.health_check().await,
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(_) => write!(f, "Backend::Memory"),
            Self::Redb(b) => write!(f, "Backend::Redb({})", b.path().display()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_via_enum() {
        let backend = Backend::open(&StorageConfig::memory()).unwrap();
        assert!(backend.is_memory());

        backend.put("ns", b"test_key", b"test_value".to_vec()).await.expect("put failed");

        let value = backend.get("ns", b"test_key").await.expect("get failed");
        assert_eq!(value, Bytes::from("test_value"));
    }

    #[tokio::test]
    async fn test_redb_backend_via_enum() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::builder()
            .engine(EngineKind::Redb)
            .path(dir.path().join("enum.redb"))
            .build()
            .unwrap();
        let backend = Backend::open(&config).unwrap();
        assert_eq!(backend.kind(), EngineKind::Redb);
        backend.health_check().await.expect("health check failed");
        backend.close().await.unwrap();
    }

    #[test]
    fn test_open_rejects_redb_without_path() {
        let config: StorageConfig = serde_json::from_str(r#"{"engine":"redb"}"#).unwrap();
        assert!(Backend::open(&config).is_err());
    }

    #[test]
    fn test_debug_impl() {
        let backend = Backend::memory();
        assert_eq!(format!("{backend:?}"), "Backend::Memory");
    }
}

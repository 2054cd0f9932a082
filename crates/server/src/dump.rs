//! Offline inspection of a store.

use expedientes_storage::StorageBackend;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::ServerError;

/// Writes every namespace of `backend` to `out` in
/// [`NamespaceDump::render`](expedientes_storage::NamespaceDump::render) form
/// and returns the number of entries written.
///
/// # Errors
///
/// [`ServerError::Storage`] if the engine cannot be read, or
/// [`ServerError::Io`] if `out` rejects the write.
pub async fn write_dump<B, W>(backend: &B, out: &mut W) -> Result<usize, ServerError>
where
    B: StorageBackend,
    W: AsyncWrite + Unpin,
{
    let mut entries = 0;
    for namespace in backend.dump().await? {
        entries += namespace.entries.len();
        out.write_all(namespace.render().as_bytes()).await?;
    }
    out.flush().await?;
    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use expedientes_storage::MemoryBackend;

    use super::*;

    #[tokio::test]
    async fn renders_each_namespace() {
        let backend = MemoryBackend::new();
        backend.put("users", b"doctorA", br#"{"surname":"Lopez"}"#.to_vec()).await.unwrap();
        backend.put("record_index", &[0, 1], b"[7]".to_vec()).await.unwrap();

        let mut out = Vec::new();
        assert_eq!(write_dump(&backend, &mut out).await.unwrap(), 2);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[users] 1 entries\n  doctorA = {\"surname\":\"Lopez\"}\n"), "{text}");
        assert!(text.contains("[record_index] 1 entries\n  0001 = [7]\n"), "{text}");
    }

    #[tokio::test]
    async fn empty_store_writes_nothing() {
        let mut out = Vec::new();
        assert_eq!(write_dump(&MemoryBackend::new(), &mut out).await.unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn closed_store_is_a_storage_error() {
        let backend = MemoryBackend::new();
        backend.close().await.unwrap();
        let err = write_dump(&backend, &mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, ServerError::Storage(_)), "{err:?}");
    }
}

//! Lazy, restartable key enumeration.
//!
//! A [`KeyCursor`] pulls keys from its engine one page at a time through
//! [`StorageBackend::scan_keys`], remembering the last key it handed out. No
//! engine snapshot is held between pages, so a long scan never blocks
//! writers; keys written behind the cursor's position are simply not
//! revisited.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{backend::StorageBackend, error::StorageResult};

/// Number of keys fetched per engine round trip.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Cursor over the keys of one namespace, optionally restricted to a prefix.
///
/// Obtain one from [`StorageBackend::list_keys`] or
/// [`StorageBackend::keys_by_prefix`].
///
/// # Example
///
/// ```
/// use expedientes_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
/// backend.put("patients", b"a", b"1".to_vec()).await.unwrap();
/// backend.put("patients", b"b", b"2".to_vec()).await.unwrap();
///
/// let mut cursor = backend.list_keys("patients");
/// while let Some(key) = cursor.next_key().await.unwrap() {
///     println!("{key:?}");
/// }
/// # });
/// ```
pub struct KeyCursor<'a, B> {
    backend: &'a B,
    namespace: String,
    prefix: Vec<u8>,
    last: Option<Bytes>,
    page: VecDeque<Bytes>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, B: StorageBackend> KeyCursor<'a, B> {
    pub(crate) fn new(backend: &'a B, namespace: &str, prefix: Vec<u8>) -> Self {
        Self {
            backend,
            namespace: namespace.to_owned(),
            prefix,
            last: None,
            page: VecDeque::new(),
            page_size: DEFAULT_PAGE_SIZE,
            exhausted: false,
        }
    }

    /// Overrides the page size. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Returns the next key, or `None` once the namespace is exhausted.
    pub async fn next_key(&mut self) -> StorageResult<Option<Bytes>> {
        if self.page.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.page.pop_front())
    }

    /// Drains the cursor into a vector.
    pub async fn collect_all(mut self) -> StorageResult<Vec<Bytes>> {
        let mut keys = Vec::new();
        while let Some(key) = self.next_key().await? {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn fill(&mut self) -> StorageResult<()> {
        let keys = self
            .backend
            .scan_keys(&self.namespace, &self.prefix, self.last.as_deref(), self.page_size)
            .await?;

        if keys.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = keys.last() {
            self.last = Some(last.clone());
        }
        self.page.extend(keys);
        Ok(())
    }
}

//! Common types shared by storage engines and their consumers.

use bytes::Bytes;

/// Key-value pair returned from scans and dumps.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use expedientes_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("doctorA"), Bytes::from(r#"{"surname":"Lopez"}"#));
/// assert_eq!(kv.key, Bytes::from("doctorA"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Full contents of one namespace, as produced by
/// [`StorageBackend::dump`](crate::StorageBackend::dump).
///
/// Entries are in byte-lexicographic key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDump {
    /// Namespace name.
    pub namespace: String,

    /// Every entry in the namespace.
    pub entries: Vec<KeyValue>,
}

impl NamespaceDump {
    /// Renders the dump as human-readable lines, one per entry.
    ///
    /// Keys and values that are not valid UTF-8 are shown as lowercase hex.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("[{}] {} entries\n", self.namespace, self.entries.len());
        for kv in &self.entries {
            out.push_str("  ");
            out.push_str(&printable(&kv.key));
            out.push_str(" = ");
            out.push_str(&printable(&kv.value));
            out.push('\n');
        }
        out
    }
}

fn printable(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_owned(),
        _ => bytes.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

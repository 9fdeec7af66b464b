//! Key-value store trait backing each search index.
//!
//! Every index owns one [`IndexStore`]: the lexical index keeps serialized
//! document records in it, the semantic index keeps raw embeddings plus its
//! manifest. Stores are byte-oriented so the same backend serves both.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error (filesystem)
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Database error (redb, poisoned lock)
    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Durable key-value storage for one index.
///
/// Entries are keyed by document id. A separate metadata namespace holds
/// index-level records such as the embedding manifest.
///
/// # Design Notes
///
/// - Each call is self-contained and atomic; there are no exposed transactions.
///   Cross-index atomicity is handled by the document store's write protocol.
/// - `scan` loads all entries and is only used to rebuild in-memory indexes on
///   open and for consistency checks.
pub trait IndexStore: Send + Sync {
    /// Retrieves an entry. Returns `Ok(None)` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores an entry, overwriting any existing value.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deletes an entry. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns all entries ordered by key.
    fn scan(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Number of entries (metadata excluded).
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Reads an index-level metadata record.
    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes an index-level metadata record.
    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Removes all entries and metadata.
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct InMemoryInner {
    entries: BTreeMap<String, Vec<u8>>,
    meta: BTreeMap<String, Vec<u8>>,
}

/// In-memory store for testing and ephemeral indexes.
///
/// Clones share the same underlying data, so a test can keep a handle to a
/// store after moving it into an index and reopen a fresh index from it.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<InMemoryInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, InMemoryInner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::DatabaseError(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, InMemoryInner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::DatabaseError(format!("Lock poisoned: {}", e)))
    }
}

impl IndexStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.write()?
            .entries
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.write()?.entries.remove(key).is_some())
    }

    fn scan(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .read()?
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.entries.len())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.meta.get(key).cloned())
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.write()?.meta.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.entries.clear();
        inner.meta.clear();
        Ok(())
    }
}

// Blanket implementations so indexes can hold shared or boxed stores.

impl<T: IndexStore + ?Sized> IndexStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }

    fn scan(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        (**self).scan()
    }

    fn len(&self) -> Result<usize, StoreError> {
        (**self).len()
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get_meta(key)
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put_meta(key, value)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

impl<T: IndexStore + ?Sized> IndexStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }

    fn scan(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        (**self).scan()
    }

    fn len(&self) -> Result<usize, StoreError> {
        (**self).len()
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get_meta(key)
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).put_meta(key, value)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_crud() {
        let store = InMemoryStore::new();

        assert!(store.get("doc-1").unwrap().is_none());

        store.put("doc-1", b"hello").unwrap();
        assert_eq!(store.get("doc-1").unwrap().unwrap(), b"hello");

        store.put("doc-1", b"replaced").unwrap();
        assert_eq!(store.get("doc-1").unwrap().unwrap(), b"replaced");
        assert_eq!(store.len().unwrap(), 1);

        assert!(store.delete("doc-1").unwrap());
        assert!(!store.delete("doc-1").unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_scan_is_ordered() {
        let store = InMemoryStore::new();
        store.put("b", b"2").unwrap();
        store.put("a", b"1").unwrap();
        store.put("c", b"3").unwrap();

        let keys: Vec<String> = store.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_meta_is_separate_from_entries() {
        let store = InMemoryStore::new();
        store.put_meta("manifest", b"{}").unwrap();
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.get_meta("manifest").unwrap().unwrap(), b"{}");
        assert!(store.get("manifest").unwrap().is_none());
    }

    #[test]
    fn test_clones_share_data() {
        let store = InMemoryStore::new();
        let handle = store.clone();
        store.put("k", b"v").unwrap();
        assert_eq!(handle.get("k").unwrap().unwrap(), b"v");

        handle.clear().unwrap();
        assert!(store.is_empty().unwrap());
    }
}

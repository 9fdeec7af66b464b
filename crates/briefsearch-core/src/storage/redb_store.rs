//! Redb-backed index store.
//!
//! Uses [redb](https://github.com/cberner/redb) - a pure Rust, ACID-compliant,
//! embedded B-tree database. Each index gets its own database file so the two
//! channels fail and recover independently.
//!
//! # Tables
//!
//! - `entries`: document id (string) -> value bytes
//! - `metadata`: key (string) -> value bytes (manifest)

use super::{IndexStore, StoreError};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::sync::Arc;

type BytesTable = TableDefinition<'static, &'static str, &'static [u8]>;

const ENTRIES_TABLE: BytesTable = TableDefinition::new("entries");
const METADATA_TABLE: BytesTable = TableDefinition::new("metadata");

/// Redb-backed store for native platforms.
///
/// # Example
///
/// ```no_run
/// use briefsearch_core::storage::{IndexStore, RedbStore};
///
/// let store = RedbStore::open("./data/lexical.redb")?;
/// store.put("pmid-1", b"{}")?;
/// # Ok::<(), briefsearch_core::storage::StoreError>(())
/// ```
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Opens or creates a redb database at the given path.
    ///
    /// Creates the database file and both tables if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::IoError(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Database::create(path.as_ref())
            .map_err(|e| StoreError::DatabaseError(format!("Failed to open database: {}", e)))?;

        {
            let write_txn = db.begin_write().map_err(|e| {
                StoreError::DatabaseError(format!("Failed to begin write transaction: {}", e))
            })?;

            write_txn.open_table(ENTRIES_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to create entries table: {}", e))
            })?;
            write_txn.open_table(METADATA_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to create metadata table: {}", e))
            })?;

            write_txn.commit().map_err(|e| {
                StoreError::DatabaseError(format!("Failed to commit table creation: {}", e))
            })?;
        }

        Ok(Self { db: Arc::new(db) })
    }

    fn read_value(
        &self,
        table_def: BytesTable,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin read transaction: {}", e))
        })?;

        let table = read_txn
            .open_table(table_def)
            .map_err(|e| StoreError::DatabaseError(format!("Failed to open table: {}", e)))?;

        match table.get(key) {
            Ok(Some(guard)) => Ok(Some(guard.value().to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::DatabaseError(format!(
                "Failed to get {}: {}",
                key, e
            ))),
        }
    }

    fn write_values(
        &self,
        table_def: BytesTable,
        entries: &[(&str, &[u8])],
    ) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin write transaction: {}", e))
        })?;

        {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(|e| StoreError::DatabaseError(format!("Failed to open table: {}", e)))?;

            for (key, value) in entries {
                table.insert(*key, *value).map_err(|e| {
                    StoreError::DatabaseError(format!("Failed to insert {}: {}", key, e))
                })?;
            }
        }

        write_txn
            .commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit write: {}", e)))?;

        Ok(())
    }
}

impl IndexStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_value(ENTRIES_TABLE, key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.write_values(ENTRIES_TABLE, &[(key, value)])
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin write transaction: {}", e))
        })?;

        let existed = {
            let mut table = write_txn.open_table(ENTRIES_TABLE).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to open entries table: {}", e))
            })?;

            let removed = table.remove(key).map_err(|e| {
                StoreError::DatabaseError(format!("Failed to delete {}: {}", key, e))
            })?;
            removed.is_some()
        };

        write_txn
            .commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit delete: {}", e)))?;

        Ok(existed)
    }

    fn scan(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let read_txn = self.db.begin_read().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin read transaction: {}", e))
        })?;

        let table = read_txn.open_table(ENTRIES_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to open entries table: {}", e))
        })?;

        let iter = table
            .iter()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to iterate entries: {}", e)))?;

        let mut entries = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(|e| {
                StoreError::DatabaseError(format!("Failed to read entry: {}", e))
            })?;
            entries.push((key.value().to_string(), value.value().to_vec()));
        }

        Ok(entries)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin read transaction: {}", e))
        })?;

        let table = read_txn.open_table(ENTRIES_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to open entries table: {}", e))
        })?;

        let count = table
            .len()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to count entries: {}", e)))?;

        Ok(count as usize)
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read_value(METADATA_TABLE, key)
    }

    fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.write_values(METADATA_TABLE, &[(key, value)])
    }

    fn clear(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(|e| {
            StoreError::DatabaseError(format!("Failed to begin write transaction: {}", e))
        })?;

        write_txn.delete_table(ENTRIES_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to delete entries table: {}", e))
        })?;
        write_txn.delete_table(METADATA_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to delete metadata table: {}", e))
        })?;

        // Recreate empty tables so later reads don't fail
        write_txn.open_table(ENTRIES_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to create entries table: {}", e))
        })?;
        write_txn.open_table(METADATA_TABLE).map_err(|e| {
            StoreError::DatabaseError(format!("Failed to create metadata table: {}", e))
        })?;

        write_txn
            .commit()
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit clear: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RedbStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let store = RedbStore::open(&db_path).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_entry_crud() {
        let (store, _temp) = create_test_store();

        assert!(store.get("pmid-1").unwrap().is_none());

        store.put("pmid-1", b"first").unwrap();
        assert_eq!(store.get("pmid-1").unwrap().unwrap(), b"first");

        store.put("pmid-1", b"second").unwrap();
        assert_eq!(store.get("pmid-1").unwrap().unwrap(), b"second");
        assert_eq!(store.len().unwrap(), 1);

        assert!(store.delete("pmid-1").unwrap());
        assert!(!store.delete("pmid-1").unwrap());
        assert!(store.get("pmid-1").unwrap().is_none());
    }

    #[test]
    fn test_scan_is_ordered_by_key() {
        let (store, _temp) = create_test_store();
        store.put("b", &[2]).unwrap();
        store.put("a", &[1]).unwrap();

        let all = store.scan().unwrap();
        assert_eq!(all, vec![("a".to_string(), vec![1]), ("b".to_string(), vec![2])]);
    }

    #[test]
    fn test_metadata() {
        let (store, _temp) = create_test_store();
        store.put_meta("manifest", b"{\"v\":1}").unwrap();
        assert_eq!(store.get_meta("manifest").unwrap().unwrap(), b"{\"v\":1}");
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let (store, _temp) = create_test_store();
        store.put("a", b"1").unwrap();
        store.put_meta("m", b"x").unwrap();

        store.clear().unwrap();

        assert!(store.is_empty().unwrap());
        assert!(store.get_meta("m").unwrap().is_none());
        store.put("b", b"2").unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("persist.redb");

        {
            let store = RedbStore::open(&db_path).unwrap();
            store.put("pmid-9", b"durable").unwrap();
            store.put_meta("manifest", b"m").unwrap();
        }

        let store = RedbStore::open(&db_path).unwrap();
        assert_eq!(store.get("pmid-9").unwrap().unwrap(), b"durable");
        assert_eq!(store.get_meta("manifest").unwrap().unwrap(), b"m");
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/dir/index.redb");
        let store = RedbStore::open(&db_path).unwrap();
        store.put("k", b"v").unwrap();
        assert!(db_path.exists());
    }
}

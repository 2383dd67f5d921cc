//! redb table definitions and the low-level storage manager.
//!
//! Each structured store (`peers`, `federated_entities`, `sync_states`,
//! `sessions`) is a thin typed layer over `RedbStorage::{put,get,delete,
//! scan_prefix}`, the way the reference workspace's storage crate layers
//! typed record stores over a single generic table manager.

use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, TableDefinition};
use tracing::{debug, info, instrument};

use crate::error::StorageError;

pub type ScanResults = Vec<(Vec<u8>, Vec<u8>)>;

pub const PEERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("peers");
pub const FEDERATED_ENTITIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("federated_entities");
pub const FEDERATED_EDGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("federated_edges");
pub const SYNC_STATES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sync_states");
pub const SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sessions");

#[derive(Debug, Clone)]
pub struct RedbStorageConfig {
    pub db_path: PathBuf,
    pub cache_size: usize,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/forge.redb"),
            cache_size: 64 * 1024 * 1024,
        }
    }
}

pub struct RedbStorage {
    db: Arc<Database>,
    config: RedbStorageConfig,
}

impl RedbStorage {
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path).map_err(|e| StorageError::Database(e.to_string()))?;
        info!("opened redb database");

        let storage = Self { db: Arc::new(db), config };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn.open_table(PEERS).map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn
            .open_table(FEDERATED_ENTITIES)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn
            .open_table(FEDERATED_EDGES)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn
            .open_table(SYNC_STATES)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn.open_table(SESSIONS).map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        debug!("initialized redb tables");
        Ok(())
    }

    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }

    pub fn put(&self, table: TableDefinition<&[u8], &[u8]>, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        {
            let mut table = write_txn.open_table(table).map_err(|e| StorageError::Database(e.to_string()))?;
            table.insert(key, value).map_err(|e| StorageError::Database(e.to_string()))?;
        }
        write_txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn get(&self, table: TableDefinition<&[u8], &[u8]>, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let read_txn = self.db.begin_read().map_err(|e| StorageError::Database(e.to_string()))?;
        let table = read_txn.open_table(table).map_err(|e| StorageError::Database(e.to_string()))?;
        let value = table
            .get(key)
            .map_err(|e| StorageError::Database(e.to_string()))?
            .map(|v| v.value().to_vec());
        Ok(value)
    }

    pub fn delete(&self, table: TableDefinition<&[u8], &[u8]>, key: &[u8]) -> Result<bool, StorageError> {
        let write_txn = self.db.begin_write().map_err(|e| StorageError::Database(e.to_string()))?;
        let removed = {
            let mut table = write_txn.open_table(table).map_err(|e| StorageError::Database(e.to_string()))?;
            table.remove(key).map_err(|e| StorageError::Database(e.to_string()))?.is_some()
        };
        write_txn.commit().map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(removed)
    }

    pub fn scan_prefix(&self, table: TableDefinition<&[u8], &[u8]>, prefix: &[u8]) -> Result<ScanResults, StorageError> {
        let read_txn = self.db.begin_read().map_err(|e| StorageError::Database(e.to_string()))?;
        let table = read_txn.open_table(table).map_err(|e| StorageError::Database(e.to_string()))?;

        let mut results = Vec::new();
        let range = table.range(prefix..).map_err(|e| StorageError::Database(e.to_string()))?;
        for entry in range {
            let (key, value) = entry.map_err(|e| StorageError::Database(e.to_string()))?;
            let key_bytes = key.value();
            if !key_bytes.starts_with(prefix) {
                break;
            }
            results.push((key_bytes.to_vec(), value.value().to_vec()));
        }
        Ok(results)
    }

    pub fn count_prefix(&self, table: TableDefinition<&[u8], &[u8]>, prefix: &[u8]) -> Result<usize, StorageError> {
        self.scan_prefix(table, prefix).map(|v| v.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_storage() -> (RedbStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: dir.path().join("test.redb"),
            ..Default::default()
        };
        (RedbStorage::open(config).unwrap(), dir)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (storage, _dir) = test_storage();
        storage.put(PEERS, b"peer-1", b"payload").unwrap();
        assert_eq!(storage.get(PEERS, b"peer-1").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn delete_removes_the_key() {
        let (storage, _dir) = test_storage();
        storage.put(SESSIONS, b"sess-1", b"v").unwrap();
        assert!(storage.delete(SESSIONS, b"sess-1").unwrap());
        assert!(storage.get(SESSIONS, b"sess-1").unwrap().is_none());
    }

    #[test]
    fn scan_prefix_only_returns_matching_keys() {
        let (storage, _dir) = test_storage();
        storage.put(SYNC_STATES, b"peer-a:1", b"x").unwrap();
        storage.put(SYNC_STATES, b"peer-a:2", b"y").unwrap();
        storage.put(SYNC_STATES, b"peer-b:1", b"z").unwrap();

        let matches = storage.scan_prefix(SYNC_STATES, b"peer-a:").unwrap();
        assert_eq!(matches.len(), 2);
    }
}

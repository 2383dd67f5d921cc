//! Federated entity record persistence (§3.2), keyed by `(peer_id, remote_entity_id)`.

use std::sync::Arc;

use forge_core::PeerId;
use tracing::debug;

use crate::error::StorageError;
use crate::model::FederatedEntityRecord;
use crate::tables::{RedbStorage, FEDERATED_ENTITIES};

fn key(peer_id: &PeerId, remote_entity_id: &str) -> Vec<u8> {
    let mut k = peer_id.as_str().as_bytes().to_vec();
    k.push(0);
    k.extend_from_slice(remote_entity_id.as_bytes());
    k
}

pub struct FederatedEntityStore {
    storage: Arc<RedbStorage>,
}

impl FederatedEntityStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    pub fn upsert(&self, record: &FederatedEntityRecord) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(record)?;
        self.storage.put(FEDERATED_ENTITIES, &key(&record.peer_id, &record.remote_entity_id), &value)?;
        debug!(peer_id = %record.peer_id, remote_entity_id = %record.remote_entity_id, "upserted federated entity record");
        Ok(())
    }

    pub fn get(&self, peer_id: &PeerId, remote_entity_id: &str) -> Result<Option<FederatedEntityRecord>, StorageError> {
        match self.storage.get(FEDERATED_ENTITIES, &key(peer_id, remote_entity_id))? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn for_peer(&self, peer_id: &PeerId) -> Result<Vec<FederatedEntityRecord>, StorageError> {
        let mut prefix = peer_id.as_str().as_bytes().to_vec();
        prefix.push(0);
        let entries = self.storage.scan_prefix(FEDERATED_ENTITIES, &prefix)?;
        entries
            .into_iter()
            .map(|(_, value)| postcard::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::RedbStorageConfig;
    use tempfile::TempDir;

    fn store() -> (FederatedEntityStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            RedbStorage::open(RedbStorageConfig {
                db_path: dir.path().join("entities.redb"),
                ..Default::default()
            })
            .unwrap(),
        );
        (FederatedEntityStore::new(storage), dir)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (store, _dir) = store();
        let peer_id = PeerId::from("p1");
        let record = FederatedEntityRecord::new(peer_id.clone(), "r1");
        store.upsert(&record).unwrap();

        let loaded = store.get(&peer_id, "r1").unwrap().unwrap();
        assert_eq!(loaded.remote_entity_id, "r1");
    }

    #[test]
    fn for_peer_only_returns_that_peers_records() {
        let (store, _dir) = store();
        let peer_a = PeerId::from("peer-a");
        let peer_b = PeerId::from("peer-b");
        store.upsert(&FederatedEntityRecord::new(peer_a.clone(), "r1")).unwrap();
        store.upsert(&FederatedEntityRecord::new(peer_a.clone(), "r2")).unwrap();
        store.upsert(&FederatedEntityRecord::new(peer_b.clone(), "r1")).unwrap();

        assert_eq!(store.for_peer(&peer_a).unwrap().len(), 2);
        assert_eq!(store.for_peer(&peer_b).unwrap().len(), 1);
    }
}

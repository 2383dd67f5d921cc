//! Federated edge record persistence, keyed by `(peer_id, remote_edge_id)`.

use std::sync::Arc;

use forge_core::PeerId;
use tracing::debug;

use crate::error::StorageError;
use crate::model::FederatedEdgeRecord;
use crate::tables::{RedbStorage, FEDERATED_EDGES};

fn key(peer_id: &PeerId, remote_edge_id: &str) -> Vec<u8> {
    let mut k = peer_id.as_str().as_bytes().to_vec();
    k.push(0);
    k.extend_from_slice(remote_edge_id.as_bytes());
    k
}

pub struct FederatedEdgeStore {
    storage: Arc<RedbStorage>,
}

impl FederatedEdgeStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    pub fn upsert(&self, record: &FederatedEdgeRecord) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(record)?;
        self.storage.put(FEDERATED_EDGES, &key(&record.peer_id, &record.remote_edge_id), &value)?;
        debug!(peer_id = %record.peer_id, remote_edge_id = %record.remote_edge_id, "upserted federated edge record");
        Ok(())
    }

    pub fn get(&self, peer_id: &PeerId, remote_edge_id: &str) -> Result<Option<FederatedEdgeRecord>, StorageError> {
        match self.storage.get(FEDERATED_EDGES, &key(peer_id, remote_edge_id))? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn for_peer(&self, peer_id: &PeerId) -> Result<Vec<FederatedEdgeRecord>, StorageError> {
        let mut prefix = peer_id.as_str().as_bytes().to_vec();
        prefix.push(0);
        let entries = self.storage.scan_prefix(FEDERATED_EDGES, &prefix)?;
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
    use chrono::Utc;
    use forge_core::CapsuleId;
    use tempfile::TempDir;

    fn store() -> (FederatedEdgeStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            RedbStorage::open(RedbStorageConfig {
                db_path: dir.path().join("edges.redb"),
                ..Default::default()
            })
            .unwrap(),
        );
        (FederatedEdgeStore::new(storage), dir)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (store, _dir) = store();
        let peer_id = PeerId::from("p1");
        let record = FederatedEdgeRecord::new(peer_id.clone(), "e1", CapsuleId::from("c1"), CapsuleId::from("c2"), "derived_from", Utc::now());
        store.upsert(&record).unwrap();

        let loaded = store.get(&peer_id, "e1").unwrap().unwrap();
        assert_eq!(loaded.remote_edge_id, "e1");
        assert_eq!(loaded.kind, "derived_from");
    }

    #[test]
    fn for_peer_only_returns_that_peers_records() {
        let (store, _dir) = store();
        let peer_a = PeerId::from("peer-a");
        let peer_b = PeerId::from("peer-b");
        store
            .upsert(&FederatedEdgeRecord::new(peer_a.clone(), "e1", CapsuleId::from("c1"), CapsuleId::from("c2"), "k", Utc::now()))
            .unwrap();
        store
            .upsert(&FederatedEdgeRecord::new(peer_b.clone(), "e1", CapsuleId::from("c3"), CapsuleId::from("c4"), "k", Utc::now()))
            .unwrap();

        assert_eq!(store.for_peer(&peer_a).unwrap().len(), 1);
        assert_eq!(store.for_peer(&peer_b).unwrap().len(), 1);
    }
}

//! Peer persistence (§3.1).

use std::sync::Arc;

use forge_core::PeerId;
use tracing::debug;

use crate::error::StorageError;
use crate::model::Peer;
use crate::tables::{RedbStorage, PEERS};

pub struct PeerStore {
    storage: Arc<RedbStorage>,
}

impl PeerStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    pub fn upsert(&self, peer: &Peer) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(peer)?;
        self.storage.put(PEERS, peer.id.as_str().as_bytes(), &value)?;
        debug!(peer_id = %peer.id, "upserted peer record");
        Ok(())
    }

    pub fn get(&self, id: &PeerId) -> Result<Option<Peer>, StorageError> {
        match self.storage.get(PEERS, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: &PeerId) -> Result<bool, StorageError> {
        self.storage.delete(PEERS, id.as_str().as_bytes())
    }

    pub fn all(&self) -> Result<Vec<Peer>, StorageError> {
        let entries = self.storage.scan_prefix(PEERS, &[])?;
        entries
            .into_iter()
            .map(|(_, value)| postcard::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{RedbStorageConfig};
    use chrono::Utc;
    use tempfile::TempDir;

    fn store() -> (PeerStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            RedbStorage::open(RedbStorageConfig {
                db_path: dir.path().join("peers.redb"),
                ..Default::default()
            })
            .unwrap(),
        );
        (PeerStore::new(storage), dir)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (store, _dir) = store();
        let peer = Peer::new(PeerId::from("p1"), "Peer One", "https://peer.example", "pub", Utc::now());
        store.upsert(&peer).unwrap();

        let loaded = store.get(&PeerId::from("p1")).unwrap().unwrap();
        assert_eq!(loaded.display_name, "Peer One");
    }

    #[test]
    fn missing_peer_returns_none() {
        let (store, _dir) = store();
        assert!(store.get(&PeerId::from("nope")).unwrap().is_none());
    }

    #[test]
    fn all_lists_every_registered_peer() {
        let (store, _dir) = store();
        store.upsert(&Peer::new(PeerId::from("p1"), "A", "u1", "k1", Utc::now())).unwrap();
        store.upsert(&Peer::new(PeerId::from("p2"), "B", "u2", "k2", Utc::now())).unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
    }
}

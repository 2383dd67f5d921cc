//! Sync attempt persistence (§3.3), keyed by `(peer_id, sync_id)`.

use std::sync::Arc;

use forge_core::{PeerId, SyncId};
use tracing::debug;

use crate::error::StorageError;
use crate::model::SyncState;
use crate::tables::{RedbStorage, SYNC_STATES};

fn key(peer_id: &PeerId, sync_id: &SyncId) -> Vec<u8> {
    let mut k = peer_id.as_str().as_bytes().to_vec();
    k.push(0);
    k.extend_from_slice(sync_id.as_str().as_bytes());
    k
}

pub struct SyncStateStore {
    storage: Arc<RedbStorage>,
}

impl SyncStateStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    pub fn upsert(&self, state: &SyncState) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(state)?;
        self.storage.put(SYNC_STATES, &key(&state.peer_id, &state.sync_id), &value)?;
        debug!(peer_id = %state.peer_id, sync_id = %state.sync_id, status = ?state.status, "upserted sync state");
        Ok(())
    }

    pub fn get(&self, peer_id: &PeerId, sync_id: &SyncId) -> Result<Option<SyncState>, StorageError> {
        match self.storage.get(SYNC_STATES, &key(peer_id, sync_id))? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn for_peer(&self, peer_id: &PeerId) -> Result<Vec<SyncState>, StorageError> {
        let mut prefix = peer_id.as_str().as_bytes().to_vec();
        prefix.push(0);
        let entries = self.storage.scan_prefix(SYNC_STATES, &prefix)?;
        entries
            .into_iter()
            .map(|(_, value)| postcard::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }

    /// Most recently started sync attempt for a peer, if any, used by the
    /// sync engine to report progress without the caller having to track
    /// `sync_id`s itself.
    pub fn latest_for_peer(&self, peer_id: &PeerId) -> Result<Option<SyncState>, StorageError> {
        let mut states = self.for_peer(peer_id)?;
        states.sort_by_key(|s| s.started_at);
        Ok(states.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncDirection;
    use crate::tables::RedbStorageConfig;
    use chrono::Utc;
    use tempfile::TempDir;

    fn store() -> (SyncStateStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            RedbStorage::open(RedbStorageConfig {
                db_path: dir.path().join("sync_states.redb"),
                ..Default::default()
            })
            .unwrap(),
        );
        (SyncStateStore::new(storage), dir)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (store, _dir) = store();
        let peer_id = PeerId::from("p1");
        let state = SyncState::new(SyncId::from("sync-1"), peer_id.clone(), SyncDirection::Pull, Utc::now());
        store.upsert(&state).unwrap();

        let loaded = store.get(&peer_id, &SyncId::from("sync-1")).unwrap().unwrap();
        assert_eq!(loaded.sync_id, SyncId::from("sync-1"));
    }

    #[test]
    fn latest_for_peer_picks_the_most_recently_started() {
        let (store, _dir) = store();
        let peer_id = PeerId::from("p1");
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        let later = Utc::now();
        store
            .upsert(&SyncState::new(SyncId::from("sync-1"), peer_id.clone(), SyncDirection::Pull, earlier))
            .unwrap();
        store
            .upsert(&SyncState::new(SyncId::from("sync-2"), peer_id.clone(), SyncDirection::Pull, later))
            .unwrap();

        let latest = store.latest_for_peer(&peer_id).unwrap().unwrap();
        assert_eq!(latest.sync_id, SyncId::from("sync-2"));
    }
}

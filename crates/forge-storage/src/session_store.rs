//! Session persistence (§3.9), keyed by JTI.
//!
//! `for_user` is a full-table scan rather than a secondary index: the
//! session table is bounded by active-session volume (expired rows are
//! reaped by `forge-session`'s `cleanup_expired`), so a scan stays cheap
//! without the added bookkeeping a user_id -> jti index would need to stay
//! consistent across revokes and expiries.

use std::sync::Arc;

use forge_core::{SessionId, UserId};
use tracing::debug;

use crate::error::StorageError;
use crate::model::Session;
use crate::tables::{RedbStorage, SESSIONS};

pub struct SessionStore {
    storage: Arc<RedbStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    pub fn upsert(&self, session: &Session) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(session)?;
        self.storage.put(SESSIONS, session.id.as_str().as_bytes(), &value)?;
        debug!(session_id = %session.id, "upserted session record");
        Ok(())
    }

    pub fn get(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
        match self.storage.get(SESSIONS, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: &SessionId) -> Result<bool, StorageError> {
        self.storage.delete(SESSIONS, id.as_str().as_bytes())
    }

    pub fn all(&self) -> Result<Vec<Session>, StorageError> {
        let entries = self.storage.scan_prefix(SESSIONS, &[])?;
        entries
            .into_iter()
            .map(|(_, value)| postcard::from_bytes(&value).map_err(StorageError::from))
            .collect()
    }

    pub fn for_user(&self, user_id: &UserId) -> Result<Vec<Session>, StorageError> {
        Ok(self.all()?.into_iter().filter(|s| &s.user_id == user_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;
    use crate::tables::RedbStorageConfig;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample(id: &str, user: &str) -> Session {
        Session {
            id: SessionId::from(id),
            user_id: UserId::from(user),
            token_jti: id.to_string(),
            token_type: "access".into(),
            initial_ip: "10.0.0.1".into(),
            initial_user_agent: "ua".into(),
            initial_user_agent_hash: "hash".into(),
            last_ip: "10.0.0.1".into(),
            last_user_agent: "ua".into(),
            last_user_agent_hash: "hash".into(),
            last_activity_at: Utc::now(),
            request_count: 0,
            ip_change_count: 0,
            user_agent_change_count: 0,
            ip_history: Vec::new(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            status: SessionStatus::Active,
            revoked_at: None,
            revoked_reason: None,
        }
    }

    fn store() -> (SessionStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(
            RedbStorage::open(RedbStorageConfig {
                db_path: dir.path().join("sessions.redb"),
                ..Default::default()
            })
            .unwrap(),
        );
        (SessionStore::new(storage), dir)
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let (store, _dir) = store();
        store.upsert(&sample("jti-1", "u1")).unwrap();
        let loaded = store.get(&SessionId::from("jti-1")).unwrap().unwrap();
        assert_eq!(loaded.user_id, UserId::from("u1"));
    }

    #[test]
    fn for_user_filters_by_owner() {
        let (store, _dir) = store();
        store.upsert(&sample("jti-1", "u1")).unwrap();
        store.upsert(&sample("jti-2", "u1")).unwrap();
        store.upsert(&sample("jti-3", "u2")).unwrap();

        assert_eq!(store.for_user(&UserId::from("u1")).unwrap().len(), 2);
        assert_eq!(store.for_user(&UserId::from("u2")).unwrap().len(), 1);
    }

    #[test]
    fn delete_removes_the_session() {
        let (store, _dir) = store();
        store.upsert(&sample("jti-1", "u1")).unwrap();
        assert!(store.delete(&SessionId::from("jti-1")).unwrap());
        assert!(store.get(&SessionId::from("jti-1")).unwrap().is_none());
    }
}

//! Session lifecycle and activity tracking (§4.9).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use forge_core::{KvBackend, SessionId, TieredKv, UserId};
use forge_storage::{IpHistoryEntry, Session, SessionStatus, SessionStore};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::error::SessionError;

const CACHE_KEY_PREFIX: &str = "forge:session:";
pub const DEFAULT_CACHE_CAPACITY: usize = 50_000;
pub const DEFAULT_MAX_IP_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityChange {
    pub ip_changed: bool,
    pub user_agent_changed: bool,
}

pub struct SessionManager {
    store: SessionStore,
    cache: TieredKv,
    cache_ttl: StdDuration,
    max_ip_history: usize,
}

fn hash_user_agent(ua: &str) -> String {
    hex::encode(Sha256::digest(ua.as_bytes()))
}

fn cache_key(jti: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{jti}")
}

impl SessionManager {
    pub fn new(store: SessionStore, cache: TieredKv, cache_ttl_seconds: u64, max_ip_history: usize) -> Self {
        Self {
            store,
            cache,
            cache_ttl: StdDuration::from_secs(cache_ttl_seconds),
            max_ip_history,
        }
    }

    pub fn with_memory_cache(store: SessionStore, cache_ttl_seconds: u64, max_ip_history: usize) -> Self {
        Self::new(store, TieredKv::memory_only(DEFAULT_CACHE_CAPACITY), cache_ttl_seconds, max_ip_history)
    }

    async fn cache_put(&self, session: &Session) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec(session).expect("Session always serializes");
        self.cache.set(&cache_key(&session.token_jti), bytes, Some(self.cache_ttl)).await?;
        Ok(())
    }

    async fn cache_get(&self, jti: &str) -> Result<Option<Session>, SessionError> {
        match self.cache.get(&cache_key(jti)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }

    async fn cache_invalidate(&self, jti: &str) -> Result<(), SessionError> {
        self.cache.delete(&cache_key(jti)).await?;
        Ok(())
    }

    #[instrument(skip(self, user_agent))]
    pub async fn create(&self, user_id: UserId, token_jti: impl Into<String>, token_type: impl Into<String>, ip: impl Into<String>, user_agent: impl Into<String>, ttl: ChronoDuration, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let token_jti = token_jti.into();
        let ip = ip.into();
        let user_agent = user_agent.into();
        let ua_hash = hash_user_agent(&user_agent);

        let session = Session {
            id: SessionId::from(token_jti.clone()),
            user_id,
            token_jti: token_jti.clone(),
            token_type: token_type.into(),
            initial_ip: ip.clone(),
            initial_user_agent: user_agent.clone(),
            initial_user_agent_hash: ua_hash.clone(),
            last_ip: ip.clone(),
            last_user_agent: user_agent,
            last_user_agent_hash: ua_hash,
            last_activity_at: now,
            request_count: 0,
            ip_change_count: 0,
            user_agent_change_count: 0,
            ip_history: vec![IpHistoryEntry { ip, at: now, action: "created".to_string() }],
            expires_at: now + ttl,
            status: SessionStatus::Active,
            revoked_at: None,
            revoked_reason: None,
        };

        self.store.upsert(&session)?;
        self.cache_put(&session).await?;
        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    pub async fn get_by_jti(&self, jti: &SessionId, now: DateTime<Utc>) -> Result<Option<Session>, SessionError> {
        if let Some(session) = self.cache_get(jti.as_str()).await? {
            if session.expires_at > now {
                return Ok(Some(session));
            }
        }

        let Some(mut session) = self.store.get(jti)? else {
            return Ok(None);
        };

        if session.expires_at <= now {
            if session.status != SessionStatus::Expired {
                session.status = SessionStatus::Expired;
                self.store.upsert(&session)?;
            }
            self.cache_invalidate(jti.as_str()).await?;
            return Ok(None);
        }

        self.cache_put(&session).await?;
        Ok(Some(session))
    }

    #[instrument(skip(self, user_agent))]
    pub async fn update_activity(&self, jti: &SessionId, ip: impl Into<String>, user_agent: impl Into<String>, now: DateTime<Utc>) -> Result<Option<(Session, ActivityChange)>, SessionError> {
        let Some(mut session) = self.store.get(jti)? else {
            return Ok(None);
        };
        let ip = ip.into();
        let user_agent = user_agent.into();
        let ua_hash = hash_user_agent(&user_agent);

        let ip_changed = ip != session.last_ip;
        let ua_changed = ua_hash != session.last_user_agent_hash;

        if ip_changed {
            session.ip_history.insert(0, IpHistoryEntry { ip: ip.clone(), at: now, action: "ip_changed".to_string() });
            session.ip_history.truncate(self.max_ip_history);
            session.ip_change_count += 1;
        }
        if ua_changed {
            session.user_agent_change_count += 1;
        }

        session.last_ip = ip;
        session.last_user_agent = user_agent;
        session.last_user_agent_hash = ua_hash;
        session.last_activity_at = now;
        session.request_count += 1;

        self.store.upsert(&session)?;
        self.cache_put(&session).await?;

        Ok(Some((session, ActivityChange { ip_changed, user_agent_changed: ua_changed })))
    }

    #[instrument(skip(self, reason))]
    pub async fn revoke_session(&self, jti: &SessionId, reason: Option<String>, now: DateTime<Utc>) -> Result<bool, SessionError> {
        let Some(mut session) = self.store.get(jti)? else {
            return Ok(false);
        };
        if !matches!(session.status, SessionStatus::Active | SessionStatus::Suspicious) {
            return Ok(false);
        }
        session.status = SessionStatus::Revoked;
        session.revoked_at = Some(now);
        session.revoked_reason = reason;
        self.store.upsert(&session)?;
        self.cache_invalidate(jti.as_str()).await?;
        warn!(session_id = %session.id, "session revoked");
        Ok(true)
    }

    #[instrument(skip(self, reason))]
    pub async fn revoke_user_sessions(&self, user_id: &UserId, except_jti: Option<&SessionId>, reason: Option<String>, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let mut count = 0;
        for session in self.store.for_user(user_id)? {
            if Some(&session.id) == except_jti {
                continue;
            }
            if self.revoke_session(&session.id, reason.clone(), now).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    #[instrument(skip(self, reason))]
    pub async fn flag_suspicious(&self, jti: &SessionId, reason: &str, now: DateTime<Utc>) -> Result<bool, SessionError> {
        let Some(mut session) = self.store.get(jti)? else {
            return Ok(false);
        };
        if session.status != SessionStatus::Active {
            return Ok(false);
        }
        session.status = SessionStatus::Suspicious;
        session.last_activity_at = now;
        self.store.upsert(&session)?;
        self.cache_invalidate(jti.as_str()).await?;
        warn!(session_id = %session.id, reason, "session flagged suspicious");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let mut count = 0;
        for mut session in self.store.all()? {
            if session.status == SessionStatus::Active && session.expires_at < now {
                session.status = SessionStatus::Expired;
                self.store.upsert(&session)?;
                self.cache_invalidate(session.token_jti.as_str()).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn get_user_sessions(&self, user_id: &UserId, include_revoked: bool, now: DateTime<Utc>) -> Result<Vec<Session>, SessionError> {
        let mut sessions = self.store.for_user(user_id)?;
        if !include_revoked {
            sessions.retain(|s| !matches!(s.effective_status(now), SessionStatus::Revoked | SessionStatus::Expired));
        }
        Ok(sessions)
    }

    pub fn count_active_sessions(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        Ok(self.store.all()?.into_iter().filter(|s| matches!(s.effective_status(now), SessionStatus::Active | SessionStatus::Suspicious)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_storage::{RedbStorage, RedbStorageConfig};
    use tempfile::TempDir;

    fn manager() -> (SessionManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(RedbStorage::open(RedbStorageConfig { db_path: dir.path().join("sessions.redb"), ..Default::default() }).unwrap());
        (SessionManager::with_memory_cache(SessionStore::new(storage), 900, DEFAULT_MAX_IP_HISTORY), dir)
    }

    #[tokio::test]
    async fn create_then_get_by_jti_round_trips() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let session = mgr.create(UserId::from("u1"), "jti-1", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        let fetched = mgr.get_by_jti(&session.id, now).await.unwrap().unwrap();
        assert_eq!(fetched.token_jti, "jti-1");
        assert_eq!(fetched.ip_history.len(), 1);
        assert_eq!(fetched.ip_history[0].action, "created");
    }

    #[tokio::test]
    async fn get_by_jti_returns_none_past_expiry() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let session = mgr.create(UserId::from("u1"), "jti-1", "access", "10.0.0.1", "agent/1.0", ChronoDuration::seconds(1), now).await.unwrap();
        let later = now + ChronoDuration::seconds(2);
        assert_eq!(mgr.get_by_jti(&session.id, later).await.unwrap(), None);
    }

    #[tokio::test]
    async fn update_activity_tracks_ip_and_ua_changes() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let session = mgr.create(UserId::from("u1"), "jti-1", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        let (updated, change) = mgr.update_activity(&session.id, "10.0.0.2", "agent/2.0", now).await.unwrap().unwrap();
        assert!(change.ip_changed);
        assert!(change.user_agent_changed);
        assert_eq!(updated.ip_change_count, 1);
        assert_eq!(updated.user_agent_change_count, 1);
        assert_eq!(updated.request_count, 1);
        assert_eq!(updated.ip_history.len(), 2);
        assert_eq!(updated.ip_history[0].ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn ip_history_is_bounded_to_configured_max() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let session = mgr.create(UserId::from("u1"), "jti-1", "access", "10.0.0.0", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        for i in 1..20 {
            mgr.update_activity(&session.id, format!("10.0.0.{i}"), "agent/1.0", now).await.unwrap();
        }
        let fetched = mgr.get_by_jti(&session.id, now).await.unwrap().unwrap();
        assert_eq!(fetched.ip_history.len(), DEFAULT_MAX_IP_HISTORY);
    }

    #[tokio::test]
    async fn revoke_session_is_idempotent() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let session = mgr.create(UserId::from("u1"), "jti-1", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        assert!(mgr.revoke_session(&session.id, Some("compromised".to_string()), now).await.unwrap());
        assert!(!mgr.revoke_session(&session.id, None, now).await.unwrap());
        assert_eq!(mgr.get_by_jti(&session.id, now).await.unwrap(), None);
    }

    #[tokio::test]
    async fn revoke_user_sessions_skips_the_excepted_jti() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let a = mgr.create(UserId::from("u1"), "jti-a", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        let b = mgr.create(UserId::from("u1"), "jti-b", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        let count = mgr.revoke_user_sessions(&UserId::from("u1"), Some(&a.id), None, now).await.unwrap();
        assert_eq!(count, 1);
        assert!(mgr.get_by_jti(&a.id, now).await.unwrap().is_some());
        assert!(mgr.get_by_jti(&b.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn flag_suspicious_only_applies_to_active_sessions() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let session = mgr.create(UserId::from("u1"), "jti-1", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        assert!(mgr.flag_suspicious(&session.id, "unusual geo", now).await.unwrap());
        assert!(!mgr.flag_suspicious(&session.id, "again", now).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_expired_marks_active_sessions_past_expiry() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        mgr.create(UserId::from("u1"), "jti-1", "access", "10.0.0.1", "agent/1.0", ChronoDuration::seconds(1), now).await.unwrap();
        let later = now + ChronoDuration::seconds(2);
        let count = mgr.cleanup_expired(later).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn count_active_sessions_excludes_revoked_and_expired() {
        let (mgr, _dir) = manager();
        let now = Utc::now();
        let a = mgr.create(UserId::from("u1"), "jti-a", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        mgr.create(UserId::from("u1"), "jti-b", "access", "10.0.0.1", "agent/1.0", ChronoDuration::hours(1), now).await.unwrap();
        mgr.revoke_session(&a.id, None, now).await.unwrap();
        assert_eq!(mgr.count_active_sessions(now).unwrap(), 1);
    }
}

//! The trust manager (§4.1).
//!
//! Maintains an in-memory, process-wide cache of each known peer's trust
//! score and status, mutated only through the operations below and guarded
//! by a per-peer lock (mirroring `forge_resilience::CircuitBreakerRegistry`'s
//! get-or-create-under-a-coarse-lock pattern, here additionally bounded with
//! FIFO eviction since peers are adversary-controlled input volume). Callers
//! pass the persisted [`Peer`] row they are working with; each operation
//! both updates the manager's cache and writes the result back onto the
//! `Peer`, so the caller can persist it through `forge_storage::PeerStore`
//! without the manager needing a storage dependency of its own.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use forge_core::PeerId;
use forge_storage::{Peer, PeerStatus, INITIAL_TRUST};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::TrustError;
use crate::events::{TrustEvent, TrustEventKind};
use crate::tier::{SyncPermissions, TrustTier};

pub const MAX_CACHED_PEERS: usize = 10_000;
pub const MAX_EVENTS: usize = 5_000;
const EVICTION_FRACTION: f64 = 0.1;

const QUARANTINE_CEILING: f64 = 0.2;
const INACTIVITY_DECAY_PER_WEEK: f64 = 0.01;
const VERIFICATION_DECAY: f64 = 0.1;
pub const DEFAULT_MAX_VERIFICATION_AGE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PeerTrustState {
    pub(crate) trust_score: f64,
    pub(crate) status: PeerStatus,
}

pub struct TrustManager {
    pub(crate) states: DashMap<PeerId, Arc<Mutex<PeerTrustState>>>,
    order: Mutex<VecDeque<PeerId>>,
    creation_lock: Mutex<()>,
    pub(crate) events: Mutex<VecDeque<TrustEvent>>,
    max_cached_peers: usize,
    max_events: usize,
}

impl Default for TrustManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustManager {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHED_PEERS, MAX_EVENTS)
    }

    pub fn with_capacity(max_cached_peers: usize, max_events: usize) -> Self {
        Self {
            states: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            creation_lock: Mutex::new(()),
            events: Mutex::new(VecDeque::new()),
            max_cached_peers,
            max_events,
        }
    }

    /// Look up, or seed-and-insert, the cached state for `peer_id`. Seeding
    /// uses the caller-supplied `Peer` row so a freshly-loaded-from-storage
    /// peer warms the cache with its persisted score rather than resetting
    /// to the initial default (see DESIGN.md: this applies "set to initial
    /// 0.3" literally only for genuinely new peers, since `Peer::new`
    /// already defaults `trust_score` to [`INITIAL_TRUST`]).
    async fn get_or_create_state(&self, peer_id: &PeerId, seed_score: f64, seed_status: PeerStatus) -> (Arc<Mutex<PeerTrustState>>, bool) {
        if let Some(existing) = self.states.get(peer_id) {
            return (existing.clone(), false);
        }
        let _guard = self.creation_lock.lock().await;
        if let Some(existing) = self.states.get(peer_id) {
            return (existing.clone(), false);
        }

        let state = Arc::new(Mutex::new(PeerTrustState {
            trust_score: seed_score,
            status: seed_status,
        }));
        self.states.insert(peer_id.clone(), state.clone());

        let mut order = self.order.lock().await;
        order.push_back(peer_id.clone());
        if order.len() > self.max_cached_peers {
            let evict_count = (self.max_cached_peers as f64 * EVICTION_FRACTION).ceil() as usize;
            for _ in 0..evict_count.max(1) {
                if let Some(oldest) = order.pop_front() {
                    self.states.remove(&oldest);
                } else {
                    break;
                }
            }
        }
        (state, true)
    }

    async fn record_event(&self, event: TrustEvent) {
        let mut events = self.events.lock().await;
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// Generic tier-derived status reconciliation (§4.1 "Status reconciliation"),
    /// used by `manual_adjustment` and `apply_trust_decay_if_expired`.
    /// `record_failed_sync` applies its own narrower rule instead (it only
    /// ever forces SUSPENDED, never restores), and REVOKED is never touched
    /// here: it is terminal except through `revoke_peer`'s own inverse,
    /// which does not exist in v1 per the peer invariant in §3.1.
    fn reconcile_status_from_tier(state: &mut PeerTrustState) {
        if state.status == PeerStatus::Revoked {
            return;
        }
        let tier = TrustTier::for_score(state.trust_score);
        state.status = match tier {
            TrustTier::Quarantine => PeerStatus::Suspended,
            TrustTier::Standard | TrustTier::Trusted | TrustTier::Core => {
                if state.status == PeerStatus::Suspended {
                    PeerStatus::Active
                } else {
                    state.status
                }
            }
            TrustTier::Limited => {
                if state.status == PeerStatus::Suspended {
                    PeerStatus::Degraded
                } else {
                    state.status
                }
            }
        };
    }

    #[instrument(skip(self, peer), fields(peer_id = %peer.id))]
    pub async fn initialize_peer(&self, peer: &mut Peer) {
        let (state, created) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        let guard = state.lock().await;
        peer.trust_score = guard.trust_score;
        peer.status = guard.status;
        let score = guard.trust_score;
        drop(guard);
        if created {
            self.record_event(TrustEvent {
                peer_id: peer.id.clone(),
                kind: TrustEventKind::Initialized,
                delta: 0.0,
                resulting_score: score,
                reason: None,
                by: None,
                at: Utc::now(),
            })
            .await;
        }
    }

    #[instrument(skip(self, peer), fields(peer_id = %peer.id))]
    pub async fn record_successful_sync(&self, peer: &mut Peer) -> f64 {
        let (state, _) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        let mut guard = state.lock().await;
        let delta = 0.02;
        guard.trust_score = (guard.trust_score + delta).min(1.0);
        peer.trust_score = guard.trust_score;
        peer.status = guard.status;
        let score = guard.trust_score;
        drop(guard);
        self.record_event(TrustEvent {
            peer_id: peer.id.clone(),
            kind: TrustEventKind::SuccessfulSync,
            delta,
            resulting_score: score,
            reason: None,
            by: None,
            at: Utc::now(),
        })
        .await;
        score
    }

    #[instrument(skip(self, peer), fields(peer_id = %peer.id))]
    pub async fn record_failed_sync(&self, peer: &mut Peer) -> f64 {
        let (state, _) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        let mut guard = state.lock().await;
        let delta = -0.05;
        guard.trust_score = (guard.trust_score + delta).max(0.0);
        if guard.trust_score < QUARANTINE_CEILING && !matches!(guard.status, PeerStatus::Suspended | PeerStatus::Revoked) {
            guard.status = PeerStatus::Suspended;
            warn!(peer_id = %peer.id, score = guard.trust_score, "peer auto-suspended after failed sync");
        }
        peer.trust_score = guard.trust_score;
        peer.status = guard.status;
        let score = guard.trust_score;
        drop(guard);
        self.record_event(TrustEvent {
            peer_id: peer.id.clone(),
            kind: TrustEventKind::FailedSync,
            delta,
            resulting_score: score,
            reason: None,
            by: None,
            at: Utc::now(),
        })
        .await;
        score
    }

    #[instrument(skip(self, peer), fields(peer_id = %peer.id))]
    pub async fn record_conflict(&self, peer: &mut Peer, resolved: bool) -> f64 {
        let (state, _) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        if resolved {
            let guard = state.lock().await;
            peer.trust_score = guard.trust_score;
            peer.status = guard.status;
            return guard.trust_score;
        }
        let mut guard = state.lock().await;
        let delta = -0.01;
        guard.trust_score = (guard.trust_score + delta).max(0.0);
        peer.trust_score = guard.trust_score;
        peer.status = guard.status;
        let score = guard.trust_score;
        drop(guard);
        self.record_event(TrustEvent {
            peer_id: peer.id.clone(),
            kind: TrustEventKind::ConflictUnresolved,
            delta,
            resulting_score: score,
            reason: None,
            by: None,
            at: Utc::now(),
        })
        .await;
        score
    }

    #[instrument(skip(self, peer, reason, by), fields(peer_id = %peer.id))]
    pub async fn manual_adjustment(&self, peer: &mut Peer, delta: f64, reason: impl Into<String>, by: impl Into<String>) -> Result<f64, TrustError> {
        if !delta.is_finite() {
            return Err(TrustError::InvalidAdjustment(delta));
        }
        let reason = reason.into();
        let by = by.into();
        let (state, _) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        let mut guard = state.lock().await;
        guard.trust_score = (guard.trust_score + delta).clamp(0.0, 1.0);
        Self::reconcile_status_from_tier(&mut guard);
        peer.trust_score = guard.trust_score;
        peer.status = guard.status;
        let score = guard.trust_score;
        drop(guard);
        info!(peer_id = %peer.id, delta, by = %by, reason = %reason, "manual trust adjustment");
        self.record_event(TrustEvent {
            peer_id: peer.id.clone(),
            kind: TrustEventKind::ManualAdjustment,
            delta,
            resulting_score: score,
            reason: Some(reason),
            by: Some(by),
            at: Utc::now(),
        })
        .await;
        Ok(score)
    }

    #[instrument(skip(self, peer), fields(peer_id = %peer.id))]
    pub async fn apply_inactivity_decay(&self, peer: &mut Peer, now: DateTime<Utc>) -> f64 {
        let (state, _) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        let Some(last_seen) = peer.last_seen_at else {
            return peer.trust_score;
        };
        if now - last_seen < ChronoDuration::weeks(1) {
            return peer.trust_score;
        }
        let mut guard = state.lock().await;
        if guard.trust_score <= INITIAL_TRUST {
            // Inactivity decay only erodes above the floor; a peer that has
            // already fallen to (or started at) the initial trust level is
            // left to the sync-failure and verification-expiry penalties.
            return guard.trust_score;
        }
        let delta = -INACTIVITY_DECAY_PER_WEEK;
        guard.trust_score = (guard.trust_score + delta).max(INITIAL_TRUST);
        peer.trust_score = guard.trust_score;
        peer.status = guard.status;
        let score = guard.trust_score;
        drop(guard);
        self.record_event(TrustEvent {
            peer_id: peer.id.clone(),
            kind: TrustEventKind::InactivityDecay,
            delta,
            resulting_score: score,
            reason: None,
            by: None,
            at: now,
        })
        .await;
        score
    }

    #[instrument(skip(self, peer), fields(peer_id = %peer.id))]
    pub async fn apply_trust_decay_if_expired(&self, peer: &mut Peer, now: DateTime<Utc>, max_age_days: i64) -> f64 {
        let (state, _) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        let expired = match peer.last_verified_at {
            None => true,
            Some(verified_at) => now - verified_at > ChronoDuration::days(max_age_days),
        };
        if !expired {
            return peer.trust_score;
        }
        let mut guard = state.lock().await;
        let delta = -VERIFICATION_DECAY;
        guard.trust_score = (guard.trust_score + delta).max(0.0);
        Self::reconcile_status_from_tier(&mut guard);
        peer.trust_score = guard.trust_score;
        peer.status = guard.status;
        let score = guard.trust_score;
        drop(guard);
        self.record_event(TrustEvent {
            peer_id: peer.id.clone(),
            kind: TrustEventKind::VerificationExpiredDecay,
            delta,
            resulting_score: score,
            reason: None,
            by: None,
            at: now,
        })
        .await;
        score
    }

    #[instrument(skip(self, peer, reason, by), fields(peer_id = %peer.id))]
    pub async fn revoke_peer(&self, peer: &mut Peer, reason: impl Into<String>, by: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        let by = by.into();
        let (state, _) = self.get_or_create_state(&peer.id, peer.trust_score, peer.status).await;
        let mut guard = state.lock().await;
        guard.trust_score = 0.0;
        guard.status = PeerStatus::Revoked;
        peer.trust_score = 0.0;
        peer.status = PeerStatus::Revoked;
        if !peer.description.is_empty() {
            peer.description.push(' ');
        }
        peer.description.push_str(&format!("[REVOKED at {} by {}: {}]", now.to_rfc3339(), by, reason));
        drop(guard);
        warn!(peer_id = %peer.id, by = %by, reason = %reason, "peer revoked");
        self.record_event(TrustEvent {
            peer_id: peer.id.clone(),
            kind: TrustEventKind::Revoked,
            delta: 0.0,
            resulting_score: 0.0,
            reason: Some(reason),
            by: Some(by),
            at: now,
        })
        .await;
    }

    /// Pure function of the current score; does not touch the cache.
    pub fn get_trust_tier(&self, peer: &Peer) -> TrustTier {
        TrustTier::for_score(peer.trust_score)
    }

    /// §4.1: status checks take priority over the tier check, so a
    /// SUSPENDED peer at quarantine-level trust reports "suspended" rather
    /// than "quarantined" (see scenario S5 in §8).
    pub fn can_sync(&self, peer: &Peer) -> (bool, String) {
        match peer.status {
            PeerStatus::Revoked => return (false, "Peer trust has been revoked".to_string()),
            PeerStatus::Suspended => return (false, "Peer is suspended".to_string()),
            PeerStatus::Offline => return (false, "Peer is offline".to_string()),
            _ => {}
        }
        let tier = TrustTier::for_score(peer.trust_score);
        if tier == TrustTier::Quarantine {
            return (false, "Peer is quarantined due to low trust".to_string());
        }
        (true, format!("{tier:?} tier"))
    }

    pub fn get_sync_permissions(&self, peer: &Peer) -> SyncPermissions {
        SyncPermissions::for_tier(TrustTier::for_score(peer.trust_score))
    }

    pub async fn get_trust_history(&self, peer_id: &PeerId, limit: usize) -> Vec<TrustEvent> {
        let events = self.events.lock().await;
        events
            .iter()
            .rev()
            .filter(|e| &e.peer_id == peer_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn known_peer_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::PeerId;

    fn test_peer() -> Peer {
        Peer::new(PeerId::from("p1"), "Peer One", "https://peer.example", "pub", Utc::now())
    }

    #[tokio::test]
    async fn initialize_peer_seeds_cache_at_default_trust() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        manager.initialize_peer(&mut peer).await;
        assert_eq!(peer.trust_score, INITIAL_TRUST);
        let history = manager.get_trust_history(&peer.id, 10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TrustEventKind::Initialized);
    }

    #[tokio::test]
    async fn successful_sync_increases_score_and_clamps_at_one() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        peer.trust_score = 0.99;
        let score = manager.record_successful_sync(&mut peer).await;
        assert_eq!(score, 1.0);
        assert_eq!(peer.trust_score, 1.0);
    }

    #[tokio::test]
    async fn repeated_failures_auto_suspend_below_quarantine_ceiling() {
        // S5: starting from 0.22, three failures land at 0.07 and suspend.
        let manager = TrustManager::new();
        let mut peer = test_peer();
        peer.trust_score = 0.22;
        for _ in 0..3 {
            manager.record_failed_sync(&mut peer).await;
        }
        assert!((peer.trust_score - 0.07).abs() < 1e-9);
        assert_eq!(peer.status, PeerStatus::Suspended);
        assert_eq!(manager.can_sync(&peer), (false, "Peer is suspended".to_string()));
    }

    #[tokio::test]
    async fn failed_sync_never_drops_below_zero() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        peer.trust_score = 0.01;
        manager.record_failed_sync(&mut peer).await;
        assert_eq!(peer.trust_score, 0.0);
    }

    #[tokio::test]
    async fn resolved_conflict_is_a_no_op() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        let before = peer.trust_score;
        manager.record_conflict(&mut peer, true).await;
        assert_eq!(peer.trust_score, before);
    }

    #[tokio::test]
    async fn unresolved_conflict_subtracts_small_penalty() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        manager.record_conflict(&mut peer, false).await;
        assert!((peer.trust_score - (INITIAL_TRUST - 0.01)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn manual_adjustment_clamps_and_reconciles_status() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        peer.status = PeerStatus::Suspended;
        manager.manual_adjustment(&mut peer, 0.5, "operator override", "admin@forge").await.unwrap();
        assert_eq!(peer.trust_score, 0.8);
        assert_eq!(peer.status, PeerStatus::Active);
    }

    #[tokio::test]
    async fn manual_adjustment_rejects_non_finite_delta() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        let err = manager.manual_adjustment(&mut peer, f64::NAN, "bad input", "admin@forge").await.unwrap_err();
        assert!(matches!(err, TrustError::InvalidAdjustment(_)));
    }

    #[tokio::test]
    async fn revoke_peer_is_terminal_and_zeroes_trust() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        manager.revoke_peer(&mut peer, "compromised key", "admin@forge", Utc::now()).await;
        assert_eq!(peer.trust_score, 0.0);
        assert_eq!(peer.status, PeerStatus::Revoked);
        assert!(peer.description.contains("REVOKED"));

        // Further manual_adjustment is the only way back; failed syncs must
        // not change a revoked peer's terminal status.
        manager.record_failed_sync(&mut peer).await;
        assert_eq!(peer.status, PeerStatus::Revoked);
    }

    #[tokio::test]
    async fn apply_trust_decay_if_expired_only_fires_past_the_window() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        let now = Utc::now();
        peer.last_verified_at = Some(now - ChronoDuration::days(3));
        manager.apply_trust_decay_if_expired(&mut peer, now, DEFAULT_MAX_VERIFICATION_AGE_DAYS).await;
        assert_eq!(peer.trust_score, INITIAL_TRUST);

        peer.last_verified_at = Some(now - ChronoDuration::days(10));
        manager.apply_trust_decay_if_expired(&mut peer, now, DEFAULT_MAX_VERIFICATION_AGE_DAYS).await;
        assert!((peer.trust_score - (INITIAL_TRUST - 0.1)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn can_sync_reports_quarantine_only_when_status_is_otherwise_healthy() {
        let manager = TrustManager::new();
        let mut peer = test_peer();
        peer.trust_score = 0.05;
        peer.status = PeerStatus::Pending;
        assert_eq!(manager.can_sync(&peer), (false, "Peer is quarantined due to low trust".to_string()));
    }
}

//! Structured records persisted by this crate (§3.1-§3.3, §3.9).
//!
//! These are bookkeeping rows the federation core keeps about peers, remote
//! entities, sync attempts, and sessions — distinct from capsule/edge content
//! itself, which lives behind `forge_core::GraphStore`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forge_core::{CapsuleId, PeerId, SessionId, SyncId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Pending,
    Active,
    Degraded,
    Suspended,
    Offline,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    Push,
    Pull,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    LocalWins,
    RemoteWins,
    HigherTrust,
    NewerTimestamp,
    Merge,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FederatedSyncStatus {
    Pending,
    Synced,
    Conflict,
    Rejected,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Init,
    Fetching,
    Processing,
    Applying,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Suspicious,
    Revoked,
    Expired,
}

pub const INITIAL_TRUST: f64 = 0.3;

/// §3.1. `trust_score` and `status` are also mutated by the trust manager;
/// this struct is the persisted row, not the authoritative in-memory cache
/// the trust manager keeps (see `forge_trust`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub display_name: String,
    pub base_url: String,
    pub our_public_key: String,
    pub peer_public_key: String,
    pub trust_score: f64,
    pub status: PeerStatus,
    pub sync_direction: SyncDirection,
    pub sync_interval_minutes: u32,
    pub conflict_policy: ConflictPolicy,
    pub allowed_entity_types: Vec<String>,
    pub min_trust_to_sync: u8,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub entities_sent: u64,
    pub entities_received: u64,
    pub description: String,
}

impl Peer {
    pub fn new(id: PeerId, display_name: impl Into<String>, base_url: impl Into<String>, peer_public_key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            base_url: base_url.into(),
            our_public_key: String::new(),
            peer_public_key: peer_public_key.into(),
            trust_score: INITIAL_TRUST,
            status: PeerStatus::Pending,
            sync_direction: SyncDirection::Bidirectional,
            sync_interval_minutes: 15,
            conflict_policy: ConflictPolicy::NewerTimestamp,
            allowed_entity_types: Vec::new(),
            min_trust_to_sync: 0,
            registered_at: now,
            last_seen_at: None,
            last_sync_at: None,
            last_verified_at: None,
            total_syncs: 0,
            successful_syncs: 0,
            failed_syncs: 0,
            entities_sent: 0,
            entities_received: 0,
            description: String::new(),
        }
    }
}

/// §3.2, keyed by `(peer_id, remote_entity_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedEntityRecord {
    pub peer_id: PeerId,
    pub remote_entity_id: String,
    pub local_id: Option<CapsuleId>,
    pub remote_content_hash: Option<String>,
    pub local_content_hash: Option<String>,
    pub status: FederatedSyncStatus,
    pub title: Option<String>,
    pub entity_type: Option<String>,
    pub trust_level: Option<u8>,
    pub owner: Option<String>,
    pub conflict_reason: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl FederatedEntityRecord {
    pub fn new(peer_id: PeerId, remote_entity_id: impl Into<String>) -> Self {
        Self {
            peer_id,
            remote_entity_id: remote_entity_id.into(),
            local_id: None,
            remote_content_hash: None,
            local_content_hash: None,
            status: FederatedSyncStatus::Pending,
            title: None,
            entity_type: None,
            trust_level: None,
            owner: None,
            conflict_reason: None,
            last_synced_at: None,
        }
    }
}

/// §3.3, one row per sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub sync_id: SyncId,
    pub peer_id: PeerId,
    pub direction: SyncDirection,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncRunStatus,
    pub phase: SyncPhase,
    pub sync_from: Option<DateTime<Utc>>,
    pub sync_to: Option<DateTime<Utc>>,
    pub entities_fetched: u64,
    pub entities_created: u64,
    pub entities_updated: u64,
    pub entities_skipped: u64,
    pub entities_conflicted: u64,
    pub edges_created: u64,
    pub edges_skipped: u64,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub conflicts: Vec<SyncConflictRecord>,
}

impl SyncState {
    pub fn new(sync_id: SyncId, peer_id: PeerId, direction: SyncDirection, started_at: DateTime<Utc>) -> Self {
        Self {
            sync_id,
            peer_id,
            direction,
            started_at,
            completed_at: None,
            status: SyncRunStatus::Running,
            phase: SyncPhase::Init,
            sync_from: None,
            sync_to: None,
            entities_fetched: 0,
            entities_created: 0,
            entities_updated: 0,
            entities_skipped: 0,
            entities_conflicted: 0,
            edges_created: 0,
            edges_skipped: 0,
            error_message: None,
            error_details: None,
            conflicts: Vec::new(),
        }
    }
}

/// A single conflict decision made during a sync attempt (§4.8), kept on the
/// `SyncState` row so MANUAL_REVIEW cases can be handed to an operator and
/// every other policy's decision stays auditable after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflictRecord {
    pub remote_entity_id: String,
    pub policy: ConflictPolicy,
    pub resolution: String,
    pub local_trust_level: Option<u8>,
    pub remote_trust_level: Option<u8>,
    pub detected_at: DateTime<Utc>,
}

/// §3.2-adjacent, one row per federated edge this peer has synced in.
/// `local_source_id`/`local_target_id` resolve through `FederatedEntityRecord`
/// lookups; an edge is skipped (not created) until both endpoints exist
/// locally, which `edges_skipped` on `SyncState` tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedEdgeRecord {
    pub peer_id: PeerId,
    pub remote_edge_id: String,
    pub local_source_id: CapsuleId,
    pub local_target_id: CapsuleId,
    pub kind: String,
    pub last_synced_at: DateTime<Utc>,
}

impl FederatedEdgeRecord {
    pub fn new(
        peer_id: PeerId,
        remote_edge_id: impl Into<String>,
        local_source_id: CapsuleId,
        local_target_id: CapsuleId,
        kind: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            peer_id,
            remote_edge_id: remote_edge_id.into(),
            local_source_id,
            local_target_id,
            kind: kind.into(),
            last_synced_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpHistoryEntry {
    pub ip: String,
    pub at: DateTime<Utc>,
    pub action: String,
}

/// §3.9. `id` is equal to `token_jti`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub token_jti: String,
    pub token_type: String,
    pub initial_ip: String,
    pub initial_user_agent: String,
    pub initial_user_agent_hash: String,
    pub last_ip: String,
    pub last_user_agent: String,
    pub last_user_agent_hash: String,
    pub last_activity_at: DateTime<Utc>,
    pub request_count: u64,
    pub ip_change_count: u64,
    pub user_agent_change_count: u64,
    pub ip_history: Vec<IpHistoryEntry>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl Session {
    /// Effective status per the §3.9 invariant: an expired session reads as
    /// EXPIRED regardless of what is stored.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        if self.expires_at <= now {
            SessionStatus::Expired
        } else {
            self.status
        }
    }
}

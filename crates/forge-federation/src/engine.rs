//! The Federation Sync Engine (§4.8): orchestrates the sync lifecycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use forge_core::{CapsuleId, GraphStore, PeerId, SyncId, SyncTransport};
use forge_crypto::PeerSigningKey;
use forge_storage::{
    ConflictPolicy, FederatedEdgeRecord, FederatedEdgeStore, FederatedEntityRecord, FederatedEntityStore,
    FederatedSyncStatus, Peer, PeerStatus, PeerStore, SyncConflictRecord, SyncDirection, SyncPhase, SyncRunStatus,
    SyncState, SyncStateStore,
};
use forge_trust::{SyncPermissions, TrustManager};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::conflict::{has_conflict, resolve_conflict, ConflictCandidate, ConflictOutcome};
use crate::error::{ProtocolError, SyncError};
use crate::protocol::FederationProtocol;
use crate::wire::SyncRequest;

const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Everything the sync lifecycle needs, wired together once at startup.
/// Per-peer mutual exclusion mirrors `forge_trust::TrustManager` and
/// `forge_resilience::CircuitBreakerRegistry`'s get-or-create-under-a-coarse-
/// lock pattern: a per-peer lock, not a single global one, is held only for
/// the bookkeeping in steps 1-3 of `sync_with_peer`, then released before
/// any network I/O happens.
pub struct FederationSyncEngine {
    peer_store: Arc<PeerStore>,
    federated_entity_store: Arc<FederatedEntityStore>,
    federated_edge_store: Arc<FederatedEdgeStore>,
    sync_state_store: Arc<SyncStateStore>,
    trust: Arc<TrustManager>,
    protocol: Arc<FederationProtocol>,
    transport: Arc<dyn SyncTransport>,
    graph: Arc<dyn GraphStore>,
    signing_key: Arc<PeerSigningKey>,
    sync_locks: DashMap<PeerId, Arc<Mutex<()>>>,
    creation_lock: Mutex<()>,
}

impl FederationSyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_store: Arc<PeerStore>,
        federated_entity_store: Arc<FederatedEntityStore>,
        federated_edge_store: Arc<FederatedEdgeStore>,
        sync_state_store: Arc<SyncStateStore>,
        trust: Arc<TrustManager>,
        protocol: Arc<FederationProtocol>,
        transport: Arc<dyn SyncTransport>,
        graph: Arc<dyn GraphStore>,
        signing_key: Arc<PeerSigningKey>,
    ) -> Self {
        Self {
            peer_store,
            federated_entity_store,
            federated_edge_store,
            sync_state_store,
            trust,
            protocol,
            transport,
            graph,
            signing_key,
            sync_locks: DashMap::new(),
            creation_lock: Mutex::new(()),
        }
    }

    async fn lock_for(&self, peer_id: &PeerId) -> Arc<Mutex<()>> {
        if let Some(existing) = self.sync_locks.get(peer_id) {
            return existing.clone();
        }
        let _guard = self.creation_lock.lock().await;
        if let Some(existing) = self.sync_locks.get(peer_id) {
            return existing.clone();
        }
        let lock = Arc::new(Mutex::new(()));
        self.sync_locks.insert(peer_id.clone(), lock.clone());
        lock
    }

    /// Inserts `peer` into the peer store and seeds its Trust Manager
    /// state (§4.8 "Ancillary operations").
    #[instrument(skip(self, peer))]
    pub async fn register_peer(&self, mut peer: Peer) -> Result<Peer, SyncError> {
        self.trust.initialize_peer(&mut peer).await;
        self.peer_store.upsert(&peer)?;
        Ok(peer)
    }

    pub fn get_sync_state(&self, peer_id: &PeerId, sync_id: &SyncId) -> Result<Option<SyncState>, SyncError> {
        Ok(self.sync_state_store.get(peer_id, sync_id)?)
    }

    /// Most recent attempts for a peer, newest-first, optionally capped.
    pub fn get_sync_history(&self, peer_id: &PeerId, limit: Option<usize>) -> Result<Vec<SyncState>, SyncError> {
        let mut states = self.sync_state_store.for_peer(peer_id)?;
        states.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            states.truncate(limit);
        }
        Ok(states)
    }

    /// Peer ids currently eligible for a Scheduler-driven sync: status
    /// ACTIVE and `now ≥ last_sync_at + sync_interval`.
    pub fn schedule_sync_all(&self, now: DateTime<Utc>) -> Result<Vec<PeerId>, SyncError> {
        let due = self
            .peer_store
            .all()?
            .into_iter()
            .filter(|peer| peer.status == PeerStatus::Active)
            .filter(|peer| match peer.last_sync_at {
                None => true,
                Some(last) => now >= last + chrono::Duration::minutes(peer.sync_interval_minutes as i64),
            })
            .map(|peer| peer.id)
            .collect();
        Ok(due)
    }

    /// `sync_with_peer(peer_id, direction?, force?) → SyncState` (§4.8
    /// "Top-level"). Errors out only for the precondition checks (unknown
    /// peer, not permitted); once a sync attempt is actually launched, any
    /// failure is recorded on the returned `SyncState` rather than
    /// propagated, so callers always get back a terminal state to inspect.
    #[instrument(skip(self))]
    pub async fn sync_with_peer(&self, peer_id: &PeerId, direction: Option<SyncDirection>, force: bool, now: DateTime<Utc>) -> Result<SyncState, SyncError> {
        let lock = self.lock_for(peer_id).await;

        // Steps 1-3 (§4.8): look up the peer, decide whether this attempt
        // even runs, and allocate the sync id and initial state. The guard
        // is dropped at the end of this block, before any network I/O.
        let (mut peer, permissions, direction, mut state) = {
            let _guard = lock.lock().await;

            let mut peer = self.peer_store.get(peer_id)?.ok_or_else(|| SyncError::UnknownPeer(peer_id.to_string()))?;

            if !force {
                if let Some(last) = peer.last_sync_at {
                    if now < last + chrono::Duration::minutes(peer.sync_interval_minutes as i64) {
                        let mut skipped = SyncState::new(SyncId::from(format!("skip-{}-{}", peer_id, now.timestamp_millis())), peer_id.clone(), direction.unwrap_or(peer.sync_direction), now);
                        skipped.status = SyncRunStatus::Completed;
                        skipped.completed_at = Some(now);
                        self.sync_state_store.upsert(&skipped)?;
                        return Ok(skipped);
                    }
                }
            }

            let (allowed, reason) = self.trust.can_sync(&peer);
            if !allowed {
                return Err(SyncError::NotPermitted(reason));
            }
            let permissions = self.trust.get_sync_permissions(&peer);

            let direction = direction.unwrap_or(peer.sync_direction);
            let sync_id = SyncId::from(format!("sync-{}-{}", peer_id, now.timestamp_millis()));
            let state = SyncState::new(sync_id, peer_id.clone(), direction, now);
            self.sync_state_store.upsert(&state)?;

            (peer, permissions, direction, state)
        };

        let outcome: Result<(), SyncError> = match direction {
            SyncDirection::Pull => self.execute_pull(&mut peer, &mut state, &permissions, now).await,
            SyncDirection::Push => self.execute_push(&mut peer, &mut state, &permissions, now).await,
            SyncDirection::Bidirectional => {
                let pull = self.execute_pull(&mut peer, &mut state, &permissions, now).await;
                pull.and(self.execute_push(&mut peer, &mut state, &permissions, now).await)
            }
        };

        peer.total_syncs += 1;
        match outcome {
            Ok(()) => {
                state.status = SyncRunStatus::Completed;
                state.completed_at = Some(now);
                peer.successful_syncs += 1;
                peer.last_sync_at = Some(now);
                peer.last_seen_at = Some(now);
                self.trust.record_successful_sync(&mut peer).await;
            }
            Err(e) => {
                state.status = SyncRunStatus::Failed;
                state.completed_at = Some(now);
                state.error_message = Some(e.to_string());
                peer.failed_syncs += 1;
                self.trust.record_failed_sync(&mut peer).await;
            }
        }

        self.peer_store.upsert(&peer)?;
        self.sync_state_store.upsert(&state)?;
        Ok(state)
    }

    /// Phase FETCHING (§4.8 "Pull loop").
    async fn execute_pull(&self, peer: &mut Peer, state: &mut SyncState, permissions: &SyncPermissions, now: DateTime<Utc>) -> Result<(), SyncError> {
        state.phase = SyncPhase::Fetching;
        self.sync_state_store.upsert(state)?;

        let mut since = peer.last_sync_at;
        let mut cursor: Option<String> = None;
        let limit = permissions.max_entities_per_sync.min(DEFAULT_PAGE_LIMIT).max(1);
        let types = non_empty(&peer.allowed_entity_types);
        let base_nonce = now.timestamp_nanos_opt().unwrap_or_default() as u64;

        for page in 0u64.. {
            let nonce = base_nonce.wrapping_add(page);
            let request = SyncRequest { since, capsule_types: types.clone(), limit, cursor: cursor.clone() };
            let request_value = serde_json::to_value(&request).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            let envelope = self.protocol.build_envelope(&self.signing_key, request_value, nonce, now)?;
            let envelope_value = serde_json::to_value(&envelope).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

            let response = self.transport.send_sync_request(&peer.base_url, envelope_value).await?;
            let payload: crate::wire::SyncPayload = serde_json::from_value(response).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            self.protocol.verify_sync_payload(&payload, &peer.peer_public_key, now).await?;

            state.entities_fetched += payload.entities.len() as u64;
            peer.entities_received += payload.entities.len() as u64;

            for entity in &payload.entities {
                self.apply_pulled_entity(peer, state, entity, now).await;
            }
            for deletion_id in &payload.deletions {
                self.apply_pulled_deletion(peer, deletion_id)?;
            }
            for edge in &payload.edges {
                self.apply_pulled_edge(peer, state, edge, now).await;
            }

            if !payload.has_more || payload.next_cursor.is_none() {
                break;
            }
            cursor = payload.next_cursor;
            since = Some(payload.timestamp);
        }
        Ok(())
    }

    async fn apply_pulled_entity(&self, peer: &mut Peer, state: &mut SyncState, entity: &Value, now: DateTime<Utc>) {
        let Some(remote_id) = entity.get("id").and_then(Value::as_str).map(str::to_string) else {
            state.entities_skipped += 1;
            warn!("pulled entity is missing an id, skipping");
            return;
        };
        let remote_trust_level = entity.get("trust_level").and_then(Value::as_u64).map(|v| v as u8);
        if remote_trust_level.unwrap_or(0) < peer.min_trust_to_sync {
            state.entities_skipped += 1;
            return;
        }
        let remote_content_hash = entity.get("content_hash").and_then(Value::as_str).unwrap_or_default().to_string();

        let existing = match self.federated_entity_store.get(&peer.id, &remote_id) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "federated entity lookup failed");
                state.entities_skipped += 1;
                return;
            }
        };

        let Some(mut record) = existing else {
            let local_id = CapsuleId::from(format!("{}:{}", peer.id, remote_id));
            if self.graph.upsert_capsule(local_id.as_str(), entity.clone()).await.is_err() {
                state.entities_skipped += 1;
                return;
            }
            let mut record = FederatedEntityRecord::new(peer.id.clone(), remote_id.clone());
            record.local_id = Some(local_id);
            record.remote_content_hash = Some(remote_content_hash.clone());
            record.local_content_hash = Some(remote_content_hash);
            record.status = FederatedSyncStatus::Synced;
            record.title = entity.get("title").and_then(Value::as_str).map(str::to_string);
            record.entity_type = entity.get("entity_type").and_then(Value::as_str).map(str::to_string);
            record.trust_level = remote_trust_level;
            record.owner = entity.get("owner").and_then(Value::as_str).map(str::to_string);
            record.last_synced_at = Some(now);
            if let Err(e) = self.federated_entity_store.upsert(&record) {
                warn!(error = %e, "failed to persist a newly-materialized federated entity record");
            }
            state.entities_created += 1;
            return;
        };

        let Some(local_id) = record.local_id.clone() else {
            state.entities_skipped += 1;
            return;
        };
        let local_entity = match self.graph.get_capsule(local_id.as_str()).await {
            Ok(Some(value)) => value,
            _ => {
                state.entities_skipped += 1;
                return;
            }
        };
        let local_content_hash = local_entity.get("content_hash").and_then(Value::as_str).unwrap_or_default().to_string();

        if has_conflict(&local_content_hash, record.local_content_hash.as_deref(), &remote_content_hash, record.remote_content_hash.as_deref()) {
            let candidate = ConflictCandidate {
                local_trust_level: record.trust_level,
                remote_trust_level,
                local_updated_at: parse_timestamp(&local_entity),
                remote_updated_at: parse_timestamp(entity),
                local_content: local_entity.clone(),
                remote_content: entity.clone(),
                local_tags: tags_of(&local_entity),
                remote_tags: tags_of(entity),
            };
            let decision = resolve_conflict(peer.conflict_policy, &candidate);
            state.entities_conflicted += 1;
            state.conflicts.push(SyncConflictRecord {
                remote_entity_id: remote_id.clone(),
                policy: peer.conflict_policy,
                resolution: decision.resolution.clone(),
                local_trust_level: record.trust_level,
                remote_trust_level,
                detected_at: now,
            });

            match decision.outcome {
                ConflictOutcome::Update => {
                    if let Some(content) = decision.resolved_content {
                        if self.graph.upsert_capsule(local_id.as_str(), content).await.is_ok() {
                            record.local_content_hash = Some(remote_content_hash.clone());
                            record.remote_content_hash = Some(remote_content_hash);
                            record.status = FederatedSyncStatus::Synced;
                            record.conflict_reason = None;
                            state.entities_updated += 1;
                        } else {
                            state.entities_skipped += 1;
                        }
                    }
                }
                ConflictOutcome::Skip => {
                    record.status = FederatedSyncStatus::Conflict;
                    record.conflict_reason = Some(decision.resolution);
                }
            }
            record.trust_level = remote_trust_level.or(record.trust_level);
            record.last_synced_at = Some(now);
            if let Err(e) = self.federated_entity_store.upsert(&record) {
                warn!(error = %e, "failed to persist a conflict-resolved federated entity record");
            }

            let resolved = peer.conflict_policy != ConflictPolicy::ManualReview;
            self.trust.record_conflict(peer, resolved).await;
            return;
        }

        if Some(remote_content_hash.as_str()) != record.remote_content_hash.as_deref() {
            if self.graph.upsert_capsule(local_id.as_str(), entity.clone()).await.is_ok() {
                record.local_content_hash = Some(remote_content_hash.clone());
                record.remote_content_hash = Some(remote_content_hash);
                record.trust_level = remote_trust_level;
                record.last_synced_at = Some(now);
                if let Err(e) = self.federated_entity_store.upsert(&record) {
                    warn!(error = %e, "failed to persist an updated federated entity record");
                }
                state.entities_updated += 1;
            } else {
                state.entities_skipped += 1;
            }
        } else {
            state.entities_skipped += 1;
        }
    }

    /// A remote deletion is never applied locally, only flagged (§4.8 "For
    /// each deletion id ..."); an operator reviews `REJECTED` records.
    fn apply_pulled_deletion(&self, peer: &Peer, remote_id: &str) -> Result<(), SyncError> {
        if let Some(mut record) = self.federated_entity_store.get(&peer.id, remote_id)? {
            record.status = FederatedSyncStatus::Rejected;
            record.conflict_reason = Some("Remote capsule deleted".to_string());
            self.federated_entity_store.upsert(&record)?;
        }
        Ok(())
    }

    async fn apply_pulled_edge(&self, peer: &Peer, state: &mut SyncState, edge: &Value, now: DateTime<Utc>) {
        let (Some(remote_edge_id), Some(remote_source), Some(remote_target), Some(kind)) = (
            edge.get("id").and_then(Value::as_str),
            edge.get("source").and_then(Value::as_str),
            edge.get("target").and_then(Value::as_str),
            edge.get("kind").and_then(Value::as_str),
        ) else {
            state.edges_skipped += 1;
            return;
        };

        let source_local = self.federated_entity_store.get(&peer.id, remote_source).ok().flatten().and_then(|r| r.local_id);
        let target_local = self.federated_entity_store.get(&peer.id, remote_target).ok().flatten().and_then(|r| r.local_id);

        match (source_local, target_local) {
            (Some(source), Some(target)) => {
                if self.graph.create_edge(source.as_str(), target.as_str(), kind).await.is_ok() {
                    let record = FederatedEdgeRecord::new(peer.id.clone(), remote_edge_id, source, target, kind, now);
                    if let Err(e) = self.federated_edge_store.upsert(&record) {
                        warn!(error = %e, "failed to persist a federated edge record");
                    }
                    state.edges_created += 1;
                } else {
                    state.edges_skipped += 1;
                }
            }
            _ => state.edges_skipped += 1,
        }
    }

    /// Phase APPLYING (§4.8 "Push loop").
    async fn execute_push(&self, peer: &mut Peer, state: &mut SyncState, permissions: &SyncPermissions, now: DateTime<Utc>) -> Result<(), SyncError> {
        state.phase = SyncPhase::Applying;
        self.sync_state_store.upsert(state)?;

        let limit = permissions.max_entities_per_sync.min(DEFAULT_PAGE_LIMIT) as usize;
        if limit == 0 {
            return Ok(());
        }
        let entities = self.graph.capsules_changed_since(peer.last_sync_at, &peer.allowed_entity_types, peer.min_trust_to_sync, limit).await?;
        if entities.is_empty() {
            return Ok(());
        }

        let nonce = now.timestamp_nanos_opt().unwrap_or_default() as u64;
        let payload = self.protocol.build_sync_payload(&self.signing_key, peer.id.as_str(), format!("push-{}", state.sync_id), now, entities.clone(), vec![], vec![], false, None, Some(nonce))?;
        let payload_value = serde_json::to_value(&payload).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let response = self.transport.send_sync_push(&peer.base_url, payload_value).await?;
        let accepted = response.get("accepted").and_then(Value::as_bool).unwrap_or(false);
        if !accepted {
            let reason = response.get("reason").and_then(Value::as_str).unwrap_or("push rejected by peer").to_string();
            return Err(SyncError::NotPermitted(reason));
        }

        peer.entities_sent += entities.len() as u64;
        Ok(())
    }
}

fn non_empty(types: &[String]) -> Option<Vec<String>> {
    if types.is_empty() {
        None
    } else {
        Some(types.to_vec())
    }
}

fn tags_of(value: &Value) -> Vec<String> {
    value
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

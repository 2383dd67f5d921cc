//! Wire shapes for the federation protocol (§3.4, §3.5, §6).
//!
//! These are what actually crosses the `SyncTransport` boundary; they are
//! deliberately flat and serde-derived rather than reusing the storage
//! layer's `Peer`/`FederatedEntityRecord` types, since a peer's local
//! bookkeeping (trust score, sync counters) must never be serialized onto
//! the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// §3.5. `supports_push`/`supports_pull`/`supports_streaming` are the
/// capability flags; `max_entities_per_sync` is what the responder is
/// willing to hand back in one `SyncPayload` page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerHandshake {
    pub instance_id: String,
    pub display_name: String,
    pub api_version: String,
    pub public_key: String,
    pub supports_push: bool,
    pub supports_pull: bool,
    pub supports_streaming: bool,
    pub suggested_sync_interval_minutes: u32,
    pub max_entities_per_sync: u32,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    pub signature: String,
}

impl PeerHandshake {
    /// Bytes the signature covers: identity and freshness fields only, not
    /// the advertised capabilities, so a stripped-down responder can still
    /// emit a verifiable handshake.
    pub fn signing_payload(&self) -> Vec<u8> {
        format!("{}:{}:{}", self.instance_id, self.timestamp.timestamp(), self.nonce).into_bytes()
    }
}

/// §3.4. One page of a sync response (or the body of a push request).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPayload {
    pub peer_id: String,
    pub sync_id: String,
    pub timestamp: DateTime<Utc>,
    pub entities: Vec<Value>,
    pub edges: Vec<Value>,
    pub deletions: Vec<String>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub content_hash: String,
    pub signature: String,
    pub nonce: Option<u64>,
}

impl SyncPayload {
    /// The canonicalized body fields that `content_hash` is computed over
    /// (everything except the hash and signature themselves).
    pub fn body_value(&self) -> Value {
        serde_json::json!({
            "peer_id": self.peer_id,
            "sync_id": self.sync_id,
            "timestamp": self.timestamp,
            "entities": self.entities,
            "edges": self.edges,
            "deletions": self.deletions,
            "has_more": self.has_more,
            "next_cursor": self.next_cursor,
        })
    }

    /// Bytes the signature covers per §4.7: `(peer_id, sync_id, timestamp,
    /// content_hash, nonce)`.
    pub fn signing_payload(&self) -> Vec<u8> {
        format!(
            "{}:{}:{}:{}:{}",
            self.peer_id,
            self.sync_id,
            self.timestamp.timestamp(),
            self.content_hash,
            self.nonce.unwrap_or(0)
        )
        .into_bytes()
    }
}

/// §6. Every body crossing `SyncTransport` is wrapped in one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Value,
    pub signature: String,
    pub public_key: String,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
}

/// The unsigned request body for `POST /federation/sync-request` (§6).
/// `cursor` supplements the table's `{since, capsule_types?, limit}`
/// description to carry a paginated response's `next_cursor` back to the
/// responder (§4.7 "Pagination").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub since: Option<DateTime<Utc>>,
    pub capsule_types: Option<Vec<String>>,
    pub limit: u32,
    pub cursor: Option<String>,
}

//! Collaborator traits (§10.5).
//!
//! The graph database, the federation HTTP transport, and the Redis client
//! are declared out of scope as products (§1, §6), but the resilience and
//! federation logic still needs typed seams to depend on them abstractly so
//! it can be exercised without a live database, network, or cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

/// Abstraction over the graph database driver.
///
/// Modeled per-operation (rather than as raw query strings) the way the
/// reference workspace types its storage traits, so a test double can assert
/// on intent instead of parsing Cypher.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fetch a capsule's current record by id, if it exists.
    async fn get_capsule(&self, id: &str) -> Result<Option<Value>, GraphStoreError>;

    /// Create or overwrite a capsule record.
    async fn upsert_capsule(&self, id: &str, record: Value) -> Result<(), GraphStoreError>;

    /// Create an edge between two local capsule ids.
    async fn create_edge(&self, source: &str, target: &str, kind: &str) -> Result<(), GraphStoreError>;

    /// Traverse lineage from `id` up to `depth` hops, returning capsule
    /// records in traversal order. Implementations MUST guard against cycles.
    async fn lineage(&self, id: &str, depth: u32) -> Result<Vec<Value>, GraphStoreError>;

    /// Point-in-time snapshot metrics (node/edge counts, last snapshot time).
    async fn snapshot_metrics(&self) -> Result<Value, GraphStoreError>;

    /// Local capsules modified since `since` (all of them, if `None`),
    /// restricted to `entity_types` (all types, if empty) and at least
    /// `min_trust_level`, newest-first, capped at `limit`. Backs the
    /// federation sync engine's push loop (§4.8): finding "what changed
    /// since we last talked to this peer" is necessarily a query the driver
    /// must support, even though the driver itself is out of scope as a
    /// product.
    async fn capsules_changed_since(
        &self,
        since: Option<DateTime<Utc>>,
        entity_types: &[String],
        min_trust_level: u8,
        limit: usize,
    ) -> Result<Vec<Value>, GraphStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GraphStoreError {
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("graph store query failed: {0}")]
    QueryFailed(String),
}

/// The three federation HTTP endpoints (§6), abstracted so the sync engine
/// and protocol layer can be driven against an in-memory double in tests.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn send_handshake(&self, peer_base_url: &str, envelope: Value) -> Result<Value, TransportError>;

    async fn send_sync_request(&self, peer_base_url: &str, envelope: Value) -> Result<Value, TransportError>;

    async fn send_sync_push(&self, peer_base_url: &str, envelope: Value) -> Result<Value, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to peer failed: {0}")]
    ConnectionFailed(String),
    #[error("request to peer timed out")]
    Timeout,
    #[error("peer responded with an error: {0}")]
    PeerError(String),
}

/// Capability set shared by every pluggable storage backend in §9: a cache, a
/// nonce store, and a session cache are all "get / set-with-ttl / delete /
/// optional scan" over byte strings. Implementations decide serialization;
/// callers are responsible for encoding/decoding their own values.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    /// Keys matching `prefix`. Not all backends support this efficiently;
    /// the in-memory backend always does, a Redis-shaped one uses `SCAN`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Remove every key matching `prefix`.
    async fn clear_prefix(&self, prefix: &str) -> Result<usize, KvError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend operation failed: {0}")]
    OperationFailed(String),
}

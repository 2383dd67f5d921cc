//! Error types for forge-federation, plus the cross-subsystem `ForgeError`
//! (§10.2) for callers that touch more than one crate in a single call (the
//! Sync Engine touches trust, protocol, and storage errors in one method).
//!
//! `ForgeError` lives here rather than in `forge-core`: `forge-core` is the
//! dependency every other crate builds on, so it cannot itself depend on
//! `forge-trust`/`forge-resilience`/`forge-cache`/`forge-session` without a
//! cycle. `forge-federation` is the crate that already depends on all of
//! them for the sync engine, so it is the one place the composition can be
//! written without restructuring the rest of the workspace (see DESIGN.md).

use forge_cache::CacheError;
use forge_nonce::NonceError;
use forge_resilience::{CircuitBreakerError, SchedulerError};
use forge_session::SessionError;
use forge_storage::StorageError;
use forge_trust::TrustError;
use thiserror::Error;

/// Failures in the signed handshake / sync-payload layer (§4.7).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("signature verification failed: {0}")]
    InvalidSignature(#[from] forge_crypto::CryptoError),

    #[error("envelope timestamp {timestamp} is outside the {tolerance_secs}s skew window")]
    TimestampOutOfWindow { timestamp: i64, tolerance_secs: i64 },

    #[error("nonce was replayed or did not advance: {0}")]
    NonceRejected(String),

    #[error("nonce store error: {0}")]
    Nonce(#[from] NonceError),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Failures raised by the Sync Engine (§4.8).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer '{0}' is not registered")]
    UnknownPeer(String),

    #[error("peer is not permitted to sync: {0}")]
    NotPermitted(String),

    #[error("transport error: {0}")]
    Transport(#[from] forge_core::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("graph store error: {0}")]
    GraphStore(#[from] forge_core::GraphStoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("sync attempt '{0}' not found")]
    UnknownSync(String),
}

/// Composition of every subsystem's error type, for call sites that cross
/// crate boundaries and would otherwise have to hand-wrap each one.
/// Includes `CircuitBreakerError` for callers that want one return type
/// across a breaker-guarded call and everything downstream of it; the
/// Scheduler itself matches on the concrete type before it ever reaches this
/// enum, since a circuit-open iteration is accounted as a non-failure rather
/// than propagated.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("trust manager error: {0}")]
    Trust(#[from] TrustError),

    #[error(transparent)]
    CircuitBreaker(#[from] CircuitBreakerError),

    #[error("nonce store error: {0}")]
    Nonce(#[from] NonceError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

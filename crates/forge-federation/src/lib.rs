//! The signed federation protocol and the sync engine that orchestrates
//! peer sync attempts (§4.7, §4.8).
//!
//! This crate sits above every other subsystem crate: it composes
//! `forge_trust`'s scoring, `forge_resilience`'s circuit breakers,
//! `forge_nonce`'s replay protection, `forge_storage`'s typed stores, and
//! `forge_crypto`'s signing into the one thing none of them can express
//! alone, a full peer-to-peer sync attempt. [`error::ForgeError`] is the
//! cross-subsystem error composition for callers working at that level.

pub mod conflict;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod wire;

pub use conflict::{has_conflict, resolve_conflict, ConflictCandidate, ConflictDecision, ConflictOutcome};
pub use engine::FederationSyncEngine;
pub use error::{ForgeError, ProtocolError, SyncError};
pub use protocol::{FederationProtocol, FederationProtocolConfig, DEFAULT_CLOCK_SKEW_SECONDS};
pub use wire::{Envelope, PeerHandshake, SyncPayload, SyncRequest};

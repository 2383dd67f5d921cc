//! Per-peer trust scoring, tier classification, and sync permission
//! derivation (§4.1).
//!
//! [`TrustManager`] is the process-wide authority for a peer's live trust
//! score and status; [`forge_storage::PeerStore`] persists the `Peer` rows
//! the manager reads and writes through. Callers own the read-modify-persist
//! cycle: load a `Peer`, pass it through a manager operation, persist the
//! mutated row.

pub mod error;
pub mod events;
pub mod manager;
pub mod stats;
pub mod tier;

pub use error::TrustError;
pub use events::{TrustEvent, TrustEventKind};
pub use manager::{TrustManager, DEFAULT_MAX_VERIFICATION_AGE_DAYS, MAX_CACHED_PEERS, MAX_EVENTS};
pub use stats::{FederationStats, TrustAdjustmentRecommendation};
pub use tier::{SyncPermissions, TrustTier};

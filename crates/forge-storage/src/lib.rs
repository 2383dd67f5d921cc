//! Structured persistence for peers, federated entity records, sync attempts,
//! and sessions (§3.1-§3.3, §3.9, §6 "Persisted state layout").
//!
//! Each record kind gets its own thin typed store ([`peer_store`],
//! [`federated_entity_store`], [`sync_state_store`], [`session_store`]) over
//! a single generic redb-backed table manager ([`tables::RedbStorage`]), the
//! way the reference workspace layers typed record stores over one storage
//! primitive rather than hand-rolling per-table open/commit boilerplate.

pub mod error;
pub mod federated_edge_store;
pub mod federated_entity_store;
pub mod model;
pub mod peer_store;
pub mod session_store;
pub mod sync_state_store;
pub mod tables;

pub use error::StorageError;
pub use federated_edge_store::FederatedEdgeStore;
pub use federated_entity_store::FederatedEntityStore;
pub use model::{
    ConflictPolicy, FederatedEdgeRecord, FederatedEntityRecord, FederatedSyncStatus, IpHistoryEntry, Peer,
    PeerStatus, Session, SessionStatus, SyncConflictRecord, SyncDirection, SyncPhase, SyncRunStatus, SyncState,
    INITIAL_TRUST,
};
pub use peer_store::PeerStore;
pub use session_store::SessionStore;
pub use sync_state_store::SyncStateStore;
pub use tables::{RedbStorage, RedbStorageConfig};

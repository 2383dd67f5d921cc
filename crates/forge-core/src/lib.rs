//! Shared foundation for the Forge resilience and federation core.
//!
//! This crate has no subsystem-specific logic of its own. It exists so that
//! `forge-trust`, `forge-resilience`, `forge-cache`, `forge-nonce`,
//! `forge-session`, `forge-storage`, and `forge-federation` share one
//! vocabulary for:
//!
//! - [`ids`]: stable identifiers (`PeerId`, `CapsuleId`, ...).
//! - [`clock`]: the [`clock::Clock`] abstraction used wherever a monotonic or
//!   wall-clock timestamp is needed.
//! - [`error`]: the cross-cutting [`error::ErrorKind`] classification and the
//!   handful of error shapes generic enough to share.
//! - [`config`]: [`config::ForgeConfig`], the recognized configuration
//!   surface.
//! - [`traits`]: the collaborator seams ([`traits::GraphStore`],
//!   [`traits::SyncTransport`], [`traits::KvBackend`]) for systems declared
//!   out of scope as products but still depended on abstractly.
//! - [`backend`]: the memory/Redis/tiered [`traits::KvBackend`]
//!   implementations shared by `forge-nonce`, `forge-cache`, and
//!   `forge-session`.

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod traits;

pub use backend::{MemoryKv, NonceCasOutcome, RedisKv, TieredKv};
pub use clock::{Clock, SystemClock};
pub use config::ForgeConfig;
pub use error::{ConfigError, ErrorKind, ValidationError};
pub use ids::{CapsuleId, EdgeId, PeerId, SessionId, SyncId, UserId};
pub use traits::{GraphStore, GraphStoreError, KvBackend, KvError, SyncTransport, TransportError};

//! Shared storage-backend implementations for the pluggable {GET,
//! SET-with-TTL, DELETE, SCAN} capability set (§9 "Inheritance and
//! polymorphism").
//!
//! `forge-nonce`, `forge-cache`, and `forge-session` each need a Redis-or-memory
//! backend with the same fallback shape: prefer Redis when configured, fall
//! through to an in-process map on connect failure or a runtime error. Rather
//! than reimplementing that tiering three times, the two concrete backends and
//! the tiering wrapper live here, and each subsystem crate only adds its own
//! key layout and domain semantics on top of [`traits::KvBackend`](crate::traits::KvBackend).

pub mod memory;
pub mod redis_backend;
pub mod tiered;

pub use memory::MemoryKv;
pub use redis_backend::{NonceCasOutcome, RedisKv};
pub use tiered::TieredKv;

//! The two-tier query cache and its entity-change invalidator (§4.4, §4.5).

pub mod error;
pub mod invalidator;
pub mod key;
pub mod store;

pub use error::CacheError;
pub use invalidator::{CacheInvalidator, ChangeKind, InvalidationStrategy, InvalidatorStats};
pub use key::{capsule_key, clamp_depth, lineage_key, sanitize_component, search_key};
pub use store::{lineage_ttl_heuristic, CacheConfigPatterns, QueryCache};

//! Error types for forge-cache.

use forge_core::KvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] KvError),

    #[error("value of {actual} bytes exceeds the {limit}-byte cache limit")]
    ValueTooLarge { actual: usize, limit: usize },

    #[error("failed to serialize cache value: {0}")]
    Serialization(#[from] serde_json::Error),
}

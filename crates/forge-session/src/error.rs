//! Error types for forge-session.

use forge_core::KvError;
use forge_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("session cache error: {0}")]
    Cache(#[from] KvError),
}

//! Error types for forge-nonce.

use forge_core::KvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NonceError {
    #[error("nonce backend error: {0}")]
    Backend(#[from] KvError),
}

//! Error types for forge-crypto.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("canonicalization failed: {0}")]
    CanonicalizationFailed(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

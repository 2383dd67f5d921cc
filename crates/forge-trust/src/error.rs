//! Error types for forge-trust.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("adjustment delta must be finite, got {0}")]
    InvalidAdjustment(f64),
}

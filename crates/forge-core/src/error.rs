//! Error kinds shared by every subsystem.
//!
//! Each subsystem crate (`forge-trust`, `forge-resilience`, ...) defines its
//! own `thiserror::Error` enum for the failures native to that module; this
//! module holds only the classification that cuts across all of them (the
//! "Kinds" table from the error-handling design) and the handful of error
//! shapes generic enough to be shared verbatim (config and validation).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cross-cutting error classification. Used for structured log fields and
/// metrics tagging; not a replacement for each crate's concrete error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    CircuitOpen,
    TransportFailure,
    SignatureInvalid,
    TimestampOutOfWindow,
    NonceReplay,
    ConflictDetected,
    ValidationError,
    QuotaExceeded,
    PermissionDenied,
    AutoDisabled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::TransportFailure => "transport_failure",
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::TimestampOutOfWindow => "timestamp_out_of_window",
            ErrorKind::NonceReplay => "nonce_replay",
            ErrorKind::ConflictDetected => "conflict_detected",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::AutoDisabled => "auto_disabled",
        };
        write!(f, "{s}")
    }
}

/// Configuration problems detected at construction time: the one class of
/// error allowed to fail fast rather than degrade.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// A value was rejected by an operation-level validity check (malformed
/// entity/edge, oversized cache value, out-of-range depth, ...).
#[derive(Debug, Error)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

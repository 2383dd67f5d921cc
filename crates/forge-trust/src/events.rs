//! Trust event history (§4.1 "Recommendations", §5 bounded-memory ring buffer).

use chrono::{DateTime, Utc};
use forge_core::PeerId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustEventKind {
    Initialized,
    SuccessfulSync,
    FailedSync,
    ConflictResolved,
    ConflictUnresolved,
    ManualAdjustment,
    InactivityDecay,
    VerificationExpiredDecay,
    Revoked,
}

impl TrustEventKind {
    pub fn is_success(self) -> bool {
        matches!(self, TrustEventKind::SuccessfulSync)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TrustEventKind::FailedSync)
    }
}

/// One recorded mutation against a peer's trust score, used for
/// `get_trust_history` and the trailing-window heuristics in
/// `recommend_trust_adjustment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEvent {
    pub peer_id: PeerId,
    pub kind: TrustEventKind,
    pub delta: f64,
    pub resulting_score: f64,
    pub reason: Option<String>,
    pub by: Option<String>,
    pub at: DateTime<Utc>,
}

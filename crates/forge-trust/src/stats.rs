//! Aggregate federation-wide trust reporting and the adjustment heuristic
//! (§4.1 "Recommendations" and "Federation stats").

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use forge_storage::{Peer, PeerStatus};
use serde::{Deserialize, Serialize};

use crate::events::TrustEventKind;
use crate::manager::TrustManager;
use crate::tier::TrustTier;

const RECOMMENDATION_HISTORY_DEPTH: usize = 20;
const DOWNGRADE_FAILURE_THRESHOLD: usize = 3;
const UPGRADE_SUCCESS_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationStats {
    pub known_peers: usize,
    pub tier_counts: HashMap<String, usize>,
    pub status_counts: HashMap<String, usize>,
    pub mean_trust_score: f64,
    pub total_events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustAdjustmentRecommendation {
    pub delta: f64,
    pub reason: String,
}

impl TrustManager {
    /// Snapshot of the cached peer population, computed by scanning the
    /// in-memory cache; this never touches storage, so peers that were
    /// persisted but never passed through `initialize_peer` in this process
    /// are not counted.
    pub async fn get_federation_stats(&self) -> FederationStats {
        let mut tier_counts: HashMap<String, usize> = HashMap::new();
        let mut status_counts: HashMap<String, usize> = HashMap::new();
        let mut total_score = 0.0;
        let mut count = 0usize;

        for entry in self.states.iter() {
            let guard = entry.value().lock().await;
            let tier = TrustTier::for_score(guard.trust_score);
            *tier_counts.entry(format!("{tier:?}")).or_insert(0) += 1;
            *status_counts.entry(format!("{:?}", guard.status)).or_insert(0) += 1;
            total_score += guard.trust_score;
            count += 1;
        }

        let total_events = self.events.lock().await.len();

        FederationStats {
            known_peers: count,
            tier_counts,
            status_counts,
            mean_trust_score: if count == 0 { 0.0 } else { total_score / count as f64 },
            total_events,
        }
    }

    /// Mean trust score across all cached peers; `0.0` when none are known.
    pub async fn calculate_network_trust(&self) -> f64 {
        let mut total = 0.0;
        let mut count = 0usize;
        for entry in self.states.iter() {
            let guard = entry.value().lock().await;
            total += guard.trust_score;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Looks at the last [`RECOMMENDATION_HISTORY_DEPTH`] events for `peer`
    /// within the trailing week and suggests a manual adjustment when one
    /// direction dominates: three-plus failures with no successes suggests a
    /// downgrade, ten-plus successes with no failures (and a tier below
    /// Trusted) suggests an upgrade. Returns `None` when the signal is mixed
    /// or the history is too thin to act on.
    pub async fn recommend_trust_adjustment(&self, peer: &Peer, now: DateTime<Utc>) -> Option<TrustAdjustmentRecommendation> {
        let history = self.get_trust_history(&peer.id, RECOMMENDATION_HISTORY_DEPTH).await;
        let window_start = now - ChronoDuration::weeks(1);
        let recent: Vec<_> = history.into_iter().filter(|e| e.at >= window_start).collect();

        let successes = recent.iter().filter(|e| e.kind.is_success()).count();
        let failures = recent.iter().filter(|e| e.kind.is_failure()).count();

        if peer.status == PeerStatus::Revoked {
            return None;
        }

        if failures >= DOWNGRADE_FAILURE_THRESHOLD && successes == 0 {
            return Some(TrustAdjustmentRecommendation {
                delta: -0.10,
                reason: format!("{failures} failed syncs with no successes in the trailing week"),
            });
        }

        let tier = TrustTier::for_score(peer.trust_score);
        if successes >= UPGRADE_SUCCESS_THRESHOLD && failures == 0 && !matches!(tier, TrustTier::Trusted | TrustTier::Core) {
            return Some(TrustAdjustmentRecommendation {
                delta: 0.10,
                reason: format!("{successes} successful syncs with no failures in the trailing week"),
            });
        }

        None
    }
}

//! Trust tiers and the sync permissions they derive (§4.1 tier table).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustTier {
    Quarantine,
    Limited,
    Standard,
    Trusted,
    Core,
}

impl TrustTier {
    /// Classify a score in `[0.0, 1.0]` into its tier. Scores outside that
    /// range are clamped first so a transient out-of-range value (there
    /// shouldn't be one, per the invariant in §3.1) degrades gracefully
    /// instead of panicking.
    pub fn for_score(score: f64) -> Self {
        let score = score.clamp(0.0, 1.0);
        if score < 0.2 {
            TrustTier::Quarantine
        } else if score < 0.4 {
            TrustTier::Limited
        } else if score < 0.6 {
            TrustTier::Standard
        } else if score < 0.8 {
            TrustTier::Trusted
        } else {
            TrustTier::Core
        }
    }
}

/// The full permissions row for a tier (§4.1 table), returned verbatim by
/// `TrustManager::get_sync_permissions`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncPermissions {
    pub tier: TrustTier,
    pub can_pull: bool,
    pub can_push: bool,
    pub requires_review: bool,
    pub auto_accept: bool,
    pub rate_limit_multiplier: f64,
    pub max_entities_per_sync: u32,
}

impl SyncPermissions {
    pub fn for_tier(tier: TrustTier) -> Self {
        match tier {
            TrustTier::Quarantine => SyncPermissions {
                tier,
                can_pull: false,
                can_push: false,
                requires_review: false,
                auto_accept: false,
                rate_limit_multiplier: 1.0,
                max_entities_per_sync: 0,
            },
            TrustTier::Limited => SyncPermissions {
                tier,
                can_pull: true,
                can_push: false,
                requires_review: true,
                auto_accept: false,
                rate_limit_multiplier: 1.0,
                max_entities_per_sync: 50,
            },
            TrustTier::Standard => SyncPermissions {
                tier,
                can_pull: true,
                can_push: true,
                requires_review: false,
                auto_accept: false,
                rate_limit_multiplier: 1.0,
                max_entities_per_sync: 200,
            },
            TrustTier::Trusted => SyncPermissions {
                tier,
                can_pull: true,
                can_push: true,
                requires_review: false,
                auto_accept: false,
                rate_limit_multiplier: 2.0,
                max_entities_per_sync: 500,
            },
            TrustTier::Core => SyncPermissions {
                tier,
                can_pull: true,
                can_push: true,
                requires_review: false,
                auto_accept: true,
                rate_limit_multiplier: 5.0,
                max_entities_per_sync: 1000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_match_the_table() {
        assert_eq!(TrustTier::for_score(0.0), TrustTier::Quarantine);
        assert_eq!(TrustTier::for_score(0.19), TrustTier::Quarantine);
        assert_eq!(TrustTier::for_score(0.2), TrustTier::Limited);
        assert_eq!(TrustTier::for_score(0.39), TrustTier::Limited);
        assert_eq!(TrustTier::for_score(0.4), TrustTier::Standard);
        assert_eq!(TrustTier::for_score(0.59), TrustTier::Standard);
        assert_eq!(TrustTier::for_score(0.6), TrustTier::Trusted);
        assert_eq!(TrustTier::for_score(0.79), TrustTier::Trusted);
        assert_eq!(TrustTier::for_score(0.8), TrustTier::Core);
        assert_eq!(TrustTier::for_score(1.0), TrustTier::Core);
    }

    #[test]
    fn core_tier_permits_auto_accept() {
        let perms = SyncPermissions::for_tier(TrustTier::Core);
        assert!(perms.auto_accept);
        assert_eq!(perms.max_entities_per_sync, 1000);
    }

    #[test]
    fn quarantine_tier_permits_nothing() {
        let perms = SyncPermissions::for_tier(TrustTier::Quarantine);
        assert!(!perms.can_pull);
        assert!(!perms.can_push);
        assert_eq!(perms.max_entities_per_sync, 0);
    }
}

//! Conflict detection and resolution (§4.8 "Conflict detection" / "Resolution
//! policies").

use chrono::{DateTime, Utc};
use forge_storage::ConflictPolicy;
use serde_json::Value;

/// What a resolution decided should happen to the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    Update,
    Skip,
}

/// The inputs a resolution policy needs: both sides' trust level, both
/// sides' last-known update time, and both sides' content (for MERGE).
#[derive(Debug, Clone)]
pub struct ConflictCandidate {
    pub local_trust_level: Option<u8>,
    pub remote_trust_level: Option<u8>,
    pub local_updated_at: Option<DateTime<Utc>>,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub local_content: Value,
    pub remote_content: Value,
    pub local_tags: Vec<String>,
    pub remote_tags: Vec<String>,
}

/// Result of applying a policy: what to do, the resolution label recorded
/// on the `SyncConflictRecord` for audit, and (MERGE only) the content that
/// should replace the local record if `outcome` is `Update`.
#[derive(Debug, Clone)]
pub struct ConflictDecision {
    pub outcome: ConflictOutcome,
    pub resolution: String,
    pub resolved_content: Option<Value>,
}

/// A conflict exists iff both sides have changed since the last successful
/// sync of this entity (§4.8 "Conflict detection").
pub fn has_conflict(local_content_hash: &str, fed_record_local_hash: Option<&str>, remote_content_hash: &str, fed_record_remote_hash: Option<&str>) -> bool {
    let local_changed = fed_record_local_hash != Some(local_content_hash);
    let remote_changed = fed_record_remote_hash != Some(remote_content_hash);
    local_changed && remote_changed
}

/// Apply `policy` to `candidate`, returning what should happen locally.
pub fn resolve_conflict(policy: ConflictPolicy, candidate: &ConflictCandidate) -> ConflictDecision {
    match policy {
        ConflictPolicy::LocalWins => ConflictDecision { outcome: ConflictOutcome::Skip, resolution: "local_wins".to_string(), resolved_content: None },
        ConflictPolicy::RemoteWins => ConflictDecision {
            outcome: ConflictOutcome::Update,
            resolution: "remote_wins".to_string(),
            resolved_content: Some(candidate.remote_content.clone()),
        },
        ConflictPolicy::HigherTrust => {
            let local = candidate.local_trust_level.unwrap_or(0);
            let remote = candidate.remote_trust_level.unwrap_or(0);
            if remote > local {
                ConflictDecision { outcome: ConflictOutcome::Update, resolution: "remote_higher_trust".to_string(), resolved_content: Some(candidate.remote_content.clone()) }
            } else {
                ConflictDecision { outcome: ConflictOutcome::Skip, resolution: "local_higher_or_tied_trust".to_string(), resolved_content: None }
            }
        }
        ConflictPolicy::NewerTimestamp => match (candidate.local_updated_at, candidate.remote_updated_at) {
            (Some(local), Some(remote)) if remote > local => ConflictDecision {
                outcome: ConflictOutcome::Update,
                resolution: "remote_newer_timestamp".to_string(),
                resolved_content: Some(candidate.remote_content.clone()),
            },
            _ => ConflictDecision { outcome: ConflictOutcome::Skip, resolution: "local_newer_or_tied_timestamp".to_string(), resolved_content: None },
        },
        ConflictPolicy::Merge => {
            let merged_content = if candidate.remote_updated_at > candidate.local_updated_at { candidate.remote_content.clone() } else { candidate.local_content.clone() };
            let merged_trust = candidate.local_trust_level.unwrap_or(0).max(candidate.remote_trust_level.unwrap_or(0));
            let mut merged = merged_content;
            if let Some(obj) = merged.as_object_mut() {
                let mut tags: Vec<String> = candidate.local_tags.iter().chain(candidate.remote_tags.iter()).cloned().collect();
                tags.sort();
                tags.dedup();
                obj.insert("tags".to_string(), serde_json::json!(tags));
                obj.insert("trust_level".to_string(), serde_json::json!(merged_trust));
            }
            ConflictDecision { outcome: ConflictOutcome::Update, resolution: "merged".to_string(), resolved_content: Some(merged) }
        }
        ConflictPolicy::ManualReview => ConflictDecision { outcome: ConflictOutcome::Skip, resolution: "manual_review_pending".to_string(), resolved_content: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate() -> ConflictCandidate {
        ConflictCandidate {
            local_trust_level: Some(50),
            remote_trust_level: Some(80),
            local_updated_at: Some(Utc::now() - chrono::Duration::hours(1)),
            remote_updated_at: Some(Utc::now()),
            local_content: json!({"title": "local"}),
            remote_content: json!({"title": "remote"}),
            local_tags: vec!["a".to_string()],
            remote_tags: vec!["b".to_string()],
        }
    }

    #[test]
    fn has_conflict_requires_both_sides_changed() {
        assert!(has_conflict("new-local", Some("old-local"), "new-remote", Some("old-remote")));
        assert!(!has_conflict("same", Some("same"), "new-remote", Some("old-remote")));
        assert!(!has_conflict("new-local", Some("old-local"), "same", Some("same")));
    }

    #[test]
    fn higher_trust_picks_remote_when_remote_wins() {
        let decision = resolve_conflict(ConflictPolicy::HigherTrust, &candidate());
        assert_eq!(decision.outcome, ConflictOutcome::Update);
        assert_eq!(decision.resolution, "remote_higher_trust");
    }

    #[test]
    fn higher_trust_ties_go_local() {
        let mut c = candidate();
        c.remote_trust_level = Some(50);
        let decision = resolve_conflict(ConflictPolicy::HigherTrust, &c);
        assert_eq!(decision.outcome, ConflictOutcome::Skip);
        assert_eq!(decision.resolution, "local_higher_or_tied_trust");
    }

    #[test]
    fn newer_timestamp_missing_data_goes_local() {
        let mut c = candidate();
        c.local_updated_at = None;
        c.remote_updated_at = None;
        let decision = resolve_conflict(ConflictPolicy::NewerTimestamp, &c);
        assert_eq!(decision.outcome, ConflictOutcome::Skip);
    }

    #[test]
    fn merge_unions_tags_and_takes_higher_trust() {
        let decision = resolve_conflict(ConflictPolicy::Merge, &candidate());
        assert_eq!(decision.outcome, ConflictOutcome::Update);
        let content = decision.resolved_content.unwrap();
        let tags = content.get("tags").unwrap().as_array().unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(content.get("trust_level").unwrap(), &json!(80));
    }

    #[test]
    fn manual_review_never_touches_local() {
        let decision = resolve_conflict(ConflictPolicy::ManualReview, &candidate());
        assert_eq!(decision.outcome, ConflictOutcome::Skip);
        assert!(decision.resolved_content.is_none());
    }
}

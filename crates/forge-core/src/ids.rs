//! Stable identifiers shared across the federation and resilience subsystems.
//!
//! All ids are newtypes over `String` rather than raw strings so that the
//! type system keeps a `PeerId` from being passed where a `CapsuleId` is
//! expected. Wire formats use the same representation, so these round-trip
//! through `serde` without a custom (de)serializer.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(PeerId, "Stable identifier of a remote Forge instance.");
string_id!(CapsuleId, "Identifier of a knowledge-graph entity (capsule), local or remote.");
string_id!(EdgeId, "Identifier of a local edge materialized from a federated edge record.");
string_id!(SyncId, "Identifier of one sync attempt, scoped to a peer.");
string_id!(SessionId, "Session id, equal to the token JTI.");
string_id!(UserId, "Identifier of the local user a session belongs to.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let id = PeerId::from("peer-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"peer-1\"");
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn displays_as_inner_string() {
        let id = CapsuleId::from("r1".to_string());
        assert_eq!(id.to_string(), "r1");
        assert_eq!(id.as_str(), "r1");
    }
}

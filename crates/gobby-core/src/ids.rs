//! Typed identifiers.
//!
//! All internal ids are UUID v4 under the hood; the newtypes keep a
//! session id from ever being passed where a task id is expected. The
//! CLI-supplied *external* id is deliberately left as a plain `String` —
//! it is opaque, unique only per `(source, machine)`, and never minted by
//! us.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Internal session id, assigned at first registration. Stable forever.
    SessionId
);

define_id!(
    /// Task id. A per-project `seq_num` and dotted `path_cache` are kept
    /// alongside for human reference.
    TaskId
);

define_id!(
    /// Project id. The reserved projects `_personal`, `_orphaned` and
    /// `_migrated` are addressed by name, not by this type.
    ProjectId
);

define_id!(
    /// Worktree row id.
    WorktreeId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_types() {
        let s = SessionId::new();
        let t = TaskId::new();
        assert_ne!(s.to_string(), t.to_string());
    }

    #[test]
    fn test_round_trip_parse() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_serde_transparent() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_invalid_parse_fails() {
        assert!("not-a-uuid".parse::<ProjectId>().is_err());
    }
}

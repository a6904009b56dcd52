use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Row identities are assigned by the backend (UUID primary keys). Each
/// table gets its own newtype so a step id can never be matched against a
/// task by accident.
macro_rules! row_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fresh random identity, for backends that assign ids client-side.
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
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
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

row_id!(TaskId);
row_id!(StepId);
row_id!(ThoughtId);
row_id!(ActivityId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn new_ids_parse_as_uuid() {
        let id = StepId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok(), "got: {id}");
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_is_transparent() {
        let id = ActivityId::from_raw("6f1c2a5e-0000-4000-8000-000000000001");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"6f1c2a5e-0000-4000-8000-000000000001\"");
        let parsed: ActivityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = ThoughtId::from_raw("custom-id-123");
        assert_eq!(id.as_str(), "custom-id-123");
    }
}

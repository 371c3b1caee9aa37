//! Identifier newtypes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declare a string-backed identifier assigned by the server.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifies a board
    BoardId
);
string_id!(
    /// Identifies a list (the parent of tasks)
    ListId
);
string_id!(
    /// Identifies a task on the board
    ItemId
);

/// Client-generated key for one move gesture.
///
/// Retries of the same move reuse the same intent id so the server can
/// recognise and replay them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(ulid::Ulid);

impl IntentId {
    /// Generate a fresh intent id
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Parse an intent id from its string form
    pub fn parse(s: &str) -> Option<Self> {
        ulid::Ulid::from_string(s).ok().map(Self)
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_serializes_transparently() {
        let id = ItemId::from_string("task-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"task-1\"");
        let back: ItemId = serde_json::from_str("\"task-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_intent_ids_are_unique_and_parse() {
        let a = IntentId::new();
        let b = IntentId::new();
        assert_ne!(a, b);
        assert_eq!(IntentId::parse(&a.to_string()), Some(a));
        assert_eq!(IntentId::parse("not-a-ulid"), None);
    }
}

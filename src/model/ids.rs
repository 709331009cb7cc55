//! Opaque identifiers for users, texts, and tags

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random id (UUID-based)
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wrap an existing id string
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
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

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
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
    };
}

string_id!(
    /// Owner of a collection. Every persisted row belongs to exactly one user.
    UserId
);

string_id!(
    /// Identifier of a text in a user's collection
    TextId
);

string_id!(
    /// Identifier of a tag in a user's glossary
    TagId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(TextId::new(), TextId::new());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = TagId::from_string("tag-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tag-1\"");
        let back: TagId = serde_json::from_str("\"tag-1\"").unwrap();
        assert_eq!(back, id);
    }
}

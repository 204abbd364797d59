//! Branded ID newtypes.
//!
//! Stored messages, scan sessions and scan tasks all carry string identifiers.
//! Wrapping each in its own newtype keeps a task id from being passed where a
//! session id is expected. Freshly minted IDs are UUID v7 (time-ordered).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new random ID (UUID v7).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a message held by the message store.
    MessageId
}

branded_id! {
    /// Identifier of a scan session (one user-triggered scan request).
    SessionId
}

branded_id! {
    /// Identifier of one scan task inside a session.
    TaskId
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn message_id_new_is_uuid_v7() {
        let id = MessageId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn minted_ids_are_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn session_id_from_str_and_display() {
        let id = SessionId::from("s1");
        assert_eq!(id.as_str(), "s1");
        assert_eq!(format!("{id}"), "s1");
    }

    #[test]
    fn borrow_allows_str_lookup() {
        let mut map: HashMap<TaskId, u32> = HashMap::new();
        let _ = map.insert(TaskId::from("t1"), 7);
        assert_eq!(map.get("t1"), Some(&7));
    }

    #[test]
    fn serde_is_transparent() {
        let id = TaskId::from("task-9");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"task-9\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

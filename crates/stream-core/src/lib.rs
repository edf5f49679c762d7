//! Stream core primitives: messages, headers and content types shared by
//! every processing stage.

#![deny(unsafe_code)]

pub mod message;
pub mod mime;

pub use headers::Headers;
pub use message::{Message, MessageBuilder, Payload};
pub use mime::{MimeError, MimeType};

pub mod ids {
    //! ID utilities: message ids and timestamps.

    use std::time::{SystemTime, UNIX_EPOCH};
    use uuid::Uuid;

    /// Milliseconds since UNIX epoch (for timestamps).
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Opaque message identifier (UUID v4 string).
    pub fn new_message_id() -> String {
        Uuid::new_v4().to_string()
    }

}

pub mod headers {
    //! Message headers: a string-to-string mapping with no ordering guarantee.

    use serde::{Deserialize, Serialize};
    use std::collections::hash_map;
    use std::collections::HashMap;

    /// Header carrying the payload content type (e.g. `application/json`).
    pub const CONTENT_TYPE: &str = "contentType";

    /// Header mapping attached to every [`crate::Message`].
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Headers(HashMap<String, String>);

    impl Headers {
        /// Empty header map.
        pub fn new() -> Self {
            Self::default()
        }

        /// Value by exact, case-sensitive name.
        pub fn get(&self, name: &str) -> Option<&str> {
            self.0.get(name).map(String::as_str)
        }

        /// Insert a header, returning the previous value for that name.
        pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
            self.0.insert(name.into(), value.into())
        }

        /// Remove a header, returning its value.
        pub fn remove(&mut self, name: &str) -> Option<String> {
            self.0.remove(name)
        }

        /// Whether a header with this name is present.
        pub fn contains_key(&self, name: &str) -> bool {
            self.0.contains_key(name)
        }

        /// Header names, in no particular order.
        pub fn keys(&self) -> impl Iterator<Item = &str> {
            self.0.keys().map(String::as_str)
        }

        /// `(name, value)` pairs, in no particular order.
        pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
            self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
        }

        /// Number of headers.
        pub fn len(&self) -> usize {
            self.0.len()
        }

        /// True when no headers are set.
        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        /// Merge `other` into `self`; entries of `other` win on collision.
        pub fn extend(&mut self, other: Headers) {
            self.0.extend(other.0);
        }
    }

    impl From<HashMap<String, String>> for Headers {
        fn from(map: HashMap<String, String>) -> Self {
            Self(map)
        }
    }

    impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
        fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
            Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
        }
    }

    impl IntoIterator for Headers {
        type Item = (String, String);
        type IntoIter = hash_map::IntoIter<String, String>;

        fn into_iter(self) -> Self::IntoIter {
            self.0.into_iter()
        }
    }

}

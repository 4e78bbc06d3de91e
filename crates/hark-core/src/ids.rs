//! Branded ID newtypes for type safety.
//!
//! Every entity in the bridge has a distinct ID type implemented as a newtype
//! wrapper around `String`, so a connection ID can never be passed where an
//! utterance ID is expected. Generated IDs are a short prefix plus a UUID v7
//! (time-ordered), which keeps log lines greppable by entity kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a prefixed UUID v7 string (time-ordered).
fn new_prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7())
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used by generated IDs of this type.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new random ID (`<prefix>_<uuid v7>`).
            #[must_use]
            pub fn new() -> Self {
                Self(new_prefixed($prefix))
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
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
    /// Unique identifier for one client connection on the ingress side.
    ConnectionId, "conn"
}

branded_id! {
    /// Unique identifier for one utterance (client Start to Stop).
    UtteranceId, "utt"
}

branded_id! {
    /// Unique identifier for one physical stream to the speech service.
    StreamId, "stream"
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

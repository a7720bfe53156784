//! NewType wrappers for strong typing throughout the authentication core.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a user id where a token is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the inner string is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Opaque authentication token (a.k.a. auth id).
    ///
    /// Identifies one authenticated session instance for one scheme. Tokens
    /// have no internal structure beyond uniqueness within their store.
    AuthToken
);

newtype_string!(
    /// Identifier of an authenticated user.
    ///
    /// Produced by a login provider (optionally transformed, e.g. digested)
    /// or configured statically for guest access.
    UserId
);

newtype_string!(
    /// Name of an authentication scheme.
    ///
    /// Authenticators are grouped by schema. The empty string is a valid
    /// schema and acts as the default one.
    SchemaName
);

impl AuthToken {
    /// Short, log-safe prefix of the token.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        format!("{}…", prefix)
    }
}

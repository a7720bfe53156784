//! Error types for the authentication core.
//!
//! Only misuse surfaces here. Unknown or expired tokens and schemas without
//! an applicable authenticator are ordinary outcomes and are reported through
//! `Option`/`bool` returns instead.

use std::fmt;

/// Errors that can occur in the authentication core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A token was inserted twice into the same store.
    ///
    /// Tokens come from a CSPRNG, so this signals a broken generator or a
    /// programming error rather than a condition worth retrying.
    DuplicateToken(String),

    /// The store has been shut down and no longer accepts tokens.
    StoreClosed,

    /// An authenticator or transformer was configured with invalid values.
    InvalidConfiguration(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateToken(prefix) => write!(f, "Duplicate authentication token: {}", prefix),
            Self::StoreClosed => write!(f, "Authentication store has been shut down"),
            Self::InvalidConfiguration(msg) => write!(f, "Invalid authentication configuration: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

/// Result type for authentication core operations.
pub type AuthResult<T> = Result<T, AuthError>;

//! Token records, expiry policy and token generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::alphabet::Alphabet;
use base64::engine::{GeneralPurpose, general_purpose};
use rand::rngs::{OsRng, StdRng};
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use tokio::time::Instant;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::session::UserSession;
use crate::types::{AuthToken, UserId};

/// Default number of random bytes in a token.
pub const DEFAULT_TOKEN_BYTE_COUNT: usize = 32;

/// Default idle timeout of a token (3 hours).
pub const DEFAULT_EXPIRATION_SECONDS: u64 = 3 * 60 * 60;

const URL_SAFE_SYMBOLS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Expiry policy of a token.
///
/// Expiry is a sliding idle timeout: every successful lookup resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Never expires (guest sessions).
    Never,
    /// Expires once idle for longer than the span.
    After(Duration),
}

impl Expiration {
    pub fn from_secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    /// Whether a token idle for `idle` is no longer valid.
    pub fn is_expired(&self, idle: Duration) -> bool {
        match self {
            Self::Never => false,
            Self::After(span) => idle > *span,
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Self::from_secs(DEFAULT_EXPIRATION_SECONDS)
    }
}

/// Monotonic clock of one store, in nanoseconds since the store was created.
///
/// Built on `tokio::time::Instant` so paused test runtimes control it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StoreClock {
    origin: Instant,
}

impl StoreClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub(crate) fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    pub(crate) fn instant(&self, nanos: u64) -> Instant {
        self.origin + Duration::from_nanos(nanos)
    }
}

/// Store-internal record of one live token.
pub(crate) struct TokenRecord {
    user_id: UserId,
    expiration: Expiration,
    /// Nanoseconds on the store clock; only ever moves forward.
    last_accessed: AtomicU64,
    session: Arc<UserSession>,
}

impl TokenRecord {
    pub(crate) fn new(
        user_id: UserId,
        expiration: Expiration,
        session: Arc<UserSession>,
        now: u64,
    ) -> Self {
        Self {
            user_id,
            expiration,
            last_accessed: AtomicU64::new(now),
            session,
        }
    }

    pub(crate) fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub(crate) fn session(&self) -> &Arc<UserSession> {
        &self.session
    }

    pub(crate) fn is_expired_at(&self, now: u64) -> bool {
        let last = self.last_accessed.load(Ordering::Acquire);
        self.expiration
            .is_expired(Duration::from_nanos(now.saturating_sub(last)))
    }

    /// Validate against a single read of the access time and, if still
    /// valid, slide it forward to `now`.
    pub(crate) fn try_touch(&self, now: u64) -> bool {
        if self.is_expired_at(now) {
            return false;
        }
        self.last_accessed.fetch_max(now, Ordering::AcqRel);
        true
    }

    pub(crate) fn info(&self, clock: &StoreClock) -> TokenInfo {
        TokenInfo {
            user_id: self.user_id.clone(),
            expiration: self.expiration,
            last_accessed: clock.instant(self.last_accessed.load(Ordering::Acquire)),
        }
    }
}

/// Snapshot of a token as returned by store lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub user_id: UserId,
    pub expiration: Expiration,
    pub last_accessed: Instant,
}

/// Build a no-padding base64 engine over the URL-safe symbols, shuffled
/// deterministically from `seed`.
///
/// The shuffle only obfuscates the rendering; token entropy comes solely
/// from the random bytes being encoded.
pub(crate) fn shuffled_engine(seed: i64) -> AuthResult<GeneralPurpose> {
    let mut symbols = URL_SAFE_SYMBOLS.to_vec();
    let mut rng = StdRng::seed_from_u64(seed as u64);
    symbols.shuffle(&mut rng);

    let symbols: String = symbols.into_iter().map(char::from).collect();
    let alphabet = Alphabet::new(&symbols)
        .map_err(|e| AuthError::InvalidConfiguration(format!("token alphabet: {}", e)))?;

    Ok(GeneralPurpose::new(&alphabet, general_purpose::NO_PAD))
}

/// Generates random tokens of a fixed byte length.
#[derive(Debug, Clone)]
pub struct TokenGenerator {
    byte_count: usize,
    engine: GeneralPurpose,
}

impl TokenGenerator {
    /// Create a generator; `byte_count` is clamped to at least 1.
    pub fn new(byte_count: usize, shuffle_seed: i64) -> AuthResult<Self> {
        Ok(Self {
            byte_count: byte_count.max(1),
            engine: shuffled_engine(shuffle_seed)?,
        })
    }

    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Generate a fresh token from the OS CSPRNG.
    pub fn generate(&self) -> AuthToken {
        let mut bytes = vec![0u8; self.byte_count];
        OsRng.fill_bytes(&mut bytes);
        AuthToken::new(self.encode(&bytes))
    }

    pub(crate) fn encode(&self, bytes: &[u8]) -> String {
        self.engine.encode(bytes)
    }
}

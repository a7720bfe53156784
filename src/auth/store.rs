//! In-memory authentication store.
//!
//! Maps opaque tokens to user sessions. Token lookups and refreshes run on a
//! sharded concurrent map and never touch the session lock; everything that
//! changes how many tokens a session has (issue, logout, expiry) is
//! serialized behind one mutex per store. A background task periodically
//! evicts idle tokens.
//!
//! ## Refresh vs. eviction
//!
//! A lookup validates and refreshes a token while holding that token's shard
//! read guard. Eviction goes through `DashMap::remove_if`, which re-evaluates
//! the expiry rule under the shard write guard. Either the refresh is visible
//! to that re-evaluation (the token survives) or the token was already gone
//! when the lookup ran (the lookup reports not-found).

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::session::UserSession;
use crate::auth::token::{Expiration, StoreClock, TokenInfo, TokenRecord};
use crate::types::{AuthToken, UserId};

/// Default period of the background sweep (1 minute).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest period the sweeper accepts; shorter requests are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a successful token lookup.
#[derive(Debug, Clone)]
pub struct AuthData {
    pub token: TokenInfo,
    pub session: Arc<UserSession>,
}

struct SessionEntry {
    session: Arc<UserSession>,
    tokens: HashSet<AuthToken>,
}

struct SessionTable {
    open: bool,
    users: HashMap<UserId, SessionEntry>,
}

impl SessionTable {
    /// Drop `token` from its user's set, ending the session when the set
    /// becomes empty. Shared by logout, lookup-time expiry and the sweeper.
    fn release_token(&mut self, token: &AuthToken, user_id: &UserId) {
        let now_empty = match self.users.get_mut(user_id) {
            Some(entry) => {
                entry.tokens.remove(token);
                entry.tokens.is_empty()
            }
            None => false,
        };

        if !now_empty {
            return;
        }
        if let Some(entry) = self.users.remove(user_id) {
            entry.session.dispose();
            debug!("Session ended for user '{}'", user_id);
        }
    }
}

/// Token and session storage for one authentication schema.
pub struct AuthStore {
    tokens: DashMap<AuthToken, TokenRecord>,
    sessions: Mutex<SessionTable>,
    clock: StoreClock,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AuthStore {
    /// Create a store without a background sweeper.
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            sessions: Mutex::new(SessionTable {
                open: true,
                users: HashMap::new(),
            }),
            clock: StoreClock::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a shared store and start its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_sweeper(interval: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new());
        store.spawn_sweeper(interval);
        store
    }

    /// Register `token` for `user_id`, creating the user's session if needed.
    ///
    /// Returns the (possibly pre-existing) session. Fails when the token is
    /// already present or the store has been shut down; in both cases the
    /// store is left untouched.
    pub fn add_auth_data(
        &self,
        token: AuthToken,
        user_id: UserId,
        expiration: Expiration,
    ) -> AuthResult<Arc<UserSession>> {
        let mut table = self.sessions.lock();
        if !table.open {
            return Err(AuthError::StoreClosed);
        }

        match self.tokens.entry(token.clone()) {
            Entry::Occupied(_) => Err(AuthError::DuplicateToken(token.redacted())),
            Entry::Vacant(vacant) => {
                let entry = table
                    .users
                    .entry(user_id.clone())
                    .or_insert_with(|| SessionEntry {
                        session: Arc::new(UserSession::new(user_id.clone())),
                        tokens: HashSet::new(),
                    });
                entry.tokens.insert(token.clone());
                let session = entry.session.clone();

                vacant.insert(TokenRecord::new(
                    user_id.clone(),
                    expiration,
                    session.clone(),
                    self.clock.now(),
                ));
                debug!("Issued token {} for user '{}'", token.redacted(), user_id);
                Ok(session)
            }
        }
    }

    /// Look up a token.
    ///
    /// A valid token has its idle timer reset. An expired token is removed
    /// as a side effect and reported as not found, exactly like an unknown
    /// one.
    pub fn try_get_auth_data(&self, token: &str) -> Option<AuthData> {
        if token.is_empty() {
            return None;
        }

        let now = self.clock.now();
        let found = {
            let record = self.tokens.get(token)?;
            record.try_touch(now).then(|| AuthData {
                token: record.info(&self.clock),
                session: record.session().clone(),
            })
        };

        if found.is_none() {
            self.evict_if_expired(token);
        }
        found
    }

    /// Remove a token, ending its session if it was the last one.
    ///
    /// Unknown tokens are ignored; returns whether anything was removed.
    pub fn remove_auth_data(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }

        let mut table = self.sessions.lock();
        match self.tokens.remove(token) {
            Some((token, record)) => {
                table.release_token(&token, record.user_id());
                true
            }
            None => false,
        }
    }

    /// Evict every expired token; returns how many were evicted.
    pub fn sweep_expired(&self) -> usize {
        let candidates = self.expired_candidates();
        if candidates.is_empty() {
            return 0;
        }
        self.evict_expired(candidates)
    }

    /// Start the periodic sweep, replacing any previous sweeper.
    ///
    /// The task holds only a weak reference and stops once the store is
    /// dropped. A panicking pass is logged and the next tick runs normally.
    /// `interval` is raised to at least [`MIN_SWEEP_INTERVAL`].
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let store = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.run_sweep_pass();
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the sweeper, end every session and drop every token.
    ///
    /// This is a cache, so nothing is flushed. Sessions still held by callers
    /// are disposed right away. Later insertions fail with
    /// [`AuthError::StoreClosed`].
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }

        let mut table = self.sessions.lock();
        table.open = false;
        for (_, entry) in table.users.drain() {
            entry.session.dispose();
        }
        self.tokens.clear();
        debug!("Authentication store shut down");
    }

    /// Number of live tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().users.len()
    }

    /// The live session of a user, if any.
    pub fn session(&self, user_id: &str) -> Option<Arc<UserSession>> {
        self.sessions
            .lock()
            .users
            .get(user_id)
            .map(|entry| entry.session.clone())
    }

    /// Tokens currently held by a user, in no particular order.
    pub fn tokens_for(&self, user_id: &str) -> Vec<AuthToken> {
        self.sessions
            .lock()
            .users
            .get(user_id)
            .map(|entry| entry.tokens.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn run_sweep_pass(&self) -> usize {
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.sweep_expired())) {
            Ok(evicted) => {
                if evicted > 0 {
                    debug!("Token sweep evicted {} expired token(s)", evicted);
                }
                evicted
            }
            Err(_) => {
                error!("Token sweep panicked; retrying on the next tick");
                0
            }
        }
    }

    fn expired_candidates(&self) -> Vec<AuthToken> {
        let now = self.clock.now();
        self.tokens
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn evict_expired(&self, candidates: Vec<AuthToken>) -> usize {
        let mut table = self.sessions.lock();
        let mut evicted = 0;
        for candidate in candidates {
            let removed = self
                .tokens
                .remove_if(&candidate, |_, record| record.is_expired_at(self.clock.now()));
            if let Some((token, record)) = removed {
                table.release_token(&token, record.user_id());
                evicted += 1;
            }
        }
        evicted
    }

    fn evict_if_expired(&self, token: &str) {
        let mut table = self.sessions.lock();
        let removed = self
            .tokens
            .remove_if(token, |_, record| record.is_expired_at(self.clock.now()));
        if let Some((token, record)) = removed {
            table.release_token(&token, record.user_id());
        }
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AuthStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore")
            .field("tokens", &self.token_count())
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user_data::UserData;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn token(value: &str) -> AuthToken {
        AuthToken::new(value)
    }

    fn user(value: &str) -> UserId {
        UserId::new(value)
    }

    struct Tracked(Arc<AtomicUsize>);

    impl UserData for Tracked {
        fn dispose(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Explosive;

    impl UserData for Explosive {
        fn dispose(&self) {
            panic!("dispose failed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_after_add() {
        let store = AuthStore::new();
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::from_secs(10))
            .unwrap();

        let data = store.try_get_auth_data("t1").unwrap();
        assert_eq!(data.token.user_id.as_str(), "alice");
        assert_eq!(data.session.id().as_str(), "alice");
        assert_eq!(data.token.expiration, Expiration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_empty_tokens_not_found() {
        let store = AuthStore::new();
        assert!(store.try_get_auth_data("nope").is_none());
        assert!(store.try_get_auth_data("").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_expiry() {
        let store = AuthStore::new();
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::from_secs(10))
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.try_get_auth_data("t1").is_some());

        // 12s since issue, but only 6s since the last lookup.
        tokio::time::advance(Duration::from_secs(6)).await;
        let data = store.try_get_auth_data("t1").unwrap();
        assert_eq!(data.token.last_accessed, Instant::now());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.try_get_auth_data("t1").is_none());

        // The expired token was removed as a side effect.
        assert_eq!(store.token_count(), 0);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_expiring_token() {
        let store = AuthStore::new();
        store
            .add_auth_data(token("guest"), user("guest"), Expiration::Never)
            .unwrap();

        tokio::time::advance(Duration::from_secs(10 * 365 * 24 * 60 * 60)).await;
        assert!(store.try_get_auth_data("guest").is_some());
        assert_eq!(store.sweep_expired(), 0);
        assert!(store.try_get_auth_data("guest").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_token_rejected() {
        let store = AuthStore::new();
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::Never)
            .unwrap();

        let err = store
            .add_auth_data(token("t1"), user("bob"), Expiration::Never)
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateToken(_)));

        // No session was created for bob and alice is untouched.
        assert_eq!(store.session_count(), 1);
        assert!(store.session("bob").is_none());
        assert_eq!(
            store.try_get_auth_data("t1").unwrap().session.id().as_str(),
            "alice"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_is_idempotent() {
        let store = AuthStore::new();
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::Never)
            .unwrap();

        assert!(store.remove_auth_data("t1"));
        assert!(!store.remove_auth_data("t1"));
        assert!(!store.remove_auth_data("never-issued"));
        assert!(!store.remove_auth_data(""));
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reference_counting() {
        let store = AuthStore::new();
        let disposals = Arc::new(AtomicUsize::new(0));

        let s1 = store
            .add_auth_data(token("t1"), user("alice"), Expiration::Never)
            .unwrap();
        let s2 = store
            .add_auth_data(token("t2"), user("alice"), Expiration::Never)
            .unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(store.tokens_for("alice").len(), 2);

        let d = disposals.clone();
        s1.get_or_add_user_data("tracked", move |_| Tracked(d))
            .unwrap();

        store.remove_auth_data("t1");
        assert!(!s1.is_disposed());
        assert_eq!(store.session_count(), 1);
        assert!(store.try_get_auth_data("t2").is_some());
        assert_eq!(disposals.load(Ordering::SeqCst), 0);

        store.remove_auth_data("t2");
        assert!(s1.is_disposed());
        assert_eq!(store.session_count(), 0);
        assert_eq!(disposals.load(Ordering::SeqCst), 1);

        drop(s1);
        drop(s2);
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_expired() {
        let store = AuthStore::new();
        let disposals = Arc::new(AtomicUsize::new(0));

        let short = store
            .add_auth_data(token("short"), user("alice"), Expiration::from_secs(5))
            .unwrap();
        let d = disposals.clone();
        short.get_or_add_user_data("tracked", move |_| Tracked(d));
        store
            .add_auth_data(token("long"), user("bob"), Expiration::from_secs(60))
            .unwrap();
        store
            .add_auth_data(token("forever"), user("carol"), Expiration::Never)
            .unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.sweep_expired(), 1);

        assert!(short.is_disposed());
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(store.session("alice").is_none());
        assert!(store.try_get_auth_data("long").is_some());
        assert!(store.try_get_auth_data("forever").is_some());
        assert_eq!(store.sweep_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_session_with_remaining_tokens() {
        let store = AuthStore::new();
        store
            .add_auth_data(token("old"), user("alice"), Expiration::from_secs(5))
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        store
            .add_auth_data(token("new"), user("alice"), Expiration::from_secs(5))
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.sweep_expired(), 1);

        let session = store.session("alice").unwrap();
        assert!(!session.is_disposed());
        assert_eq!(store.tokens_for("alice"), vec![token("new")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_between_scan_and_eviction_survives() {
        let store = AuthStore::new();
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::from_secs(10))
            .unwrap();

        tokio::time::advance(Duration::from_millis(9_999)).await;
        // A lookup samples the clock while the token is still valid...
        let lookup_now = store.clock.now();

        tokio::time::advance(Duration::from_millis(2)).await;
        // ...the sweep scans and sees the token as idle for too long...
        let candidates = store.expired_candidates();
        assert_eq!(candidates, vec![token("t1")]);

        // ...the delayed lookup completes its refresh...
        assert!(store.tokens.get("t1").unwrap().try_touch(lookup_now));

        // ...and the eviction re-check honours it.
        assert_eq!(store.evict_expired(candidates), 0);
        assert!(store.try_get_auth_data("t1").is_some());
    }

    #[test]
    fn test_idle_tokens_reaped_under_lookup_load() {
        let store = AuthStore::new();
        let hot: Vec<AuthToken> = (0..32).map(|i| token(&format!("hot-{}", i))).collect();
        let idle: Vec<AuthToken> = (0..32).map(|i| token(&format!("idle-{}", i))).collect();

        for (i, t) in hot.iter().enumerate() {
            store
                .add_auth_data(t.clone(), user(&format!("hot-user-{}", i % 4)), Expiration::from_secs(5))
                .unwrap();
        }
        for (i, t) in idle.iter().enumerate() {
            store
                .add_auth_data(t.clone(), user(&format!("idle-user-{}", i % 4)), Expiration::After(Duration::from_micros(1)))
                .unwrap();
        }

        let stop = AtomicBool::new(false);
        let lost = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        for t in &hot {
                            if store.try_get_auth_data(t.as_str()).is_none() {
                                lost.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..500 {
                    store.sweep_expired();
                    std::thread::yield_now();
                }
                stop.store(true, Ordering::Relaxed);
            });
        });

        assert_eq!(lost.load(Ordering::SeqCst), 0);
        assert_eq!(store.token_count(), hot.len());
        assert_eq!(store.session_count(), 4);
        for i in 0..4 {
            assert!(store.session(&format!("idle-user-{}", i)).is_none());
        }
    }

    /// Tokens whose span is close to the lookup cadence keep flipping between
    /// live and expired while sweeps and lookups race over them. Afterwards
    /// the token map and the session table must still agree.
    #[test]
    fn test_refresh_racing_sweeps_keeps_bookkeeping_consistent() {
        let store = AuthStore::new();
        let warm: Vec<AuthToken> = (0..16).map(|i| token(&format!("warm-{}", i))).collect();
        for (i, t) in warm.iter().enumerate() {
            store
                .add_auth_data(t.clone(), user(&format!("warm-user-{}", i % 4)), Expiration::After(Duration::from_micros(50)))
                .unwrap();
        }

        std::thread::scope(|scope| {
            for _ in 0..3 {
                scope.spawn(|| {
                    for _ in 0..2_000 {
                        for t in &warm {
                            store.try_get_auth_data(t.as_str());
                        }
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..2_000 {
                    store.sweep_expired();
                    std::thread::yield_now();
                }
            });
        });

        {
            let table = store.sessions.lock();
            let mut owned = 0;
            for (user_id, entry) in &table.users {
                assert!(!entry.tokens.is_empty(), "empty session for {}", user_id);
                assert!(!entry.session.is_disposed());
                for t in &entry.tokens {
                    let record = store.tokens.get(t).unwrap();
                    assert_eq!(record.user_id(), user_id);
                    assert!(Arc::ptr_eq(record.session(), &entry.session));
                }
                owned += entry.tokens.len();
            }
            assert_eq!(owned, store.tokens.len());
        }

        std::thread::sleep(Duration::from_millis(1));
        store.sweep_expired();
        assert_eq!(store.token_count(), 0);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_evicts() {
        let store = AuthStore::with_sweeper(Duration::from_secs(60));
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::from_secs(30))
            .unwrap();
        store
            .add_auth_data(token("g"), user("guest"), Expiration::Never)
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.token_count(), 1);
        assert!(store.session("alice").is_none());
        assert!(store.session("guest").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_survives_panicking_dispose() {
        let store = AuthStore::with_sweeper(Duration::from_secs(60));
        let bad = store
            .add_auth_data(token("bad"), user("mallory"), Expiration::from_secs(1))
            .unwrap();
        bad.get_or_add_user_data("boom", |_| Explosive).unwrap();
        store
            .add_auth_data(token("ok"), user("alice"), Expiration::from_secs(1))
            .unwrap();

        // The panicking disposal is contained; both sessions still end.
        tokio::time::sleep(Duration::from_secs(121)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.token_count(), 0);
        assert_eq!(store.session_count(), 0);

        // The sweeper is still alive.
        store
            .add_auth_data(token("later"), user("alice"), Expiration::from_secs(1))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(store.token_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sweep_interval_is_raised_to_minimum() {
        let store = AuthStore::with_sweeper(Duration::ZERO);
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::from_secs(1))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.token_count(), 0);
        let finished = store
            .sweeper
            .lock()
            .as_ref()
            .map(|handle| handle.is_finished());
        assert_eq!(finished, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_disposes_held_sessions() {
        let store = AuthStore::new();
        let disposals = Arc::new(AtomicUsize::new(0));
        let session = store
            .add_auth_data(token("t1"), user("alice"), Expiration::Never)
            .unwrap();
        session
            .get_or_add_user_data("tracked", |_| Tracked(disposals.clone()))
            .unwrap();

        store.shutdown();

        assert!(session.is_disposed());
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(
            session
                .get_or_add_user_data("tracked", |_| Tracked(disposals.clone()))
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_and_closes() {
        let store = AuthStore::with_sweeper(Duration::from_secs(60));
        store
            .add_auth_data(token("t1"), user("alice"), Expiration::Never)
            .unwrap();

        store.shutdown();

        assert_eq!(store.token_count(), 0);
        assert_eq!(store.session_count(), 0);
        assert!(store.try_get_auth_data("t1").is_none());
        assert_eq!(
            store
                .add_auth_data(token("t2"), user("alice"), Expiration::Never)
                .unwrap_err(),
            AuthError::StoreClosed
        );
    }
}

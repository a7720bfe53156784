//! User session handed out by the authentication store.

use std::sync::Arc;

use crate::auth::user_data::{UserData, UserDataCache};
use crate::types::UserId;

/// One authenticated user as seen by request handlers.
///
/// A session exists for as long as at least one token of the user is live
/// in its store. It owns the user's data cache; when the last token goes
/// away the store disposes the session, after which the cache hands out no
/// values.
#[derive(Debug)]
pub struct UserSession {
    user_id: UserId,
    data: UserDataCache,
}

impl UserSession {
    pub(crate) fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            data: UserDataCache::new(),
        }
    }

    /// Get the user ID.
    pub fn id(&self) -> &UserId {
        &self.user_id
    }

    /// Get the per-user data cache.
    pub fn user_data(&self) -> &UserDataCache {
        &self.data
    }

    /// Shorthand for `user_data().get_or_add(..)`.
    pub fn get_or_add_user_data<T, F>(&self, key: &str, factory: F) -> Option<Arc<T>>
    where
        T: UserData,
        F: FnOnce(&str) -> T,
    {
        self.data.get_or_add(key, factory)
    }

    /// Whether the session has ended (logout or expiry of its last token).
    pub fn is_disposed(&self) -> bool {
        self.data.is_disposed()
    }

    pub(crate) fn dispose(&self) -> bool {
        self.data.dispose()
    }
}

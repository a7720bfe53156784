//! Guest authentication.
//!
//! Every request is treated as the same guest user. One token is issued
//! when the authenticator is built; it never expires and logout does not
//! revoke it.

use std::sync::Arc;

use http::request::Parts;

use crate::auth::authenticator::{TokenAuthenticator, TokenSettings, TokenTransport};
use crate::auth::context::ResponseParts;
use crate::auth::error::AuthResult;
use crate::auth::store::AuthStore;
use crate::auth::token::{Expiration, TokenGenerator};
use crate::types::{AuthToken, UserId};

/// User id used when none is configured.
pub const DEFAULT_GUEST_USER: &str = "guest";

/// Yields the shared guest token for every request.
#[derive(Debug, Clone)]
pub struct GuestTransport {
    token: AuthToken,
}

impl TokenTransport for GuestTransport {
    fn kind(&self) -> &'static str {
        "guest"
    }

    fn can_be_used(&self, _request: &Parts, _is_authentication_attempt: bool) -> bool {
        true
    }

    fn get_auth_id(&self, _request: &Parts) -> Option<AuthToken> {
        Some(self.token.clone())
    }

    fn set_auth_id(&self, _response: &mut ResponseParts, _token: &AuthToken) -> bool {
        true
    }

    fn is_revocable(&self) -> bool {
        false
    }
}

pub type GuestAuthenticator = TokenAuthenticator<GuestTransport>;

impl TokenAuthenticator<GuestTransport> {
    /// Build a guest authenticator and register its token for `user_id`.
    ///
    /// `settings.expiration` only applies to tokens issued later through
    /// `register_user`; the shared guest token itself never expires.
    pub fn guest(user_id: UserId, store: Arc<AuthStore>, settings: TokenSettings) -> AuthResult<Self> {
        let generator = TokenGenerator::new(settings.byte_count, settings.shuffle_seed)?;
        let token = generator.generate();
        store.add_auth_data(token.clone(), user_id, Expiration::Never)?;

        Ok(Self::from_parts(
            GuestTransport { token },
            store,
            generator,
            settings.expiration,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authenticator::Authenticator;
    use crate::auth::context::RequestContext;
    use http::{Request, StatusCode};
    use std::time::Duration;

    fn any_request() -> RequestContext {
        RequestContext::from_request(&Request::builder().uri("/anything").body(()).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_always_authenticated() {
        let store = Arc::new(AuthStore::new());
        let guest =
            GuestAuthenticator::guest(UserId::new(DEFAULT_GUEST_USER), store.clone(), TokenSettings::default())
                .unwrap();

        assert!(guest.can_be_used(any_request().request(), false));
        assert!(guest.can_be_used(any_request().request(), true));

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        store.sweep_expired();

        let mut ctx = any_request();
        let result = guest.challenge(&ctx).await;
        assert_eq!(result.user().unwrap().id().as_str(), "guest");

        result.proceed(ctx.response_mut());
        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert!(ctx.response().headers().is_empty());
    }

    #[tokio::test]
    async fn test_guest_survives_logout() {
        let store = Arc::new(AuthStore::new());
        let guest =
            GuestAuthenticator::guest(UserId::new("visitor"), store.clone(), TokenSettings::default())
                .unwrap();

        assert!(!guest.unregister_user(&any_request()));
        assert_eq!(store.token_count(), 1);
        assert!(guest.challenge(&any_request()).await.is_success());
    }

    #[tokio::test]
    async fn test_guest_fails_after_store_shutdown() {
        let store = Arc::new(AuthStore::new());
        let guest =
            GuestAuthenticator::guest(UserId::new("visitor"), store.clone(), TokenSettings::default())
                .unwrap();

        store.shutdown();
        assert!(!guest.challenge(&any_request()).await.is_success());
    }
}

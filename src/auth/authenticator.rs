//! Authenticator strategy interface.
//!
//! An [`Authenticator`] decides whether it can handle a request, challenges
//! it against its store, and issues or revokes tokens. Strategies that keep
//! their state in an [`AuthStore`] only differ in where the token travels,
//! so they implement [`TokenTransport`] and get the rest from
//! [`TokenAuthenticator`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;
use http::request::Parts;
use tracing::debug;

use crate::auth::context::{RequestContext, ResponseParts};
use crate::auth::error::AuthResult;
use crate::auth::session::UserSession;
use crate::auth::store::AuthStore;
use crate::auth::token::{DEFAULT_TOKEN_BYTE_COUNT, Expiration, TokenGenerator};
use crate::types::{AuthToken, UserId};

/// Boxed future returned by the dyn-compatible async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Continuation that finalizes a response once a challenge outcome is known.
pub type Proceed = Box<dyn FnOnce(&mut ResponseParts) + Send>;

type Renew = Box<dyn FnOnce(&mut ResponseParts) -> bool + Send>;

/// Mark a response as unauthorized and end it with no body.
pub fn reject_unauthorized(response: &mut ResponseParts) {
    response.set_status(StatusCode::UNAUTHORIZED);
    response.finish_empty();
}

enum Continuation {
    Renew(Renew),
    Reject(Proceed),
}

/// Outcome of [`Authenticator::challenge`].
pub struct ChallengeResult {
    user: Option<Arc<UserSession>>,
    continuation: Continuation,
}

impl ChallengeResult {
    /// A successful challenge. `renew` writes the token back onto the
    /// response and reports whether it did.
    pub fn success<F>(user: Arc<UserSession>, renew: F) -> Self
    where
        F: FnOnce(&mut ResponseParts) -> bool + Send + 'static,
    {
        Self {
            user: Some(user),
            continuation: Continuation::Renew(Box::new(renew)),
        }
    }

    /// A failed challenge that runs `proceed` when continued.
    pub fn failure<F>(proceed: F) -> Self
    where
        F: FnOnce(&mut ResponseParts) + Send + 'static,
    {
        Self {
            user: None,
            continuation: Continuation::Reject(Box::new(proceed)),
        }
    }

    /// A failed challenge that rejects with 401.
    pub fn unauthorized() -> Self {
        Self::failure(reject_unauthorized)
    }

    pub fn is_success(&self) -> bool {
        self.user.is_some()
    }

    pub fn user(&self) -> Option<&Arc<UserSession>> {
        self.user.as_ref()
    }

    /// Run the continuation.
    ///
    /// On success the token is rewritten and, if the transport accepted it,
    /// the response is ended with an empty body. On failure the rejection
    /// runs.
    pub fn proceed(self, response: &mut ResponseParts) {
        match self.continuation {
            Continuation::Renew(renew) => {
                if renew(response) {
                    response.finish_empty();
                }
            }
            Continuation::Reject(reject) => reject(response),
        }
    }

    /// Admit the request for a handler that serves its own content.
    ///
    /// On success the token is rewritten (without ending the response) and
    /// the session is returned. On failure the rejection runs and `None` is
    /// returned.
    pub fn admit(self, response: &mut ResponseParts) -> Option<Arc<UserSession>> {
        match self.continuation {
            Continuation::Renew(renew) => {
                renew(response);
                self.user
            }
            Continuation::Reject(reject) => {
                reject(response);
                None
            }
        }
    }
}

impl std::fmt::Debug for ChallengeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeResult")
            .field("user", &self.user.as_ref().map(|s| s.id()))
            .finish()
    }
}

/// An authentication strategy.
pub trait Authenticator: Send + Sync {
    /// Short name of the strategy (e.g., "header").
    fn kind(&self) -> &str;

    /// Whether this strategy can extract a credential from the request.
    ///
    /// Must be cheap and free of side effects. `is_authentication_attempt`
    /// is true for an active login and false for a passive per-request
    /// check.
    fn can_be_used(&self, request: &Parts, is_authentication_attempt: bool) -> bool;

    /// Check the request's credential against the store.
    fn challenge<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, ChallengeResult>;

    /// Issue a new token for `user_id` and write it onto the response.
    fn register_user<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        user_id: UserId,
    ) -> BoxFuture<'a, AuthResult<AuthToken>>;

    /// Revoke the token the request carries, if any.
    ///
    /// Only that token is affected; other tokens of the same user stay live.
    fn unregister_user(&self, ctx: &RequestContext) -> bool;
}

/// Where a token travels on the wire.
pub trait TokenTransport: Send + Sync {
    fn kind(&self) -> &'static str;

    fn can_be_used(&self, request: &Parts, is_authentication_attempt: bool) -> bool;

    fn get_auth_id(&self, request: &Parts) -> Option<AuthToken>;

    /// Write `token` onto the response; returns whether it was written.
    fn set_auth_id(&self, response: &mut ResponseParts, token: &AuthToken) -> bool;

    /// Whether `unregister_user` may revoke the token this transport yields.
    fn is_revocable(&self) -> bool {
        true
    }
}

/// Token settings shared by all store-backed authenticators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSettings {
    pub byte_count: usize,
    pub expiration: Expiration,
    pub shuffle_seed: i64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            byte_count: DEFAULT_TOKEN_BYTE_COUNT,
            expiration: Expiration::default(),
            shuffle_seed: 0,
        }
    }
}

/// Store-backed authenticator over a [`TokenTransport`].
pub struct TokenAuthenticator<T> {
    transport: Arc<T>,
    store: Arc<AuthStore>,
    generator: TokenGenerator,
    expiration: Expiration,
}

impl<T: TokenTransport + 'static> TokenAuthenticator<T> {
    pub fn new(transport: T, store: Arc<AuthStore>, settings: TokenSettings) -> AuthResult<Self> {
        let generator = TokenGenerator::new(settings.byte_count, settings.shuffle_seed)?;
        Ok(Self::from_parts(transport, store, generator, settings.expiration))
    }

    pub(crate) fn from_parts(
        transport: T,
        store: Arc<AuthStore>,
        generator: TokenGenerator,
        expiration: Expiration,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            store,
            generator,
            expiration,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &Arc<AuthStore> {
        &self.store
    }

    pub fn expiration(&self) -> Expiration {
        self.expiration
    }

    fn check(&self, request: &Parts) -> ChallengeResult {
        let Some(token) = self.transport.get_auth_id(request) else {
            return ChallengeResult::unauthorized();
        };

        match self.store.try_get_auth_data(token.as_str()) {
            Some(data) => {
                let transport = self.transport.clone();
                ChallengeResult::success(data.session, move |response| {
                    transport.set_auth_id(response, &token)
                })
            }
            None => {
                // Unknown or expired; drop whatever is left of it.
                self.store.remove_auth_data(token.as_str());
                debug!("Challenge failed for token {}", token.redacted());
                ChallengeResult::unauthorized()
            }
        }
    }
}

impl<T: TokenTransport + 'static> Authenticator for TokenAuthenticator<T> {
    fn kind(&self) -> &str {
        self.transport.kind()
    }

    fn can_be_used(&self, request: &Parts, is_authentication_attempt: bool) -> bool {
        self.transport.can_be_used(request, is_authentication_attempt)
    }

    fn challenge<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, ChallengeResult> {
        Box::pin(async move { self.check(ctx.request()) })
    }

    fn register_user<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        user_id: UserId,
    ) -> BoxFuture<'a, AuthResult<AuthToken>> {
        Box::pin(async move {
            let token = self.generator.generate();
            self.store
                .add_auth_data(token.clone(), user_id, self.expiration)?;
            self.transport.set_auth_id(ctx.response_mut(), &token);
            Ok(token)
        })
    }

    fn unregister_user(&self, ctx: &RequestContext) -> bool {
        if !self.transport.is_revocable() {
            return false;
        }
        match self.transport.get_auth_id(ctx.request()) {
            Some(token) => self.store.remove_auth_data(token.as_str()),
            None => false,
        }
    }
}

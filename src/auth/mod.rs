//! Authentication core.
//!
//! Decides per request whether the caller is authenticated under a schema,
//! issues and tracks opaque session tokens, and offers a uniform
//! challenge/proceed contract to request handlers.
//!
//! ## Building blocks
//!
//! - [`AuthStore`]: concurrent token → session map with sliding expiry and
//!   a background sweeper
//! - [`UserSession`] / [`UserDataCache`]: per-user state, disposed exactly
//!   once when the user's last token goes away
//! - [`Authenticator`]: a strategy (header token, guest, ...) bound to a store
//! - [`AuthenticatorAggregator`]: ordered strategies per schema, first
//!   applicable wins
//! - [`LoginFlow`] / [`perform_logout`]: username/password login and
//!   logout on top of the above
//!
//! ## Usage
//!
//! ```ignore
//! let store = AuthStore::with_sweeper(DEFAULT_SWEEP_INTERVAL);
//! let aggregator = AuthenticatorAggregator::new().register_authenticator(
//!     "",
//!     HeaderAuthenticator::with_header("X-Auth", store, TokenSettings::default())?,
//! );
//!
//! let mut ctx = RequestContext::from_request(&request);
//! match aggregator.authenticate(&mut ctx, "").await {
//!     Some(session) => { /* serve content for session.id() */ }
//!     None => return ctx.into_response(), // already a 401
//! }
//! ```

mod aggregator;
mod authenticator;
mod context;
mod error;
mod guest;
mod header;
mod login;
mod session;
mod store;
mod token;
mod user_data;

pub use aggregator::AuthenticatorAggregator;
pub use authenticator::{
    Authenticator, BoxFuture, ChallengeResult, Proceed, TokenAuthenticator, TokenSettings,
    TokenTransport, reject_unauthorized,
};
pub use context::{RequestContext, ResponseParts};
pub use error::{AuthError, AuthResult};
pub use guest::{DEFAULT_GUEST_USER, GuestAuthenticator, GuestTransport};
pub use header::{DEFAULT_HEADER_NAME, HeaderAuthenticator, HeaderTransport};
pub use login::{
    Credentials, DEFAULT_PASSWORD_FIELD, DEFAULT_USERNAME_FIELD, DigestTransformer, LoginFlow,
    LoginProvider, StaticLoginProvider, UserIdTransformer, perform_logout,
};
pub use session::UserSession;
pub use store::{AuthData, AuthStore, DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
pub use token::{
    DEFAULT_EXPIRATION_SECONDS, DEFAULT_TOKEN_BYTE_COUNT, Expiration, TokenGenerator, TokenInfo,
};
pub use user_data::{Lifecycle, UserData, UserDataCache};

//! Header-token authentication.
//!
//! The token travels in one request header and is written back in the
//! same-named response header after login and on every renewal.

use std::sync::Arc;

use http::request::Parts;
use http::{HeaderName, HeaderValue};

use crate::auth::authenticator::{TokenAuthenticator, TokenSettings, TokenTransport};
use crate::auth::context::ResponseParts;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::store::AuthStore;
use crate::types::AuthToken;

/// Header used when none is configured.
pub const DEFAULT_HEADER_NAME: &str = "X-MyAuthToken";

/// Carries the token in a named header.
#[derive(Debug, Clone)]
pub struct HeaderTransport {
    header: HeaderName,
}

impl HeaderTransport {
    pub fn new(header_name: &str) -> AuthResult<Self> {
        let header = HeaderName::from_bytes(header_name.as_bytes()).map_err(|e| {
            AuthError::InvalidConfiguration(format!("header name '{}': {}", header_name, e))
        })?;
        Ok(Self { header })
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }
}

impl TokenTransport for HeaderTransport {
    fn kind(&self) -> &'static str {
        "header"
    }

    fn can_be_used(&self, request: &Parts, _is_authentication_attempt: bool) -> bool {
        request.headers.contains_key(&self.header)
    }

    fn get_auth_id(&self, request: &Parts) -> Option<AuthToken> {
        let value = request.headers.get(&self.header)?.to_str().ok()?.trim();
        if value.is_empty() {
            return None;
        }
        Some(AuthToken::from(value))
    }

    fn set_auth_id(&self, response: &mut ResponseParts, token: &AuthToken) -> bool {
        match HeaderValue::from_str(token.as_str()) {
            Ok(value) => {
                response.headers_mut().insert(self.header.clone(), value);
                true
            }
            Err(_) => false,
        }
    }
}

pub type HeaderAuthenticator = TokenAuthenticator<HeaderTransport>;

impl TokenAuthenticator<HeaderTransport> {
    /// Header authenticator reading and writing `header_name`.
    pub fn with_header(
        header_name: &str,
        store: Arc<AuthStore>,
        settings: TokenSettings,
    ) -> AuthResult<Self> {
        Self::new(HeaderTransport::new(header_name)?, store, settings)
    }
}

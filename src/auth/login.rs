//! Username/password login and logout flows.
//!
//! Credential verification is delegated to a [`LoginProvider`]; on success
//! the schema's authenticator issues a token. The flows only touch the
//! request head and the response; reading the body is up to the transport,
//! which hands over parsed [`Credentials`].

use std::sync::Arc;

use base64::Engine;
use base64::engine::GeneralPurpose;
use http::{Method, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::auth::aggregator::AuthenticatorAggregator;
use crate::auth::authenticator::BoxFuture;
use crate::auth::context::{RequestContext, ResponseParts};
use crate::auth::error::AuthResult;
use crate::auth::token::shuffled_engine;
use crate::types::{SchemaName, UserId};

pub const DEFAULT_USERNAME_FIELD: &str = "username";
pub const DEFAULT_PASSWORD_FIELD: &str = "password";

/// Verifies a username/password pair.
pub trait LoginProvider: Send + Sync {
    /// Returns the user's unique id, or `None` when the credentials are
    /// rejected.
    fn perform_authentication<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Option<String>>;
}

/// Accepts exactly one configured username/password pair.
///
/// Meant for demos and tests.
#[derive(Clone)]
pub struct StaticLoginProvider {
    username: String,
    password: String,
}

impl StaticLoginProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for StaticLoginProvider {
    fn default() -> Self {
        Self::new("sample", "sample")
    }
}

impl LoginProvider for StaticLoginProvider {
    fn perform_authentication<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            (username == self.username && password == self.password).then(|| username.to_string())
        })
    }
}

impl std::fmt::Debug for StaticLoginProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticLoginProvider")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Maps the id returned by a provider to the id stored in sessions.
pub trait UserIdTransformer: Send + Sync {
    fn transform(&self, user_id: &str) -> String;
}

/// SHA-256 of the user id, base64-encoded over a seed-shuffled alphabet.
#[derive(Debug, Clone)]
pub struct DigestTransformer {
    engine: GeneralPurpose,
}

impl DigestTransformer {
    pub fn new(shuffle_seed: i64) -> AuthResult<Self> {
        Ok(Self {
            engine: shuffled_engine(shuffle_seed)?,
        })
    }
}

impl UserIdTransformer for DigestTransformer {
    fn transform(&self, user_id: &str) -> String {
        let digest = Sha256::digest(user_id.as_bytes());
        self.engine.encode(digest)
    }
}

/// A username/password pair read from a login request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both parts must be non-empty.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self { username, password })
    }

    /// From url-encoded form fields; each field must occur exactly once.
    pub fn from_form(pairs: &[(String, String)], username_field: &str, password_field: &str) -> Option<Self> {
        let single = |field: &str| {
            let mut values = pairs.iter().filter(|(k, _)| k == field).map(|(_, v)| v);
            match (values.next(), values.next()) {
                (Some(value), None) => Some(value.clone()),
                _ => None,
            }
        };
        Self::new(single(username_field)?, single(password_field)?)
    }

    /// From a JSON object with string-valued fields.
    pub fn from_json(body: &Value, username_field: &str, password_field: &str) -> Option<Self> {
        let object = body.as_object()?;
        let username = object.get(username_field)?.as_str()?;
        let password = object.get(password_field)?.as_str()?;
        Self::new(username, password)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn bad_request(response: &mut ResponseParts) {
    response.set_status(StatusCode::BAD_REQUEST);
    response.finish_empty();
}

/// Login against one schema.
pub struct LoginFlow {
    aggregator: Arc<AuthenticatorAggregator>,
    schema: SchemaName,
    username_field: String,
    password_field: String,
    provider: Arc<dyn LoginProvider>,
    transformer: Option<Arc<dyn UserIdTransformer>>,
}

impl LoginFlow {
    pub fn new(aggregator: Arc<AuthenticatorAggregator>, provider: Arc<dyn LoginProvider>) -> Self {
        Self {
            aggregator,
            schema: SchemaName::default(),
            username_field: DEFAULT_USERNAME_FIELD.to_string(),
            password_field: DEFAULT_PASSWORD_FIELD.to_string(),
            provider,
            transformer: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<SchemaName>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_fields(mut self, username_field: impl Into<String>, password_field: impl Into<String>) -> Self {
        self.username_field = username_field.into();
        self.password_field = password_field.into();
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn UserIdTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn schema(&self) -> &str {
        self.schema.as_str()
    }

    pub fn username_field(&self) -> &str {
        &self.username_field
    }

    pub fn password_field(&self) -> &str {
        &self.password_field
    }

    pub fn aggregator(&self) -> &Arc<AuthenticatorAggregator> {
        &self.aggregator
    }

    /// Run a login request.
    ///
    /// * not a POST, no credentials, or no authenticator for the schema: 400
    /// * already holding a valid token: the token is renewed
    /// * rejected credentials: the challenge's rejection (401)
    /// * accepted credentials: a new token is issued onto the response
    ///
    /// Only a failure to store the new token is returned as an error.
    pub async fn perform_login(
        &self,
        ctx: &mut RequestContext,
        credentials: Option<Credentials>,
    ) -> AuthResult<()> {
        let credentials = match credentials {
            Some(credentials) if ctx.request().method == Method::POST => credentials,
            _ => {
                bad_request(ctx.response_mut());
                return Ok(());
            }
        };

        let Some(authenticator) =
            self.aggregator
                .get_authenticator(ctx.request(), self.schema.as_str(), true)
        else {
            debug!("No authenticator accepts the login request for schema '{}'", self.schema);
            bad_request(ctx.response_mut());
            return Ok(());
        };

        let challenge = authenticator.challenge(ctx).await;
        if challenge.is_success() {
            challenge.proceed(ctx.response_mut());
            return Ok(());
        }

        let user_id = self
            .provider
            .perform_authentication(&credentials.username, &credentials.password)
            .await
            .filter(|id| !id.is_empty());

        match user_id {
            None => {
                warn!("Login rejected for user '{}'", credentials.username);
                challenge.proceed(ctx.response_mut());
            }
            Some(user_id) => {
                let user_id = match &self.transformer {
                    Some(transformer) => transformer.transform(&user_id),
                    None => user_id,
                };
                authenticator.register_user(ctx, UserId::new(user_id)).await?;
                info!("User '{}' logged in", credentials.username);
                ctx.response_mut().finish_empty();
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("schema", &self.schema)
            .field("username_field", &self.username_field)
            .field("password_field", &self.password_field)
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

/// Revoke every token the request carries, across all schemas, and answer
/// 200 with no body. Returns how many tokens were revoked.
pub fn perform_logout(aggregator: &AuthenticatorAggregator, ctx: &mut RequestContext) -> usize {
    let revoked = aggregator.unregister_everywhere(ctx);
    debug!("Logout revoked {} token(s)", revoked);
    ctx.response_mut().set_status(StatusCode::OK);
    ctx.response_mut().finish_empty();
    revoked
}

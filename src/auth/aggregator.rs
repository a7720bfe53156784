//! Authenticator registry keyed by schema.
//!
//! Each schema maps to an ordered list of authenticators. Dispatch picks the
//! first one whose `can_be_used` accepts the request; registration order is
//! the only tie-break.

use std::collections::BTreeMap;
use std::sync::Arc;

use http::request::Parts;
use tracing::{debug, info};

use crate::auth::authenticator::{Authenticator, reject_unauthorized};
use crate::auth::context::{RequestContext, ResponseParts};
use crate::auth::session::UserSession;
use crate::types::SchemaName;

/// Ordered authenticators per schema.
#[derive(Clone, Default)]
pub struct AuthenticatorAggregator {
    schemas: BTreeMap<SchemaName, Vec<Arc<dyn Authenticator>>>,
}

impl AuthenticatorAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an authenticator to `schema`'s list.
    pub fn register(
        mut self,
        schema: impl Into<SchemaName>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let schema = schema.into();
        info!(
            "Registered '{}' authenticator for schema '{}'",
            authenticator.kind(),
            schema
        );
        self.schemas.entry(schema).or_default().push(authenticator);
        self
    }

    /// Register an authenticator from a type that implements `Authenticator`.
    pub fn register_authenticator<A: Authenticator + 'static>(
        self,
        schema: impl Into<SchemaName>,
        authenticator: A,
    ) -> Self {
        self.register(schema, Arc::new(authenticator))
    }

    /// First authenticator of `schema` that can handle the request.
    pub fn get_authenticator(
        &self,
        request: &Parts,
        schema: &str,
        is_authentication_attempt: bool,
    ) -> Option<Arc<dyn Authenticator>> {
        self.schemas
            .get(schema)?
            .iter()
            .find(|a| a.can_be_used(request, is_authentication_attempt))
            .cloned()
    }

    /// All authenticators of `schema`, in registration order.
    pub fn get_authenticators(&self, schema: &str) -> Option<&[Arc<dyn Authenticator>]> {
        self.schemas.get(schema).map(Vec::as_slice)
    }

    /// Registered schema names, sorted.
    pub fn authentication_schemas(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(SchemaName::as_str)
    }

    /// Fallback when a required schema has no applicable authenticator.
    pub fn proceed_when_no_authenticator_found(&self, response: &mut ResponseParts) {
        reject_unauthorized(response);
    }

    /// Gate a request on `schema`.
    ///
    /// Returns the session when the request is authenticated; the renewed
    /// token is already on the response. Otherwise the response has been
    /// finalized by the rejection path and `None` is returned.
    pub async fn authenticate(
        &self,
        ctx: &mut RequestContext,
        schema: &str,
    ) -> Option<Arc<UserSession>> {
        let Some(authenticator) = self.get_authenticator(ctx.request(), schema, false) else {
            debug!("No applicable authenticator for schema '{}'", schema);
            self.proceed_when_no_authenticator_found(ctx.response_mut());
            return None;
        };

        let result = authenticator.challenge(ctx).await;
        result.admit(ctx.response_mut())
    }

    /// Log out of every schema: let each authenticator revoke whatever
    /// token the request carries for it. Returns how many were revoked.
    pub fn unregister_everywhere(&self, ctx: &RequestContext) -> usize {
        self.schemas
            .values()
            .flatten()
            .filter(|a| a.unregister_user(ctx))
            .count()
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl std::fmt::Debug for AuthenticatorAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (schema, list) in &self.schemas {
            let kinds: Vec<&str> = list.iter().map(|a| a.kind()).collect();
            map.entry(&schema.as_str(), &kinds);
        }
        map.finish()
    }
}

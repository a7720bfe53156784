// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod types;

// Re-export key types and functions
pub use auth::{
    AuthError, AuthStore, Authenticator, AuthenticatorAggregator, ChallengeResult, LoginFlow,
    RequestContext, ResponseParts, UserData, UserSession,
};
pub use config::{AuthGateConfig, load_config};
pub use types::{AuthToken, SchemaName, UserId};

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use auth::{DigestTransformer, GuestAuthenticator, HeaderAuthenticator, StaticLoginProvider};
use config::{AuthenticatorConfig, LoginConfig, ProviderConfig};

/// Everything built from one configuration: the schema registry, one store
/// per schema, and the optional login flow.
#[derive(Debug)]
pub struct AuthGate {
    aggregator: Arc<AuthenticatorAggregator>,
    stores: BTreeMap<SchemaName, Arc<AuthStore>>,
    login: Option<Arc<LoginFlow>>,
}

impl AuthGate {
    pub fn aggregator(&self) -> &Arc<AuthenticatorAggregator> {
        &self.aggregator
    }

    /// The store shared by `schema`'s authenticators.
    pub fn store(&self, schema: &str) -> Option<&Arc<AuthStore>> {
        self.stores.get(schema)
    }

    pub fn login(&self) -> Option<&Arc<LoginFlow>> {
        self.login.as_ref()
    }

    /// Stop every sweeper and drop all sessions.
    pub fn shutdown(&self) {
        for store in self.stores.values() {
            store.shutdown();
        }
        info!("Shut down {} authentication store(s)", self.stores.len());
    }
}

/// Convenience function to build a fully configured gate.
///
/// Each schema gets its own store with a running sweeper, so this must be
/// called from within a tokio runtime.
pub fn create_gate(config: &AuthGateConfig) -> Result<AuthGate> {
    let interval = config.sweep_interval();
    let mut aggregator = AuthenticatorAggregator::new();
    let mut stores = BTreeMap::new();

    for (schema, schema_config) in &config.authentication {
        let store = AuthStore::with_sweeper(interval);
        for entry in &schema_config.authenticators {
            let authenticator: Arc<dyn Authenticator> = match entry {
                AuthenticatorConfig::Header(header) => Arc::new(HeaderAuthenticator::with_header(
                    &header.header_name,
                    store.clone(),
                    header.token_settings(),
                )?),
                AuthenticatorConfig::Guest(guest) => Arc::new(GuestAuthenticator::guest(
                    UserId::new(guest.user_id.clone()),
                    store.clone(),
                    guest.token_settings(),
                )?),
            };
            aggregator = aggregator.register(schema.as_str(), authenticator);
        }
        stores.insert(SchemaName::new(schema.clone()), store);
    }

    let aggregator = Arc::new(aggregator);
    let login = match &config.login {
        Some(login_config) => Some(Arc::new(create_login(login_config, aggregator.clone())?)),
        None => None,
    };

    Ok(AuthGate {
        aggregator,
        stores,
        login,
    })
}

fn create_login(config: &LoginConfig, aggregator: Arc<AuthenticatorAggregator>) -> Result<LoginFlow> {
    if aggregator.get_authenticators(&config.schema).is_none() {
        return Err(anyhow::anyhow!(
            "Login schema `{}` has no authenticators",
            config.schema
        ));
    }

    let provider = match &config.provider {
        ProviderConfig::Static { username, password } => {
            Arc::new(StaticLoginProvider::new(username.clone(), password.clone()))
        }
    };

    let mut flow = LoginFlow::new(aggregator, provider)
        .with_schema(config.schema.as_str())
        .with_fields(config.username_field.clone(), config.password_field.clone());
    if let Some(digest) = &config.user_id_digest {
        flow = flow.with_transformer(Arc::new(DigestTransformer::new(digest.shuffle_seed)?));
    }
    Ok(flow)
}

use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

use crate::auth::{
    DEFAULT_EXPIRATION_SECONDS, DEFAULT_GUEST_USER, DEFAULT_HEADER_NAME, DEFAULT_PASSWORD_FIELD,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TOKEN_BYTE_COUNT, DEFAULT_USERNAME_FIELD, Expiration,
    MIN_SWEEP_INTERVAL, TokenSettings,
};

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthGateConfig {
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    /// Authenticators per schema, in registration order.
    #[serde(default)]
    pub authentication: BTreeMap<String, SchemaConfig>,
    #[serde(default)]
    pub login: Option<LoginConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    #[serde(default)]
    pub authenticators: Vec<AuthenticatorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthenticatorConfig {
    Header(HeaderConfig),
    Guest(GuestConfig),
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HeaderConfig {
    #[serde(default = "default_header_name")]
    pub header_name: String,
    #[serde(default = "default_token_byte_count")]
    pub token_byte_count: usize,
    #[serde(default = "default_expiration_seconds")]
    pub expiration_seconds: u64,
    #[serde(default)]
    pub shuffle_seed: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GuestConfig {
    #[serde(default = "default_guest_user")]
    pub user_id: String,
    #[serde(default = "default_token_byte_count")]
    pub token_byte_count: usize,
    #[serde(default = "default_expiration_seconds")]
    pub expiration_seconds: u64,
    #[serde(default)]
    pub shuffle_seed: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoginConfig {
    #[serde(default)]
    pub schema: String,
    #[serde(default = "default_username_field")]
    pub username_field: String,
    #[serde(default = "default_password_field")]
    pub password_field: String,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub user_id_digest: Option<DigestConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Static {
        #[serde(default = "default_sample")]
        username: String,
        #[serde(default = "default_sample")]
        password: String,
    },
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DigestConfig {
    #[serde(default)]
    pub shuffle_seed: i64,
}

fn default_sweep_interval_seconds() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_header_name() -> String {
    DEFAULT_HEADER_NAME.to_string()
}

fn default_guest_user() -> String {
    DEFAULT_GUEST_USER.to_string()
}

fn default_token_byte_count() -> usize {
    DEFAULT_TOKEN_BYTE_COUNT
}

fn default_expiration_seconds() -> u64 {
    DEFAULT_EXPIRATION_SECONDS
}

fn default_username_field() -> String {
    DEFAULT_USERNAME_FIELD.to_string()
}

fn default_password_field() -> String {
    DEFAULT_PASSWORD_FIELD.to_string()
}

fn default_sample() -> String {
    "sample".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Static {
            username: default_sample(),
            password: default_sample(),
        }
    }
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            header_name: default_header_name(),
            token_byte_count: DEFAULT_TOKEN_BYTE_COUNT,
            expiration_seconds: DEFAULT_EXPIRATION_SECONDS,
            shuffle_seed: 0,
        }
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            schema: String::new(),
            username_field: default_username_field(),
            password_field: default_password_field(),
            provider: ProviderConfig::default(),
            user_id_digest: None,
        }
    }
}

impl Default for AuthGateConfig {
    /// Header authentication on the default schema plus a sample login.
    fn default() -> Self {
        let mut authentication = BTreeMap::new();
        authentication.insert(
            String::new(),
            SchemaConfig {
                authenticators: vec![AuthenticatorConfig::Header(HeaderConfig::default())],
            },
        );
        Self {
            sweep_interval_seconds: default_sweep_interval_seconds(),
            authentication,
            login: Some(LoginConfig::default()),
        }
    }
}

impl AuthGateConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds).max(MIN_SWEEP_INTERVAL)
    }
}

fn expiration_from_secs(secs: u64) -> Expiration {
    if secs == 0 {
        Expiration::Never
    } else {
        Expiration::from_secs(secs)
    }
}

impl HeaderConfig {
    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            byte_count: self.token_byte_count,
            expiration: expiration_from_secs(self.expiration_seconds),
            shuffle_seed: self.shuffle_seed,
        }
    }
}

impl GuestConfig {
    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            byte_count: self.token_byte_count,
            expiration: expiration_from_secs(self.expiration_seconds),
            shuffle_seed: self.shuffle_seed,
        }
    }
}

impl AuthenticatorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Header(_) => "header",
            Self::Guest(_) => "guest",
        }
    }
}

pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("AUTHGATE_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("authgate").join("authgate.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("authgate.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find authgate.json (set AUTHGATE_CONFIG or create ./authgate.json)"
    ))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            match env::var(&name) {
                Ok(val) => out.push_str(&val),
                Err(_) => {
                    out.push_str("${");
                    out.push_str(&name);
                    out.push('}');
                }
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_config(cfg: AuthGateConfig) -> AuthGateConfig {
    let mut cfg = cfg;

    for schema in cfg.authentication.values_mut() {
        for authenticator in &mut schema.authenticators {
            match authenticator {
                AuthenticatorConfig::Header(header) => {
                    header.header_name = expand_env_vars(&header.header_name);
                }
                AuthenticatorConfig::Guest(guest) => {
                    guest.user_id = expand_env_vars(&guest.user_id);
                }
            }
        }
    }

    if let Some(login) = cfg.login.as_mut() {
        login.schema = expand_env_vars(&login.schema);
        login.username_field = expand_env_vars(&login.username_field);
        login.password_field = expand_env_vars(&login.password_field);
        match &mut login.provider {
            ProviderConfig::Static { username, password } => {
                *username = expand_env_vars(username);
                *password = expand_env_vars(password);
            }
        }
    }

    cfg
}

/// Parse a configuration document and expand `${VAR}` references.
pub fn parse_config(raw: &str) -> anyhow::Result<AuthGateConfig> {
    let cfg: AuthGateConfig = serde_json::from_str(raw)?;
    Ok(expand_config(cfg))
}

/// Load the configuration from `path`, or from the resolved default
/// location. Without any file the built-in defaults are used.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AuthGateConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match resolve_config_path() {
            Ok(p) => p,
            Err(e) => {
                info!("{}; using built-in configuration", e);
                return Ok(AuthGateConfig::default());
            }
        },
    };

    let raw = fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let cfg = parse_config(&raw)?;
    info!("Loaded configuration from {}", path.display());
    Ok(cfg)
}

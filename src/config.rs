// SPDX-License-Identifier: Apache-2.0
//! TOML configuration with environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use actix_web::http::Uri;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::auth::oauth2::{OAuth2Settings, ProviderKind};
use crate::crypto::hash_password;
use crate::error::ConfigError;
use crate::logging::LogFormat;
use crate::proxy::ProxySettings;
use crate::routes::{ProxyTarget, Route, RoutePattern, RouteTarget};
use crate::users::User;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "WARDGATE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/wardgate.toml";
pub const BIND_ENV: &str = "WARDGATE_BIND";
pub const LOG_FORMAT_ENV: &str = "WARDGATE_LOG_FORMAT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub middleware: MiddlewareConfig,
    pub proxy: ProxyConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub workers: usize,
    pub management_prefix: String,
    pub shutdown_timeout_secs: u64,
    pub client_request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
            workers: 4,
            management_prefix: "/gateway".to_owned(),
            shutdown_timeout_secs: 30,
            client_request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_secs: u64,
    pub prune_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: 24 * 60 * 60,
            prune_interval_secs: 300,
        }
    }
}

impl SessionConfig {
    /// Session lifetime. Fails when the value cannot be added to the current time.
    pub fn duration(&self) -> Result<chrono::Duration, ConfigError> {
        i64::try_from(self.duration_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .filter(|d| chrono::Utc::now().checked_add_signed(*d).is_some())
            .ok_or_else(|| {
                ConfigError::InvalidSetting(format!(
                    "session.duration_secs {} is out of range",
                    self.duration_secs
                ))
            })
    }
}

/// Global chain toggles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub fingerprint: bool,
    pub fingerprint_cache_size: usize,
    pub session: bool,
    pub metrics: bool,
    pub metrics_max_paths: usize,
    pub logging: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            fingerprint: true,
            fingerprint_cache_size: 10_000,
            session: true,
            metrics: true,
            metrics_max_paths: crate::metrics::DEFAULT_MAX_PATHS,
            logging: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
        }
    }
}

impl ProxyConfig {
    pub fn settings(&self) -> ProxySettings {
        ProxySettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub basic: BasicAuthConfig,
    pub oauth2: BTreeMap<String, OAuth2Config>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BasicAuthConfig {
    pub enabled: bool,
    pub users: Vec<BasicUserConfig>,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicUserConfig {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    /// Plain-text password, hashed at startup. Meant for local development.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuth2Config {
    #[serde(default)]
    pub kind: Option<ProviderKind>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub userinfo_url: Option<String>,
    #[serde(default)]
    pub emails_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default = "default_oauth_timeout")]
    pub timeout_secs: u64,
}

fn default_oauth_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteAuthConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, alias = "toFolder")]
    pub to_folder: Option<PathBuf>,
    #[serde(default, alias = "toFile")]
    pub to_file: Option<PathBuf>,
    #[serde(default, rename = "static")]
    pub static_content: Option<bool>,
    #[serde(default, alias = "isSPA")]
    pub is_spa: bool,
    #[serde(default, alias = "removeFromPath")]
    pub remove_from_path: Option<String>,
    #[serde(default)]
    pub authentication: RouteAuthConfig,
    #[serde(default, alias = "cacheControlSeconds")]
    pub cache_control_seconds: Option<u32>,
    /// Invalid optional routes are skipped instead of failing startup.
    #[serde(default)]
    pub optional: bool,
}

impl RouteConfig {
    pub fn to_route(&self) -> Result<Route, ConfigError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ConfigError::route(&self.from, "route needs a name"));
        }

        let pattern = RoutePattern::parse(&self.from).ok_or_else(|| {
            ConfigError::route(name, format!("`from` pattern '{}' must start with '/' and may only end in '*'", self.from))
        })?;

        let target = match (&self.to, &self.to_folder, &self.to_file) {
            (Some(to), None, None) => RouteTarget::Proxy(ProxyTarget {
                upstream: parse_upstream(name, to)?,
                remove_from_path: self.remove_from_path.clone(),
            }),
            (None, Some(root), None) => RouteTarget::StaticFolder {
                root: root.clone(),
                spa: self.is_spa,
            },
            (None, None, Some(path)) => RouteTarget::StaticFile { path: path.clone() },
            (None, None, None) => {
                return Err(ConfigError::route(name, "one of `to`, `to_folder` or `to_file` is required"));
            }
            _ => {
                return Err(ConfigError::route(name, "only one of `to`, `to_folder` or `to_file` may be set"));
            }
        };

        let is_proxy = matches!(target, RouteTarget::Proxy(_));
        match self.static_content {
            Some(true) if is_proxy => {
                return Err(ConfigError::route(name, "`static = true` contradicts a proxy target"));
            }
            Some(false) if !is_proxy => {
                return Err(ConfigError::route(name, "`static = false` contradicts a file or folder target"));
            }
            _ => {}
        }
        if self.is_spa && !matches!(target, RouteTarget::StaticFolder { .. }) {
            return Err(ConfigError::route(name, "`is_spa` only applies to folder routes"));
        }
        if self.remove_from_path.is_some() && !is_proxy {
            return Err(ConfigError::route(name, "`remove_from_path` only applies to proxy routes"));
        }

        Ok(Route {
            name: name.to_owned(),
            pattern,
            target,
            authentication_required: self.authentication.enabled,
            cache_control_seconds: self.cache_control_seconds,
        })
    }
}

fn parse_upstream(route: &str, to: &str) -> Result<Uri, ConfigError> {
    let uri: Uri = to
        .parse()
        .map_err(|e| ConfigError::route(route, format!("invalid upstream URL '{to}': {e}")))?;
    match (uri.scheme_str(), uri.authority()) {
        (Some("http" | "https"), Some(_)) => Ok(uri),
        _ => Err(ConfigError::route(route, format!("upstream '{to}' must be an absolute http(s) URL"))),
    }
}

fn parse_url(provider: &str, field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::provider(provider, format!("invalid {field} '{value}': {e}")))
}

impl OAuth2Config {
    pub fn settings(&self, name: &str) -> Result<OAuth2Settings, ConfigError> {
        let kind = self
            .kind
            .or_else(|| ProviderKind::from_name(name))
            .ok_or_else(|| ConfigError::provider(name, "set `kind` to \"google\" or \"github\""))?;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ConfigError::provider(name, "provider names may only use letters, digits, '-' and '_'"));
        }
        if name == crate::users::LOCAL_PROVIDER {
            return Err(ConfigError::provider(name, "the name 'basic' is reserved"));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::provider(name, "client_id is required"));
        }
        if self.client_secret.is_empty() {
            warn!(provider = %name, "OAuth2 client secret is empty");
        }

        let defaults = kind.defaults();
        let url = |field: &str, value: &Option<String>, default: &str| {
            parse_url(name, field, value.as_deref().unwrap_or(default))
        };

        Ok(OAuth2Settings {
            name: name.to_owned(),
            kind,
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| kind.display_name().to_owned()),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_url: self
                .redirect_url
                .as_deref()
                .map(|u| parse_url(name, "redirect_url", u))
                .transpose()?,
            auth_url: url("auth_url", &self.auth_url, defaults.auth_url)?,
            token_url: url("token_url", &self.token_url, defaults.token_url)?,
            userinfo_url: url("userinfo_url", &self.userinfo_url, defaults.userinfo_url)?,
            emails_url: self
                .emails_url
                .as_deref()
                .or(defaults.emails_url)
                .map(|u| parse_url(name, "emails_url", u))
                .transpose()?,
            scopes: self
                .scopes
                .clone()
                .unwrap_or_else(|| defaults.scopes.iter().map(|s| (*s).to_owned()).collect()),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

impl GatewayConfig {
    /// Reads, env-overrides and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        info!(path = %path.display(), routes = config.routes.len(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `WARDGATE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(BIND_ENV) {
            self.server.bind = bind;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            match LogFormat::parse(&format) {
                Some(format) => self.logging.format = format,
                None => warn!(value = %format, "Ignoring unknown {}", LOG_FORMAT_ENV),
            }
        }
        for (name, provider) in self.auth.oauth2.iter_mut() {
            let key = format!("WARDGATE_{}_CLIENT_SECRET", name.to_ascii_uppercase().replace('-', "_"));
            if let Some(secret) = lookup(&key) {
                provider.client_secret = secret;
            }
        }
    }

    /// Normalizes and checks settings that every other component relies on.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let prefix = self.server.management_prefix.trim_end_matches('/');
        if !prefix.starts_with('/') {
            return Err(ConfigError::InvalidSetting(format!(
                "server.management_prefix must be a path like \"/gateway\", got '{}'",
                self.server.management_prefix
            )));
        }
        self.server.management_prefix = prefix.to_owned();

        if self.server.workers == 0 {
            return Err(ConfigError::InvalidSetting("server.workers must be at least 1".to_owned()));
        }
        if self.session.duration_secs == 0 {
            return Err(ConfigError::InvalidSetting("session.duration_secs must be positive".to_owned()));
        }
        self.session.duration()?;
        for (name, provider) in &self.auth.oauth2 {
            provider.settings(name)?;
        }
        Ok(())
    }

    /// Valid routes in configuration order. Invalid optional routes are
    /// skipped with a warning; any other invalid route is an error.
    pub fn routes(&self) -> Result<Vec<Route>, ConfigError> {
        let mut routes = Vec::with_capacity(self.routes.len());
        for route in &self.routes {
            match route.to_route() {
                Ok(r) => routes.push(r),
                Err(e) if route.optional => {
                    warn!(route = %route.name, error = %e, "Skipping invalid optional route");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(routes)
    }

    pub fn oauth2_settings(&self) -> Result<Vec<OAuth2Settings>, ConfigError> {
        self.auth
            .oauth2
            .iter()
            .map(|(name, provider)| provider.settings(name))
            .collect()
    }

    /// Local users declared under `[[auth.basic.users]]`.
    pub fn basic_users(&self) -> Result<Vec<User>, ConfigError> {
        self.auth
            .basic
            .users
            .iter()
            .map(|u| {
                let hash = match (&u.password_hash, &u.password) {
                    (Some(hash), _) => hash.clone(),
                    (None, Some(password)) => {
                        warn!(username = %u.username, "Hashing plain-text password from config");
                        hash_password(password).map_err(|e| {
                            ConfigError::InvalidSetting(format!("cannot hash password for '{}': {e}", u.username))
                        })?
                    }
                    (None, None) => {
                        return Err(ConfigError::InvalidSetting(format!(
                            "basic user '{}' needs password_hash or password",
                            u.username
                        )));
                    }
                };
                let email = u.email.clone().unwrap_or_default();
                Ok(User::local(&u.username, &email, &hash))
            })
            .collect()
    }
}

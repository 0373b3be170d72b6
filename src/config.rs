//! Configuration management
//!
//! Loaded once at startup from an optional YAML file and `MAGAZINE_GATEWAY_`
//! environment variables, then validated so a missing secret stops the
//! process instead of failing individual requests later.

use std::{collections::BTreeMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable prefix; nested keys are split on `__`
pub const ENV_PREFIX: &str = "MAGAZINE_GATEWAY_";

/// Keys that must be present for the gateway to start
pub const REQUIRED_KEYS: &[&str] = &[
    "csrf.cookie_name",
    "csrf.secret",
    "session.cookie_name",
    "upstream.base_url",
];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before extracting secrets
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Anti-forgery token configuration
    pub csrf: CsrfConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
    /// Remote identity/content provider
    pub upstream: UpstreamConfig,
    /// Rate limiting for sensitive routes
    pub rate_limit: RateLimitConfig,
    /// List proxy configuration
    pub listing: ListingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Production mode: cookies are marked `Secure`
    pub production: bool,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            production: false,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024,
        }
    }
}

/// Anti-forgery token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Name of the readable cookie carrying the token
    pub cookie_name: String,
    /// Request header the client echoes the token in
    pub header_name: String,
    /// Signing secret (literal or `env:VAR`)
    pub secret: Option<String>,
    /// Token lifetime. Defaults to one hour; overriding it is an operator
    /// choice, the gateway never varies it per request.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "csrf_token".to_string(),
            header_name: "x-csrf-token".to_string(),
            secret: None,
            ttl: Duration::from_secs(60 * 60),
        }
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the http-only session cookie
    pub cookie_name: String,
    /// Key sealing the cookie value; falls back to the CSRF secret
    pub secret: Option<String>,
    /// Cookie lifetime
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            secret: None,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Remote identity/content provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// API root, e.g. `https://cms.example.com/api`
    pub base_url: Option<String>,
    /// Budget for each outbound call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Read-only token attached to list requests (literal or `env:VAR`)
    pub api_token: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: crate::timeout::DEFAULT_UPSTREAM_TIMEOUT,
            api_token: None,
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting on sensitive routes
    pub enabled: bool,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Where window counters live
    pub store: RateLimitStore,
    /// Key clients on `X-Forwarded-For` / `X-Real-IP` instead of the socket
    /// peer. Enable only behind a proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 10,
            window: Duration::from_secs(60),
            store: RateLimitStore::Memory,
            trust_forwarded_headers: false,
        }
    }
}

/// Counter storage backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimitStore {
    /// Per-process counters (single instance only)
    #[default]
    Memory,
    /// Shared Redis reached over its REST interface
    Rest {
        /// REST endpoint
        #[serde(default)]
        url: Option<String>,
        /// Bearer token (literal or `env:VAR`)
        #[serde(default)]
        token: Option<String>,
    },
}

/// List proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Seconds a shared cache may treat a list response as fresh
    pub s_maxage: u64,
    /// Seconds a stale list response may be served while revalidating
    pub stale_while_revalidate: u64,
    /// Largest page size forwarded upstream
    pub max_page_size: u32,
    /// Per-resource query defaults, keyed by resource name
    pub resources: BTreeMap<String, ResourceConfig>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        let mut resources = BTreeMap::new();
        resources.insert(
            "articles".to_string(),
            ResourceConfig {
                fields: vec![
                    "title".to_string(),
                    "slug".to_string(),
                    "excerpt".to_string(),
                    "publishedAt".to_string(),
                ],
                populate: vec!["cover".to_string(), "category".to_string(), "author".to_string()],
                sort: Some("publishedAt:desc".to_string()),
                accept_filters: false,
            },
        );
        resources.insert(
            "products".to_string(),
            ResourceConfig {
                fields: vec![
                    "name".to_string(),
                    "slug".to_string(),
                    "price".to_string(),
                ],
                populate: vec!["image".to_string(), "category".to_string()],
                sort: None,
                accept_filters: true,
            },
        );

        Self {
            s_maxage: 900,
            stale_while_revalidate: 3600,
            max_page_size: 100,
            resources,
        }
    }
}

/// Query defaults for one list resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// `fields[i]` selectors
    pub fields: Vec<String>,
    /// `populate[i]` relations
    pub populate: Vec<String>,
    /// Default sort expression
    pub sort: Option<String>,
    /// Whether `filter`/`filters` query keys are forwarded
    pub accept_filters: bool,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if !path.exists() {
                tracing::debug!("Env file not found (skipped): {path_str}");
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {path_str}"),
                Err(e) => tracing::warn!("Failed to load env file {path_str}: {e}"),
            }
        }
    }

    /// Check every required key, reporting all missing ones at once
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.csrf.cookie_name.trim().is_empty() {
            missing.push("csrf.cookie_name");
        }
        if self.csrf_secret().is_none() {
            missing.push("csrf.secret");
        }
        if self.session.cookie_name.trim().is_empty() {
            missing.push("session.cookie_name");
        }
        match self.upstream.base_url.as_deref().map(str::trim) {
            None | Some("") => missing.push("upstream.base_url"),
            Some(raw) => {
                url::Url::parse(raw).map_err(|e| {
                    Error::Config(format!("upstream.base_url is not a valid URL: {e}"))
                })?;
            }
        }
        if let RateLimitStore::Rest { url, token } = &self.rate_limit.store {
            if self.rate_limit.enabled {
                if url.as_deref().map(resolve_secret).is_none_or(|u| u.is_empty()) {
                    missing.push("rate_limit.store.url");
                }
                if token.as_deref().map(resolve_secret).is_none_or(|t| t.is_empty()) {
                    missing.push("rate_limit.store.token");
                }
            }
        }
        if self.rate_limit.enabled && self.rate_limit.max_requests == 0 {
            return Err(Error::Config(
                "rate_limit.max_requests must be greater than zero".to_string(),
            ));
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "missing required configuration: {}",
                missing.join(", ")
            )))
        }
    }

    /// Resolved CSRF signing secret
    #[must_use]
    pub fn csrf_secret(&self) -> Option<String> {
        self.csrf
            .secret
            .as_deref()
            .map(resolve_secret)
            .filter(|s| !s.is_empty())
    }

    /// Resolved session sealing key
    #[must_use]
    pub fn session_secret(&self) -> Option<String> {
        self.session
            .secret
            .as_deref()
            .map(resolve_secret)
            .filter(|s| !s.is_empty())
            .or_else(|| self.csrf_secret())
    }

    /// Upstream base URL without a trailing slash
    #[must_use]
    pub fn upstream_base_url(&self) -> String {
        self.upstream
            .base_url
            .as_deref()
            .unwrap_or_default()
            .trim()
            .trim_end_matches('/')
            .to_string()
    }

    /// Summary safe to print: secrets replaced by a marker
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |s: &mut Option<String>| {
            if s.is_some() {
                *s = Some("<redacted>".to_string());
            }
        };
        mask(&mut copy.csrf.secret);
        mask(&mut copy.session.secret);
        mask(&mut copy.upstream.api_token);
        if let RateLimitStore::Rest { token, .. } = &mut copy.rate_limit.store {
            mask(token);
        }
        copy
    }
}

/// Expand `env:VAR` indirection; other values are returned as-is
#[must_use]
pub fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Config {
        let mut config = Config::default();
        config.csrf.secret = Some("csrf-secret".to_string());
        config.upstream.base_url = Some("https://cms.example.com/api/".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.csrf.ttl, Duration::from_secs(3600));
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert!(!config.rate_limit.trust_forwarded_headers);
        assert_eq!(config.upstream.timeout, Duration::from_secs(8));
        assert_eq!(config.listing.s_maxage, 900);
        assert_eq!(config.listing.stale_while_revalidate, 3600);
    }

    #[test]
    fn test_validate_reports_all_missing_keys() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("csrf.secret"));
        assert!(err.contains("upstream.base_url"));
        assert!(!err.contains("session.cookie_name"));
    }

    #[test]
    fn test_validate_names_every_required_key() {
        let mut config = Config::default();
        config.csrf.cookie_name = String::new();
        config.session.cookie_name = " ".to_string();
        let err = config.validate().unwrap_err().to_string();
        for key in REQUIRED_KEYS {
            assert!(err.contains(key), "{key} not reported in: {err}");
        }
    }

    #[test]
    fn test_validate_complete_config() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn test_validate_rest_store_needs_credentials() {
        let mut config = complete();
        config.rate_limit.store = RateLimitStore::Rest {
            url: Some("https://redis.example.com".to_string()),
            token: None,
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("rate_limit.store.token"));
        assert!(!err.contains("rate_limit.store.url"));
    }

    #[test]
    fn test_session_secret_falls_back_to_csrf_secret() {
        let config = complete();
        assert_eq!(config.session_secret().as_deref(), Some("csrf-secret"));
    }

    #[test]
    fn test_upstream_base_url_trims_slash() {
        assert_eq!(complete().upstream_base_url(), "https://cms.example.com/api");
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let redacted = complete().redacted();
        assert_eq!(redacted.csrf.secret.as_deref(), Some("<redacted>"));
        assert!(redacted.session.secret.is_none());
    }

    #[test]
    fn test_load_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(
            &path,
            r#"
server:
  port: 8080
  production: true
csrf:
  secret: from-file
upstream:
  base_url: https://cms.example.com/api
  timeout: 3s
rate_limit:
  store:
    type: rest
    url: https://redis.example.com
    token: abc
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.production);
        assert_eq!(config.upstream.timeout, Duration::from_secs(3));
        assert!(matches!(config.rate_limit.store, RateLimitStore::Rest { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

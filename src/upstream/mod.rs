//! Remote identity/content provider (Strapi)
//!
//! Calls are single-shot: no retries, each one raced against the configured
//! timeout. Non-success answers are normalized through
//! [`error_map::map_provider_error`] before they leave this module.

pub mod error_map;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{Config, resolve_secret};
use crate::timeout::with_timeout;
use crate::{Error, Result};

pub use error_map::map_provider_error;

/// Fields of a user record safe to return to the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    /// Provider user id
    pub id: u64,
    /// Display name
    pub username: String,
    /// Email address
    pub email: String,
}

/// Successful credential exchange
#[derive(Debug, Clone, Deserialize)]
pub struct AuthGrant {
    /// Bearer credential issued by the provider
    pub jwt: String,
    /// Authenticated user (extra provider fields are discarded)
    pub user: PublicUser,
}

/// Operations the gateway needs from the provider
#[async_trait]
pub trait Provider: Send + Sync {
    /// `POST /auth/local`
    async fn login(&self, identifier: &str, password: &str) -> Result<AuthGrant>;

    /// `GET /users/me` with the bearer attached, never served from a cache
    async fn me(&self, bearer: &str) -> Result<PublicUser>;

    /// `POST /auth/forgot-password`
    async fn forgot_password(&self, email: &str) -> Result<()>;

    /// `POST /auth/reset-password`
    async fn reset_password(
        &self,
        code: &str,
        password: &str,
        password_confirmation: &str,
    ) -> Result<()>;

    /// `GET /{resource}` with an already-sanitized query
    async fn list(&self, resource: &str, query: &[(String, String)]) -> Result<Value>;
}

/// HTTP implementation of [`Provider`]
pub struct StrapiClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    api_token: Option<String>,
}

impl std::fmt::Debug for StrapiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrapiClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StrapiClient {
    /// Create a client for `base_url` (the provider's API root)
    pub fn new(base_url: impl Into<String>, timeout: Duration, api_token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("magazine-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            api_token: api_token.filter(|t| !t.is_empty()),
        })
    }

    /// Build from validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.upstream_base_url(),
            config.upstream.timeout,
            config.upstream.api_token.as_deref().map(resolve_secret),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request and return its JSON body, mapping failures
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let call = async {
            let response = request.send().await.map_err(|e| {
                debug!(error = %e, what, "Upstream request failed");
                Error::Transport(format!("{what}: {e}"))
            })?;

            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::Transport(format!("{what}: {e}")))?;
            let parsed = serde_json::from_slice::<Value>(&bytes);

            if status.is_success() {
                // A 2xx that is not JSON is never relayed as data.
                parsed.map_err(|e| {
                    debug!(error = %e, %status, what, "Upstream success body is not JSON");
                    Error::Transport(format!("{what}: provider returned a non-JSON body"))
                })
            } else {
                let body = parsed.unwrap_or(Value::Null);
                let (status, message) = map_provider_error(status, &body);
                debug!(%status, what, "Upstream returned an error");
                Err(Error::Upstream { status, message })
            }
        };

        with_timeout(call, self.timeout, what).await
    }
}

#[async_trait]
impl Provider for StrapiClient {
    async fn login(&self, identifier: &str, password: &str) -> Result<AuthGrant> {
        let request = self
            .http
            .post(self.url("auth/local"))
            .json(&json!({ "identifier": identifier, "password": password }));

        let body = self.send(request, "login").await?;
        serde_json::from_value(body).map_err(|e| {
            Error::Internal(format!("unexpected login response shape: {e}"))
        })
    }

    async fn me(&self, bearer: &str) -> Result<PublicUser> {
        let request = self
            .http
            .get(self.url("users/me"))
            .bearer_auth(bearer)
            .header(header::CACHE_CONTROL, "no-store")
            .header(header::PRAGMA, "no-cache");

        let body = self.send(request, "identity lookup").await?;
        serde_json::from_value(body).map_err(|e| {
            Error::Internal(format!("unexpected identity response shape: {e}"))
        })
    }

    async fn forgot_password(&self, email: &str) -> Result<()> {
        let request = self
            .http
            .post(self.url("auth/forgot-password"))
            .json(&json!({ "email": email }));

        self.send(request, "forgot password").await.map(|_| ())
    }

    async fn reset_password(
        &self,
        code: &str,
        password: &str,
        password_confirmation: &str,
    ) -> Result<()> {
        let request = self
            .http
            .post(self.url("auth/reset-password"))
            .json(&json!({
                "code": code,
                "password": password,
                "passwordConfirmation": password_confirmation,
            }));

        self.send(request, "reset password").await.map(|_| ())
    }

    async fn list(&self, resource: &str, query: &[(String, String)]) -> Result<Value> {
        let mut request = self.http.get(self.url(resource)).query(query);
        if let Some(ref token) = self.api_token {
            request = request.bearer_auth(token);
        }
        self.send(request, "list").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = StrapiClient::new("https://cms.example.com/api/", Duration::from_secs(1), None).unwrap();
        assert_eq!(client.url("/auth/local"), "https://cms.example.com/api/auth/local");
        assert_eq!(client.url("users/me"), "https://cms.example.com/api/users/me");
    }

    #[test]
    fn test_grant_keeps_only_public_fields() {
        let grant: AuthGrant = serde_json::from_value(json!({
            "jwt": "bearer-value",
            "user": {
                "id": 7,
                "username": "ada",
                "email": "ada@example.com",
                "provider": "local",
                "confirmed": true,
                "blocked": false,
                "resetPasswordToken": "should-not-leak"
            }
        }))
        .unwrap();

        assert_eq!(grant.jwt, "bearer-value");
        assert_eq!(
            serde_json::to_value(&grant.user).unwrap(),
            json!({ "id": 7, "username": "ada", "email": "ada@example.com" })
        );
    }

    #[test]
    fn test_empty_api_token_ignored() {
        let client =
            StrapiClient::new("https://cms.example.com/api", Duration::from_secs(1), Some(String::new()))
                .unwrap();
        assert!(client.api_token.is_none());
    }
}

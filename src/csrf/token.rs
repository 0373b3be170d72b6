//! Anti-forgery token issuance and verification
//!
//! Tokens are stateless HS256 JWTs: validity is purely signature plus
//! `exp`. Each token carries a random `jti` so two tokens issued in the same
//! second still differ.

use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::{Error, Result};

/// Claims carried by an anti-forgery token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfClaims {
    /// Issued at (unix seconds)
    pub iat: u64,
    /// Expiry (unix seconds)
    pub exp: u64,
    /// Random nonce
    pub jti: String,
}

/// A freshly issued token and the cookie that carries it
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The signed token
    pub token: String,
    /// Cookie directive to send alongside
    pub cookie: Cookie<'static>,
}

/// Signs and verifies anti-forgery tokens
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    cookie_name: String,
    ttl: Duration,
    secure: bool,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("cookie_name", &self.cookie_name)
            .field("ttl", &self.ttl)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Create a token service with an explicit secret
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the secret is empty.
    pub fn new(secret: &str, cookie_name: impl Into<String>, ttl: Duration, secure: bool) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("csrf.secret must not be empty".to_string()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            cookie_name: cookie_name.into(),
            ttl,
            secure,
        })
    }

    /// Build from validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let secret = config
            .csrf_secret()
            .ok_or_else(|| Error::Config("csrf.secret is required".to_string()))?;
        Self::new(
            &secret,
            config.csrf.cookie_name.clone(),
            config.csrf.ttl,
            config.server.production,
        )
    }

    /// Name of the cookie carrying the token
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Issue a new token and its cookie directive
    pub fn issue(&self) -> Result<IssuedToken> {
        self.issue_at(jsonwebtoken::get_current_timestamp())
    }

    pub(crate) fn issue_at(&self, now: u64) -> Result<IssuedToken> {
        let claims = CsrfClaims {
            iat: now,
            exp: now + self.ttl.as_secs(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Signing(e.to_string()))?;

        let cookie = Cookie::build((self.cookie_name.clone(), token.clone()))
            .path("/")
            .http_only(false)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(cookie_max_age(self.ttl))
            .build();

        debug!(jti = %claims.jti, "Issued CSRF token");
        Ok(IssuedToken { token, cookie })
    }

    /// Verify signature and expiry
    pub fn verify(&self, token: &str) -> Result<CsrfClaims> {
        self.verify_at(token, jsonwebtoken::get_current_timestamp())
    }

    pub(crate) fn verify_at(&self, token: &str, now: u64) -> Result<CsrfClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = jsonwebtoken::decode::<CsrfClaims>(token, &self.decoding, &validation)
            .map_err(|e| {
                debug!(error = %e, "CSRF token failed verification");
                Error::Csrf(crate::error::CsrfRejection::Invalid)
            })?;

        // Expiry is checked here so it uses the same clock as issuance.
        if data.claims.exp <= now {
            debug!(exp = data.claims.exp, now, "CSRF token expired");
            return Err(Error::Csrf(crate::error::CsrfRejection::Invalid));
        }

        Ok(data.claims)
    }
}

fn cookie_max_age(ttl: Duration) -> time::Duration {
    time::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CsrfRejection;

    fn service() -> TokenService {
        TokenService::new("test-secret", "csrf_token", Duration::from_secs(3600), true).unwrap()
    }

    #[test]
    fn test_issue_then_verify() {
        let svc = service();
        let issued = svc.issue().unwrap();
        let claims = svc.verify(&issued.token).unwrap();
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_cookie_attributes() {
        let issued = service().issue().unwrap();
        let cookie = &issued.cookie;
        assert_eq!(cookie.name(), "csrf_token");
        assert_eq!(cookie.value(), issued.token);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(false));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(3600)));
    }

    #[test]
    fn test_insecure_cookie_outside_production() {
        let svc =
            TokenService::new("test-secret", "csrf_token", Duration::from_secs(3600), false).unwrap();
        assert_eq!(svc.issue().unwrap().cookie.secure(), Some(false));
    }

    #[test]
    fn test_tokens_are_unique() {
        let svc = service();
        let now = 1_700_000_000;
        let a = svc.issue_at(now).unwrap();
        let b = svc.issue_at(now).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_expired_token_rejected() {
        let svc = service();
        let issued_at = 1_700_000_000;
        let issued = svc.issue_at(issued_at).unwrap();

        assert!(svc.verify_at(&issued.token, issued_at + 3599).is_ok());
        let err = svc.verify_at(&issued.token, issued_at + 3600).unwrap_err();
        assert!(matches!(err, Error::Csrf(CsrfRejection::Invalid)));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let other =
            TokenService::new("other-secret", "csrf_token", Duration::from_secs(3600), true).unwrap();
        let issued = other.issue().unwrap();
        assert!(matches!(
            service().verify(&issued.token),
            Err(Error::Csrf(CsrfRejection::Invalid))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(service().verify("not-a-token").is_err());
        assert!(service().verify("").is_err());
    }

    #[test]
    fn test_empty_secret_is_config_error() {
        let result = TokenService::new("", "csrf_token", Duration::from_secs(3600), true);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

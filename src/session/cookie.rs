//! Session cookie sealing
//!
//! The cookie value is `<bearer>.<mac>` where `mac` is the URL-safe base64
//! HMAC-SHA256 of the bearer under the session key. The bearer itself is
//! opaque to us (a provider JWT), so only integrity is added here.

use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Seals bearer credentials into session cookies and opens them again
#[derive(Clone)]
pub struct SessionSealer {
    key: Vec<u8>,
    cookie_name: String,
    max_age: Duration,
    secure: bool,
}

impl std::fmt::Debug for SessionSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSealer")
            .field("cookie_name", &self.cookie_name)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionSealer {
    /// Create a sealer
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is empty.
    pub fn new(
        key: &str,
        cookie_name: impl Into<String>,
        max_age: Duration,
        secure: bool,
    ) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::Config("session secret must not be empty".to_string()));
        }
        Ok(Self {
            key: key.as_bytes().to_vec(),
            cookie_name: cookie_name.into(),
            max_age,
            secure,
        })
    }

    /// Cookie name
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn mac(&self, bearer: &str) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::Signing(format!("invalid session key: {e}")))?;
        mac.update(bearer.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Seal a bearer credential into a cookie value
    pub fn seal(&self, bearer: &str) -> Result<String> {
        let tag = URL_SAFE_NO_PAD.encode(self.mac(bearer)?);
        Ok(format!("{bearer}.{tag}"))
    }

    /// Recover the bearer from a sealed value. Any defect yields `None`.
    #[must_use]
    pub fn unseal(&self, value: &str) -> Option<String> {
        let (bearer, tag) = value.rsplit_once('.')?;
        if bearer.is_empty() {
            return None;
        }
        let presented = URL_SAFE_NO_PAD.decode(tag).ok()?;
        let expected = self.mac(bearer).ok()?;

        if bool::from(expected.ct_eq(&presented)) {
            Some(bearer.to_string())
        } else {
            None
        }
    }

    /// Cookie carrying a sealed session
    pub fn session_cookie(&self, bearer: &str) -> Result<Cookie<'static>> {
        let max_age = time::Duration::seconds(i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX));
        Ok(Cookie::build((self.cookie_name.clone(), self.seal(bearer)?))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .build())
    }

    /// Cookie that clears the session.
    ///
    /// Add it to the response jar rather than calling `CookieJar::remove`,
    /// which emits nothing when the request carried no session.
    #[must_use]
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build((self.cookie_name.clone(), ""))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build();
        cookie.make_removal();
        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> SessionSealer {
        SessionSealer::new("session-key", "session", Duration::from_secs(3600), true).unwrap()
    }

    const BEARER: &str = "eyJhbGciOiJIUzI1NiJ9.eyJpZCI6MX0.c2lnbmF0dXJl";

    #[test]
    fn test_seal_unseal() {
        let s = sealer();
        let sealed = s.seal(BEARER).unwrap();
        assert!(sealed.starts_with(BEARER));
        assert_eq!(s.unseal(&sealed).as_deref(), Some(BEARER));
    }

    #[test]
    fn test_tampered_bearer_rejected() {
        let s = sealer();
        let sealed = s.seal(BEARER).unwrap();
        let tampered = sealed.replacen("eyJpZCI6MX0", "eyJpZCI6Mn0", 1);
        assert!(s.unseal(&tampered).is_none());
    }

    #[test]
    fn test_other_key_rejected() {
        let other = SessionSealer::new("other", "session", Duration::from_secs(1), true).unwrap();
        let sealed = other.seal(BEARER).unwrap();
        assert!(sealer().unseal(&sealed).is_none());
    }

    #[test]
    fn test_malformed_values() {
        let s = sealer();
        assert!(s.unseal("").is_none());
        assert!(s.unseal("no-dot").is_none());
        assert!(s.unseal(".tag").is_none());
        assert!(s.unseal("bearer.!!!").is_none());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = sealer().session_cookie(BEARER).unwrap();
        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_ne!(cookie.value(), BEARER);
    }

    #[test]
    fn test_removal_cookie_expires() {
        let cookie = sealer().removal_cookie();
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO));
        assert_eq!(cookie.path(), Some("/"));
    }
}

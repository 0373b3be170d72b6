//! Double-submit validation and the middleware that enforces it
//!
//! A mutating request proceeds only when the header copy and the cookie copy
//! of the token are present, byte-identical, and signature-valid.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use super::token::TokenService;
use crate::Error;
use crate::error::CsrfRejection;

/// Check a double-submitted token pair.
///
/// Order matters: absence, then mismatch, then signature/expiry.
pub fn validate(
    service: &TokenService,
    header_token: Option<&str>,
    cookie_token: Option<&str>,
) -> Result<(), CsrfRejection> {
    let (Some(header_token), Some(cookie_token)) = (header_token, cookie_token) else {
        return Err(CsrfRejection::Missing);
    };
    if header_token.is_empty() || cookie_token.is_empty() {
        return Err(CsrfRejection::Missing);
    }

    if header_token != cookie_token {
        return Err(CsrfRejection::Mismatch);
    }

    service
        .verify(header_token)
        .map(|_| ())
        .map_err(|_| CsrfRejection::Invalid)
}

/// State for [`csrf_middleware`]
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    /// Token service shared with the issuance handler
    pub service: Arc<TokenService>,
    /// Header the client echoes the token in
    pub header_name: String,
}

impl CsrfGuard {
    /// Create a guard
    #[must_use]
    pub fn new(service: Arc<TokenService>, header_name: impl Into<String>) -> Self {
        Self {
            service,
            header_name: header_name.into(),
        }
    }

    /// Validate the tokens attached to a request
    pub fn check(&self, request: &Request<Body>) -> Result<(), CsrfRejection> {
        let header_token = request
            .headers()
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok());

        let jar = CookieJar::from_headers(request.headers());
        let cookie_token = jar.get(self.service.cookie_name()).map(|c| c.value());

        validate(&self.service, header_token, cookie_token)
    }
}

/// Whether requests with this method change state
#[must_use]
pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Rejects mutating requests that fail the double-submit check.
/// Safe methods pass through untouched.
pub async fn csrf_middleware(
    State(guard): State<Arc<CsrfGuard>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    match guard.check(&request) {
        Ok(()) => {
            debug!(path = %request.uri().path(), "CSRF check passed");
            next.run(request).await
        }
        Err(rejection) => Error::Csrf(rejection).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn service() -> TokenService {
        TokenService::new("guard-secret", "csrf_token", Duration::from_secs(3600), false).unwrap()
    }

    #[test]
    fn test_fresh_token_pair_accepted() {
        let svc = service();
        let token = svc.issue().unwrap().token;
        assert_eq!(validate(&svc, Some(&token), Some(&token)), Ok(()));
    }

    #[test]
    fn test_missing_either_side() {
        let svc = service();
        let token = svc.issue().unwrap().token;
        assert_eq!(validate(&svc, None, Some(&token)), Err(CsrfRejection::Missing));
        assert_eq!(validate(&svc, Some(&token), None), Err(CsrfRejection::Missing));
        assert_eq!(validate(&svc, None, None), Err(CsrfRejection::Missing));
        assert_eq!(validate(&svc, Some(""), Some("")), Err(CsrfRejection::Missing));
    }

    #[test]
    fn test_distinct_valid_tokens_mismatch() {
        let svc = service();
        let t1 = svc.issue().unwrap().token;
        let t2 = svc.issue().unwrap().token;
        assert_ne!(t1, t2);
        assert_eq!(validate(&svc, Some(&t1), Some(&t2)), Err(CsrfRejection::Mismatch));
    }

    #[test]
    fn test_no_normalization_before_compare() {
        let svc = service();
        let token = svc.issue().unwrap().token;
        let padded = format!(" {token}");
        assert_eq!(
            validate(&svc, Some(&padded), Some(&token)),
            Err(CsrfRejection::Mismatch)
        );
    }

    #[test]
    fn test_matching_forged_pair_invalid() {
        let svc = service();
        assert_eq!(
            validate(&svc, Some("forged"), Some("forged")),
            Err(CsrfRejection::Invalid)
        );
    }

    #[test]
    fn test_expired_pair_invalid() {
        let svc = service();
        let issued = svc.issue_at(1_000_000).unwrap().token;
        assert_eq!(
            validate(&svc, Some(&issued), Some(&issued)),
            Err(CsrfRejection::Invalid)
        );
    }

    #[test]
    fn test_mutating_methods() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
        assert!(!is_mutating(&Method::OPTIONS));
    }

    #[test]
    fn test_guard_reads_header_and_cookie() {
        let svc = Arc::new(service());
        let token = svc.issue().unwrap().token;
        let guard = CsrfGuard::new(Arc::clone(&svc), "x-csrf-token");

        let request = Request::post("/session/login")
            .header("x-csrf-token", &token)
            .header("cookie", format!("other=1; csrf_token={token}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(guard.check(&request), Ok(()));

        let request = Request::post("/session/login")
            .header("cookie", format!("csrf_token={token}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(guard.check(&request), Err(CsrfRejection::Missing));
    }
}

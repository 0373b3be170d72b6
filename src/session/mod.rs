//! Session management: `anonymous → authenticated → anonymous`
//!
//! The provider's bearer credential lives only inside the sealed, http-only
//! session cookie. Response bodies carry the public user subset and nothing
//! else.

pub mod cookie;
pub mod requests;

use std::sync::Arc;

use axum::http::StatusCode;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::{debug, info};

use crate::config::Config;
use crate::upstream::{Provider, PublicUser};
use crate::{Error, Result};

pub use cookie::SessionSealer;
pub use requests::{ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, parse_body};

/// Message returned by `forgot`, whether or not the account exists
pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";

/// Message returned after a successful reset
pub const RESET_PASSWORD_MESSAGE: &str = "Your password has been reset";

/// Message returned by `logout`
pub const LOGOUT_MESSAGE: &str = "Logged out";

/// Exchanges credentials with the provider and manages the session cookie
pub struct SessionManager {
    provider: Arc<dyn Provider>,
    sealer: SessionSealer,
}

impl SessionManager {
    /// Create a session manager
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, sealer: SessionSealer) -> Self {
        Self { provider, sealer }
    }

    /// Build from validated configuration
    pub fn from_config(provider: Arc<dyn Provider>, config: &Config) -> Result<Self> {
        let key = config
            .session_secret()
            .ok_or_else(|| Error::Config("session.secret is required".to_string()))?;
        let sealer = SessionSealer::new(
            &key,
            config.session.cookie_name.clone(),
            config.session.max_age,
            config.server.production,
        )?;
        Ok(Self::new(provider, sealer))
    }

    /// Exchange credentials for a session cookie
    pub async fn login(&self, request: LoginRequest) -> Result<(PublicUser, Cookie<'static>)> {
        let identifier = required(request.identifier, "identifier", "Identifier is required")?;
        let password = required(request.password, "password", "Password is required")?;

        let grant = self.provider.login(&identifier, &password).await?;
        let cookie = self.sealer.session_cookie(&grant.jwt)?;

        info!(user_id = grant.user.id, "User logged in");
        Ok((grant.user, cookie))
    }

    /// Resolve the caller from the session cookie
    pub async fn me(&self, jar: &CookieJar) -> Result<PublicUser> {
        let Some(raw) = jar.get(self.sealer.cookie_name()) else {
            return Err(Error::Unauthenticated);
        };
        let Some(bearer) = self.sealer.unseal(raw.value()) else {
            debug!("Session cookie failed verification");
            return Err(Error::Unauthenticated);
        };

        self.provider.me(&bearer).await
    }

    /// Cookie directive that ends the session. Always succeeds.
    #[must_use]
    pub fn logout(&self) -> Cookie<'static> {
        self.sealer.removal_cookie()
    }

    /// Ask the provider to send a reset email.
    ///
    /// Provider rejections are swallowed so the answer never reveals whether
    /// the account exists; transport failures and provider outages still
    /// surface.
    pub async fn forgot_password(&self, request: ForgotPasswordRequest) -> Result<&'static str> {
        let email = required(request.email, "email", "Email is required")?;

        match self.provider.forgot_password(&email).await {
            Ok(()) => {}
            Err(Error::Upstream { status, .. })
                if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS =>
            {
                debug!(%status, "Provider rejected forgot-password request; not disclosed");
            }
            Err(e) => return Err(e),
        }

        Ok(FORGOT_PASSWORD_MESSAGE)
    }

    /// Complete a reset with the emailed code
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<&'static str> {
        request.check()?;
        let code = required(request.code, "code", "Reset code is required")?;
        let password = required(request.password, "password", "Password is required")?;
        let confirmation = required(
            request.password_confirmation,
            "passwordConfirmation",
            "Password confirmation is required",
        )?;

        self.provider
            .reset_password(&code, &password, &confirmation)
            .await?;
        Ok(RESET_PASSWORD_MESSAGE)
    }
}

/// Unwrap a request field, reporting it by its JSON name when absent
fn required(value: Option<String>, field: &str, problem: &str) -> Result<String> {
    value.ok_or_else(|| Error::field(field, problem))
}

//! Request bodies accepted by the session and password routes

use serde::Deserialize;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::{Error, Result};

/// `POST /session/login`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct LoginRequest {
    /// Username or email
    #[validate(
        required(message = "Identifier is required"),
        length(min = 1, message = "Identifier is required")
    )]
    pub identifier: Option<String>,
    /// Password
    #[validate(
        required(message = "Password is required"),
        length(min = 1, message = "Password is required")
    )]
    pub password: Option<String>,
}

/// `POST /password/forgot`
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    /// Address to send the reset link to
    #[validate(
        required(message = "Email is required"),
        email(message = "Email must be a valid email address")
    )]
    pub email: Option<String>,
}

/// `POST /password/reset`
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    /// Code from the reset email
    #[validate(
        required(message = "Reset code is required"),
        length(min = 1, message = "Reset code is required")
    )]
    pub code: Option<String>,
    /// New password
    #[validate(
        required(message = "Password is required"),
        length(min = 6, message = "Password must be at least 6 characters")
    )]
    pub password: Option<String>,
    /// New password, repeated
    #[validate(required(message = "Password confirmation is required"))]
    pub password_confirmation: Option<String>,
}

impl ResetPasswordRequest {
    /// Shape checks plus the cross-field confirmation check
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.password != self.password_confirmation {
            return Err(Error::field("passwordConfirmation", "Passwords do not match"));
        }
        Ok(())
    }
}

/// Parse and shape-check a JSON body. An empty body is treated as `{}` so
/// that missing fields are reported individually.
pub fn parse_body<T>(body: &[u8]) -> Result<T>
where
    T: DeserializeOwned + Validate + Default,
{
    let parsed: T = if body.iter().all(u8::is_ascii_whitespace) {
        T::default()
    } else {
        serde_json::from_slice(body).map_err(|e| {
            tracing::debug!(error = %e, "Rejected malformed JSON body");
            Error::Validation {
                message: "Request body must be a JSON object with string fields".to_string(),
                fields: crate::error::FieldErrors::new(),
            }
        })?
    };

    parsed.validate()?;
    Ok(parsed)
}

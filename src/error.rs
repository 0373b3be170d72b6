//! Error types for the magazine gateway
//!
//! Every failure a handler can hit is funnelled into [`Error`], which knows
//! the HTTP status it maps to and how to render itself as the JSON body the
//! browser sees. Internal detail is logged, not returned.

use std::collections::BTreeMap;
use std::io;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Field name → human readable problems with that field
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Why an anti-forgery check refused a request.
///
/// The reason is kept for logs only; every variant renders the same 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfRejection {
    /// Header or cookie copy absent
    Missing,
    /// Header and cookie copies differ
    Mismatch,
    /// Signature or expiry check failed
    Invalid,
}

impl CsrfRejection {
    /// Short diagnostic label
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Mismatch => "mismatch",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for CsrfRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request body or query
    #[error("Validation failed: {message}")]
    Validation {
        /// Summary shown to the caller
        message: String,
        /// Per-field problems
        fields: FieldErrors,
    },

    /// Request body over the configured limit
    #[error("Request body too large")]
    PayloadTooLarge,

    /// Anti-forgery check failed
    #[error("CSRF rejection: {0}")]
    Csrf(CsrfRejection),

    /// No session, or a session cookie that failed verification
    #[error("Not authenticated")]
    Unauthenticated,

    /// Client exceeded its request budget
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Seconds until the window resets
        retry_after: u64,
    },

    /// Error reported by the identity/content provider, already normalized
    #[error("Upstream error {status}: {message}")]
    Upstream {
        /// Status to return to the caller
        status: StatusCode,
        /// Message to return to the caller
        message: String,
    },

    /// An outbound call ran past its budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Connection-level failure talking to a remote service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Token signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a validation error for a single field
    pub fn field(field: impl Into<String>, problem: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), vec![problem.into()]);
        Self::Validation {
            message: "Invalid request".to_string(),
            fields,
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Csrf(_) => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream { status, .. } => *status,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::Signing(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the caller
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation { message, .. } | Self::Upstream { message, .. } => message.clone(),
            Self::PayloadTooLarge => "Request body too large".to_string(),
            Self::Csrf(_) => "Invalid CSRF token".to_string(),
            Self::Unauthenticated => "Not authenticated".to_string(),
            Self::RateLimited { .. } => "Too many requests, please try again later".to_string(),
            Self::Timeout(_) => "Upstream request timed out".to_string(),
            Self::Transport(_) | Self::Http(_) => "Upstream service unavailable".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::Csrf(reason) => warn!(reason = %reason, "CSRF check failed"),
            Self::Upstream { message, .. } if status.is_server_error() => {
                warn!(status = %status, message = %message, "Upstream reported failure");
            }
            Self::Upstream { .. } => {}
            _ if status.is_server_error() => error!(error = %self, "Request failed"),
            _ => {}
        }

        let body = match &self {
            Self::Validation { message, fields } => json!({
                "error": message,
                "details": fields,
            }),
            _ => json!({ "error": self.public_message() }),
        };

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, problems)| {
                let messages = problems
                    .iter()
                    .map(|p| {
                        p.message
                            .as_ref()
                            .map_or_else(|| p.code.to_string(), ToString::to_string)
                    })
                    .collect();
                (wire_name(&field), messages)
            })
            .collect();

        Self::Validation {
            message: "Invalid request".to_string(),
            fields,
        }
    }
}

/// JSON bodies are camelCase while validator reports Rust field names.
fn wire_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = !name.is_empty();
        } else if upper {
            name.extend(c.to_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name
}

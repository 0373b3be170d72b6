//! Magazine Gateway Library
//!
//! Edge-trust layer between browsers and a headless CMS (Strapi).
//!
//! # Features
//!
//! - **CSRF**: Signed double-submit tokens, enforced on every mutating route
//! - **Sessions**: Provider bearer credentials sealed into http-only cookies
//! - **Rate limiting**: Per-client windows, in memory or in a shared Redis
//! - **List proxy**: Sanitized pagination/filters with CDN cache hints
//! - **Error mapping**: Provider error envelopes normalized to `(status, message)`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod csrf;
pub mod error;
pub mod gateway;
pub mod listing;
pub mod rate_limit;
pub mod session;
pub mod timeout;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}

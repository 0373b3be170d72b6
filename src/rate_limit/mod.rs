//! Per-client admission control for sensitive routes
//!
//! A fixed budget of requests per window per client key. Counting is
//! delegated to a [`WindowStore`] so that the in-memory store can be swapped
//! for a shared one without touching callers.

mod memory;
mod rest;

pub use memory::MemoryWindowStore;
pub use rest::RestWindowStore;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::config::{RateLimitConfig, RateLimitStore, resolve_secret};
use crate::{Error, Result};

/// Counter state after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// Time until the window resets
    pub resets_in: Duration,
}

/// Atomic increment-with-expiry counter storage
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Increment the counter for `key`, starting a new window of length
    /// `window` if none is live. Must be atomic across concurrent callers.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount>;

    /// Drop windows that have expired. Stores with native expiry need not
    /// do anything.
    async fn purge_expired(&self) {}
}

/// Outcome of [`RateLimiter::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed
    Allowed {
        /// Requests left in this window
        remaining: u64,
    },
    /// Budget exhausted
    Denied {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the request may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Window rate limiter
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    max_requests: u64,
    window: Duration,
    enabled: bool,
    trust_forwarded_headers: bool,
}

impl RateLimiter {
    /// Create a limiter over `store`
    #[must_use]
    pub fn new(store: Arc<dyn WindowStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
            enabled: true,
            trust_forwarded_headers: false,
        }
    }

    /// Key clients on forwarding headers set by a trusted proxy
    #[must_use]
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// Build from configuration, choosing the store it names
    pub fn from_config(config: &RateLimitConfig, store_timeout: Duration) -> Result<Self> {
        let store: Arc<dyn WindowStore> = match &config.store {
            RateLimitStore::Memory => Arc::new(MemoryWindowStore::new()),
            RateLimitStore::Rest { url, token } => {
                let url = url.as_deref().map(resolve_secret).unwrap_or_default();
                let token = token.as_deref().map(resolve_secret).unwrap_or_default();
                if config.enabled && (url.is_empty() || token.is_empty()) {
                    return Err(Error::Config(
                        "rate_limit.store requires url and token".to_string(),
                    ));
                }
                Arc::new(RestWindowStore::new(url, token, store_timeout)?)
            }
        };

        let mut limiter = Self::new(store, config.max_requests, config.window)
            .trust_forwarded_headers(config.trust_forwarded_headers);
        limiter.enabled = config.enabled;
        Ok(limiter)
    }

    /// Let the store reclaim expired windows
    pub async fn purge_expired(&self) {
        self.store.purge_expired().await;
    }

    /// Whether limiting is active
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count a request from `client_key` and decide whether it may proceed.
    ///
    /// A store failure admits the request: an outage of the counter store
    /// must not lock every user out.
    pub async fn admit(&self, client_key: &str) -> Admission {
        if !self.enabled {
            return Admission::Allowed {
                remaining: self.max_requests,
            };
        }

        match self.store.increment(client_key, self.window).await {
            Ok(counted) if counted.count <= self.max_requests => Admission::Allowed {
                remaining: self.max_requests - counted.count,
            },
            Ok(counted) => {
                debug!(client = client_key, count = counted.count, "Rate limit exceeded");
                Admission::Denied {
                    retry_after: counted.resets_in,
                }
            }
            Err(e) => {
                warn!(error = %e, "Rate limit store unavailable, admitting request");
                Admission::Allowed { remaining: 0 }
            }
        }
    }
}

/// Client key for a request.
///
/// The socket peer address, unless `trust_forwarded` is set, in which case the
/// first `X-Forwarded-For` hop, then `X-Real-IP`, take precedence. Forwarding
/// headers are client-controlled without a proxy that rewrites them.
#[must_use]
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let peer_key = || {
        peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
    };
    if !trust_forwarded {
        return peer_key();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map_or_else(peer_key, ToString::to_string)
}

/// Rejects requests over budget before they reach any handler
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer, limiter.trust_forwarded_headers);

    match limiter.admit(&key).await {
        Admission::Allowed { .. } => next.run(request).await,
        Admission::Denied { retry_after } => {
            warn!(client = %key, path = %request.uri().path(), "Rate limited");
            Error::RateLimited {
                retry_after: retry_after.as_secs().max(1),
            }
            .into_response()
        }
    }
}

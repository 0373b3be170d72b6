//! Gateway server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::config::{Config, RateLimitStore};
use crate::csrf::{CsrfGuard, TokenService};
use crate::listing::ListProxy;
use crate::rate_limit::RateLimiter;
use crate::session::SessionManager;
use crate::upstream::{Provider, StrapiClient};
use crate::{Error, Result};

/// How often expired in-memory rate-limit windows are reclaimed
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Build application state from validated configuration.
///
/// Fails fast on missing configuration so no request ever sees a half-built
/// gateway.
pub fn build_state(config: &Config, provider: Arc<dyn Provider>) -> Result<Arc<AppState>> {
    config.validate()?;

    let tokens = Arc::new(TokenService::from_config(config)?);
    let csrf_guard = Arc::new(CsrfGuard::new(
        Arc::clone(&tokens),
        config.csrf.header_name.clone(),
    ));
    let sessions = Arc::new(SessionManager::from_config(Arc::clone(&provider), config)?);
    let listings = Arc::new(ListProxy::new(provider, config.listing.clone())?);
    let rate_limiter = Arc::new(RateLimiter::from_config(
        &config.rate_limit,
        config.upstream.timeout,
    )?);

    Ok(Arc::new(AppState {
        tokens,
        csrf_guard,
        sessions,
        listings,
        rate_limiter,
        max_body_size: config.server.max_body_size,
    }))
}

/// Magazine gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Application state
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a gateway talking to the configured Strapi instance
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let provider: Arc<dyn Provider> = Arc::new(StrapiClient::from_config(&config)?);
        Self::with_provider(config, provider)
    }

    /// Create a gateway over an arbitrary provider
    pub fn with_provider(config: Config, provider: Arc<dyn Provider>) -> Result<Self> {
        let state = build_state(&config, provider)?;
        Ok(Self { config, state })
    }

    /// Run the gateway until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        if self.state.rate_limiter.is_enabled()
            && matches!(self.config.rate_limit.store, RateLimitStore::Memory)
        {
            let limiter = Arc::clone(&self.state.rate_limiter);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    tokio::select! {
                        _ = interval.tick() => limiter.purge_expired().await,
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("MAGAZINE GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(upstream = %self.config.upstream_base_url(), timeout = ?self.config.upstream.timeout, "Upstream provider");
        if self.config.rate_limit.enabled {
            info!(
                max_requests = self.config.rate_limit.max_requests,
                window = ?self.config.rate_limit.window,
                store = match self.config.rate_limit.store {
                    RateLimitStore::Memory => "memory",
                    RateLimitStore::Rest { .. } => "rest",
                },
                "Rate limiting enabled"
            );
        } else {
            warn!("Rate limiting disabled");
        }
        if !self.config.server.production {
            warn!("Development mode: cookies are sent without the Secure attribute");
        }
        info!("============================================================");

        let shutdown_timeout = self.config.server.shutdown_timeout;
        let draining = Arc::new(Notify::new());
        let signal_draining = Arc::clone(&draining);
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_draining.notify_one();
        })
        .into_future();

        // In-flight requests get `shutdown_timeout` to finish once the
        // signal arrives.
        tokio::select! {
            result = serve => result?,
            () = async {
                draining.notified().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => warn!(timeout = ?shutdown_timeout, "Graceful shutdown timed out, dropping connections"),
        }

        let _ = shutdown_tx.send(());
        info!("Gateway shutdown complete");
        Ok(())
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

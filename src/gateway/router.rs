//! HTTP router and handlers

use std::sync::Arc;

use std::any::Any;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, RawQuery, State, rejection::BytesRejection},
    http::{HeaderName, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};

use crate::error::FieldErrors;
use crate::{Error, Result};
use crate::csrf::{CsrfGuard, TokenService, csrf_middleware};
use crate::listing::ListProxy;
use crate::rate_limit::{RateLimiter, rate_limit_middleware};
use crate::session::{
    ForgotPasswordRequest, LOGOUT_MESSAGE, LoginRequest, ResetPasswordRequest, SessionManager,
    parse_body,
};
use crate::upstream::PublicUser;

/// Shared application state
pub struct AppState {
    /// Anti-forgery token issuance
    pub tokens: Arc<TokenService>,
    /// Double-submit enforcement
    pub csrf_guard: Arc<CsrfGuard>,
    /// Session lifecycle
    pub sessions: Arc<SessionManager>,
    /// List proxy
    pub listings: Arc<ListProxy>,
    /// Admission control for sensitive routes
    pub rate_limiter: Arc<RateLimiter>,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let csrf_guard = Arc::clone(&state.csrf_guard);
    let rate_limiter = Arc::clone(&state.rate_limiter);

    // Routes that reach the identity provider with caller-supplied secrets
    let sensitive = Router::new()
        .route("/session/login", post(login_handler))
        .route("/password/forgot", post(forgot_password_handler))
        .route("/password/reset", post(reset_password_handler))
        .route_layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/csrf-token", get(csrf_token_handler))
        .route("/session/logout", post(logout_handler))
        .route("/session/me", get(me_handler))
        .route("/cache/articles", get(articles_handler))
        .route("/cache/products", get(products_handler))
        .merge(sensitive)
        // Anti-forgery runs before rate limiting and before any handler
        .layer(middleware::from_fn_with_state(csrf_guard, csrf_middleware))
        .layer(DefaultBodyLimit::max(state.max_body_size))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /csrf-token - issue a token and its readable cookie
async fn csrf_token_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    let issued = state.tokens.issue()?;
    Ok((
        jar.add(issued.cookie),
        [(header::CACHE_CONTROL, "no-store")],
        Json(json!({ "csrfToken": issued.token })),
    ))
}

/// POST /session/login
async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<(CookieJar, Json<PublicUser>)> {
    let request: LoginRequest = parse_body(&request_body(body)?)?;
    let (user, cookie) = state.sessions.login(request).await?;
    Ok((jar.add(cookie), Json(user)))
}

/// POST /session/logout - always succeeds and always clears the cookie
async fn logout_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<Value>) {
    (
        jar.add(state.sessions.logout()),
        Json(json!({ "message": LOGOUT_MESSAGE })),
    )
}

/// GET /session/me
async fn me_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    let user = state.sessions.me(&jar).await?;
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(user)))
}

/// POST /password/forgot
async fn forgot_password_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<Value>> {
    let request: ForgotPasswordRequest = parse_body(&request_body(body)?)?;
    let message = state.sessions.forgot_password(request).await?;
    Ok(Json(json!({ "message": message })))
}

/// POST /password/reset
async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<Value>> {
    let request: ResetPasswordRequest = parse_body(&request_body(body)?)?;
    let message = state.sessions.reset_password(request).await?;
    Ok(Json(json!({ "message": message })))
}

/// GET /cache/articles
async fn articles_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<impl IntoResponse> {
    list_response(&state, "articles", query.as_deref()).await
}

/// GET /cache/products
async fn products_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<impl IntoResponse> {
    list_response(&state, "products", query.as_deref()).await
}

async fn list_response(
    state: &AppState,
    resource: &str,
    raw_query: Option<&str>,
) -> Result<([(HeaderName, HeaderValue); 1], Json<Value>)> {
    let pairs = parse_query(raw_query.unwrap_or_default());
    let body = state.listings.fetch_list(resource, &pairs).await?;
    Ok((
        [(header::CACHE_CONTROL, state.listings.cache_control_header())],
        Json(body),
    ))
}

/// Buffered request body; extractor failures become JSON errors
fn request_body(body: std::result::Result<Bytes, BytesRejection>) -> Result<Bytes> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge
        } else {
            Error::Validation {
                message: rejection.body_text(),
                fields: FieldErrors::new(),
            }
        }
    })
}

/// Render a handler panic as the usual JSON 500
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    Error::Internal(format!("handler panicked: {detail}")).into_response()
}

/// Decode a query string into ordered pairs, keeping bracketed keys intact
fn parse_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

//! # Middleware Module
//!
//! Global rate limiting for the HTTP API, and routing of plain `OPTIONS`
//! requests around the CORS layer.
//!
//! ## Configuration
//!
//! - `FRESHPRESS_RATE_LIMIT`: Requests per second (default: 100, 0 disables)

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use freshpress_core::RestError;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;
use tower::ServiceExt;

const DEFAULT_RPS: NonZeroU32 = match NonZeroU32::new(100) {
    Some(rps) => rps,
    None => NonZeroU32::MIN,
};

pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// A limiter allowing `requests_per_second`; zero falls back to the default.
pub fn create_rate_limiter(requests_per_second: u32) -> GlobalRateLimiter {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(DEFAULT_RPS);
    Arc::new(RateLimiter::direct(Quota::per_second(rps)))
}

/// `FRESHPRESS_RATE_LIMIT`, or 100.
pub fn get_rate_limit_from_env() -> u32 {
    parse_rate_limit(std::env::var("FRESHPRESS_RATE_LIMIT").ok().as_deref())
}

fn parse_rate_limit(value: Option<&str>) -> u32 {
    value
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_RPS.get())
}

/// 429 once the global budget for the current second is spent.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if limiter.check().is_ok() {
        return next.run(request).await;
    }
    tracing::warn!(event = "rate_limited", path = %request.uri().path());
    let err = RestError::new("rest_too_many_requests", "Too Many Requests", 429);
    (StatusCode::TOO_MANY_REQUESTS, Json(err.to_json())).into_response()
}

// =============================================================================
// CORS PREFLIGHT
// =============================================================================

/// A CORS preflight carries `Origin` and `Access-Control-Request-Method`.
pub fn is_preflight(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::OPTIONS
        && headers.contains_key(header::ORIGIN)
        && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

/// The CORS layer answers every `OPTIONS` itself. Requests that are not
/// preflights are served by `api` directly so route introspection reaches
/// the dispatcher.
pub async fn options_introspection_middleware(
    State(api): State<Router>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::OPTIONS || is_preflight(request.method(), request.headers()) {
        return next.run(request).await;
    }
    match api.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

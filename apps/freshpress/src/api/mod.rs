//! # FreshPress HTTP API Module
//!
//! Mounts the REST pipeline on an axum router.
//!
//! ## Endpoints
//!
//! - `ANY /wp-json/{*route}` - REST API (`/wp-json/` is the index)
//! - `ANY /?rest_route={route}` - REST API without pretty permalinks
//! - `GET /health` - Health check
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `FRESHPRESS_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `FRESHPRESS_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//!
//! API keys come from the `[[users]]` table of the site configuration.

pub mod auth;
pub mod handlers;
pub mod middleware;
pub mod oembed;

pub use auth::{ApiKeys, CurrentUser};
pub use handlers::{HealthResponse, MAX_BODY_SIZE, REST_PREFIX};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use oembed::HttpOEmbedProvider;

use crate::config::Config;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{any, get},
};
use freshpress_core::{
    FreshPressError, MemoryStore, MemoryTransientCache, OEmbedProvider, Registry, RestServer,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: the dispatcher, the store and the key table.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<RestServer>,
    pub registry: Arc<Registry>,
    pub store: Arc<Mutex<MemoryStore>>,
    pub keys: ApiKeys,
    /// Written after each successful write request when set.
    pub snapshot: Option<PathBuf>,
}

impl AppState {
    /// Build the registry and route table from `config`. Configured users
    /// are upserted into `store` so they resolve as authors.
    pub fn new(
        config: &Config,
        mut store: MemoryStore,
        provider: Arc<dyn OEmbedProvider>,
    ) -> Result<Self, FreshPressError> {
        let registry = Arc::new(Registry::with_defaults(config.site.clone()));
        let server = RestServer::with_defaults(
            Arc::clone(&registry),
            Arc::new(MemoryTransientCache::new()),
            provider,
        )
        .map_err(|e| FreshPressError::RouteError(e.to_string()))?;
        for user in &config.users {
            store.insert_user(user.to_user());
        }
        Ok(Self {
            server: Arc::new(server),
            registry,
            store: Arc::new(Mutex::new(store)),
            keys: ApiKeys::from_users(&config.users),
            snapshot: config
                .storage
                .persist_on_write
                .then(|| config.storage.snapshot.clone()),
        })
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

fn exposed_headers() -> [HeaderName; 4] {
    [
        HeaderName::from_static("x-wp-total"),
        HeaderName::from_static("x-wp-totalpages"),
        header::LINK,
        header::ALLOW,
    ]
}

fn cors_for(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers(exposed_headers())
}

/// CORS from `FRESHPRESS_CORS_ORIGINS`: "*" allows everything, a list
/// allows those origins, unset means localhost only.
fn build_cors_layer() -> CorsLayer {
    match std::env::var("FRESHPRESS_CORS_ORIGINS").ok().as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (FRESHPRESS_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();
            if allowed.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in FRESHPRESS_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                cors_for(allowed)
            }
        }
        None => {
            tracing::info!("CORS: No FRESHPRESS_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    cors_for(origins)
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. Plain `OPTIONS` bypass (skips CORS, keeps everything below)
/// 3. CORS
/// 4. Body limit
/// 5. Rate limiting (if enabled)
/// 6. Authentication
pub fn create_router(state: AppState) -> Router {
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };
    if state.keys.is_empty() {
        tracing::warn!("No API users configured - every request runs as the anonymous caller");
    } else {
        tracing::info!("API key authentication enabled for {} users", state.keys.len());
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/", any(handlers::rest_route_handler))
        .route(REST_PREFIX, any(handlers::rest_handler))
        .route(&format!("{REST_PREFIX}/"), any(handlers::rest_handler))
        .route(&format!("{REST_PREFIX}/{{*route}}"), any(handlers::rest_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_auth_middleware,
        ));

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    let api = router
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    api.clone()
        .layer(build_cors_layer())
        .layer(axum_middleware::from_fn_with_state(
            api,
            middleware::options_introspection_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until Ctrl+C.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), FreshPressError> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| FreshPressError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("FreshPress HTTP server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| FreshPressError::IoError(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

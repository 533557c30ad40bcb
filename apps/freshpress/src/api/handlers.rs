//! # API Endpoint Handlers
//!
//! Translation between HTTP and the core envelope. Every REST call is
//! handed to the dispatcher on the blocking pool while holding the store
//! lock, so calls are processed one at a time.

use super::AppState;
use super::auth::CurrentUser;
use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use freshpress_core::{Method, RestError, RoleAuthorizer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;

/// Largest request body read (2 MiB).
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Mount point of the REST API.
pub const REST_PREFIX: &str = "/wp-json";

// =============================================================================
// HEALTH HANDLER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// REST HANDLERS
// =============================================================================

/// `/wp-json/...`: the route is the path below the mount point.
pub async fn rest_handler(State(state): State<AppState>, request: Request) -> Response {
    let route = request
        .uri()
        .path()
        .strip_prefix(REST_PREFIX)
        .unwrap_or("/")
        .to_string();
    dispatch(state, route, request).await
}

/// `/?rest_route=/wp/v2/posts`: the route travels in the query string.
pub async fn rest_route_handler(State(state): State<AppState>, request: Request) -> Response {
    let query = request.uri().query().unwrap_or_default();
    let route = url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "rest_route")
        .map(|(_, v)| v.into_owned());
    match route {
        Some(route) => dispatch(state, route, request).await,
        None => (StatusCode::OK, Json(HealthResponse::default())).into_response(),
    }
}

async fn dispatch(state: AppState, route: String, request: Request) -> Response {
    let user = request
        .extensions()
        .get::<CurrentUser>()
        .cloned()
        .unwrap_or_default();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(&RestError::new(
                "rest_request_too_large",
                "The request body is too large.",
                413,
            ));
        }
    };

    let rest_request = match build_request(
        parts.method.as_str(),
        &route,
        parts.uri.query(),
        &parts.headers,
        &bytes,
        remote,
    ) {
        Ok(req) => req,
        Err(err) => return error_response(&err),
    };
    let method = rest_request.method();

    let joined = tokio::task::spawn_blocking(move || {
        let mut store = state.store.blocking_lock();
        let auth = RoleAuthorizer::new(user.0, Arc::clone(&state.registry));
        let response = state.server.dispatch(rest_request, &mut *store, &auth);
        let writes = !matches!(method, Method::Get | Method::Head | Method::Options);
        if writes && !response.is_error() {
            if let Some(path) = &state.snapshot {
                if let Err(e) = crate::snapshot::save_store(path, &store) {
                    tracing::error!(event = "snapshot_failed", error = %e);
                }
            }
        }
        response
    })
    .await;

    match joined {
        Ok(response) => into_http(response),
        Err(e) => {
            tracing::error!(event = "dispatch_panicked", error = %e);
            error_response(&RestError::new(
                "rest_internal_error",
                "The request could not be completed.",
                500,
            ))
        }
    }
}

// =============================================================================
// REQUEST TRANSLATION
// =============================================================================

/// Build the pipeline request. Query strings and form bodies use bracket
/// syntax for lists (`a[]=1&a[]=2`) and maps (`meta[k]=v`). A POST may
/// carry the real method in `X-HTTP-Method-Override` or `_method`.
pub fn build_request(
    method: &str,
    route: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: &Bytes,
    remote: Option<String>,
) -> Result<freshpress_core::Request, RestError> {
    let query = query.map(parse_form).unwrap_or_default();

    let mut method = Method::parse(method).ok_or_else(|| {
        RestError::new(
            "rest_no_route",
            "No route was found matching the URL and request method",
            404,
        )
    })?;
    if method == Method::Post {
        let override_method = headers
            .get("x-http-method-override")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| query.get("_method").and_then(Value::as_str).map(str::to_string));
        if let Some(m) = override_method.and_then(|m| Method::parse(&m.to_uppercase())) {
            method = m;
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let body_params = if body.is_empty() {
        Map::new()
    } else if content_type.starts_with("application/json") {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                return Err(RestError::new(
                    "rest_invalid_json",
                    "Invalid JSON body passed.",
                    400,
                )
                .with_data("json_error_message", Value::String(e.to_string())));
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        parse_form(&String::from_utf8_lossy(body))
    } else {
        Map::new()
    };

    let path = if route.is_empty() { "/" } else { route };
    let mut req = freshpress_core::Request::new(method, path)
        .with_query(query)
        .with_body(body_params);
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            req.add_header(name.as_str(), value);
        }
    }
    if let Some(remote) = remote {
        req = req.with_remote_addr(remote);
    }
    Ok(req)
}

/// Decode `application/x-www-form-urlencoded` text into parameters.
pub fn parse_form(text: &str) -> Map<String, Value> {
    let mut params = Map::new();
    for (key, value) in url::form_urlencoded::parse(text.as_bytes()) {
        let value = Value::String(value.into_owned());
        let Some((name, rest)) = key.split_once('[') else {
            params.insert(key.into_owned(), value);
            continue;
        };
        let inner = rest.trim_end_matches(']');
        let slot = params.entry(name.to_string());
        if inner.is_empty() {
            let list = slot.or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = list {
                items.push(value);
            }
        } else {
            let map = slot.or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(entries) = map {
                entries.insert(inner.to_string(), value);
            }
        }
    }
    params
}

// =============================================================================
// RESPONSE TRANSLATION
// =============================================================================

pub fn error_response(err: &RestError) -> Response {
    into_http(freshpress_core::Response::from_error(err))
}

/// Convert a pipeline response. Repeated headers (`Link`) are appended.
pub fn into_http(response: freshpress_core::Response) -> Response {
    let status = StatusCode::from_u16(response.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    for (name, value) in response.headers() {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::warn!(event = "header_dropped", header = %name);
            continue;
        };
        headers.append(name, value);
    }
    (status, headers, Json(response.data().clone())).into_response()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn form_brackets_build_lists_and_maps() {
        let params = parse_form("include[]=1&include[]=2&meta[mood]=calm&search=a+b");
        assert_eq!(params["include"], json!(["1", "2"]));
        assert_eq!(params["meta"], json!({"mood": "calm"}));
        assert_eq!(params["search"], json!("a b"));
    }

    #[test]
    fn json_body_and_method_override() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-http-method-override", HeaderValue::from_static("delete"));
        let body = Bytes::from_static(br#"{"force": true}"#);
        let req = build_request("POST", "/wp/v2/posts/1", Some("context=edit"), &headers, &body, None).unwrap();
        assert_eq!(req.method(), Method::Delete);
        assert_eq!(req.get_body_params()["force"], json!(true));
        assert_eq!(req.get_query_params()["context"], json!("edit"));
        assert_eq!(req.get_header("content_type").as_deref(), Some("application/json"));
    }

    #[test]
    fn invalid_json_is_400() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let err = build_request("POST", "/", None, &headers, &Bytes::from_static(b"{"), None).unwrap_err();
        assert_eq!(err.code, "rest_invalid_json");
        assert_eq!(err.status, 400);
    }

    #[test]
    fn repeated_headers_survive_conversion() {
        let mut response = freshpress_core::Response::new(json!([]));
        response.link_header("next", "http://localhost/wp-json/wp/v2/posts?page=2", &[]);
        response.link_header("prev", "http://localhost/wp-json/wp/v2/posts?page=1", &[]);
        let http = into_http(response);
        assert_eq!(http.headers().get_all("link").iter().count(), 2);
        assert_eq!(http.status(), StatusCode::OK);
    }
}

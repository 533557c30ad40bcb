//! Integration tests for the FreshPress HTTP API.
//!
//! Uses axum-test to drive the router without binding a socket.

// Allow holding MutexGuard across await - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use freshpress::api::{AppState, HealthResponse, create_router};
use freshpress::config::Config;
use freshpress_core::{MemoryStore, NoProvider};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};

/// Serializes tests since the router reads env vars at construction.
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

const ADMIN_KEY: &str = "admin-key-0123456789";
const CONTRIBUTOR_KEY: &str = "contributor-key-0123456789";

const SITE: &str = r#"
[site]
name = "Test Site"
home = "http://example.org/"

[storage]
persist_on_write = false

[[users]]
id = 1
login = "admin"
email = "admin@example.org"
role = "administrator"
api_key = "admin-key-0123456789"

[[users]]
id = 2
login = "writer"
email = "writer@example.org"
role = "contributor"
api_key = "contributor-key-0123456789"
"#;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn create_test_server() -> (TestServer, MutexGuard<'static, ()>) {
    let guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe {
        std::env::remove_var("FRESHPRESS_CORS_ORIGINS");
        std::env::set_var("FRESHPRESS_RATE_LIMIT", "0");
    }
    let config = Config::from_toml(SITE).unwrap();
    let state = AppState::new(&config, MemoryStore::new(&config.site.home), Arc::new(NoProvider)).unwrap();
    (TestServer::new(create_router(state)).unwrap(), guard)
}

fn bearer(key: &str) -> HeaderValue {
    format!("Bearer {}", key).parse().unwrap()
}

fn header_str(response: &axum_test::TestResponse, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn create_post(server: &TestServer, title: &str) -> u64 {
    let response = server
        .post("/wp-json/wp/v2/posts")
        .add_header(header::AUTHORIZATION, bearer(ADMIN_KEY))
        .json(&json!({"title": title, "content": format!("{title} body"), "status": "publish"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["id"].as_u64().unwrap()
}

// =============================================================================
// HEALTH AND INDEX
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_index_lists_namespaces_and_routes() {
    let (server, _guard) = create_test_server();
    let response = server.get("/wp-json/").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], json!("Test Site"));
    assert_eq!(body["home"], json!("http://example.org"));
    assert!(body["namespaces"].as_array().unwrap().contains(&json!("wp/v2")));
    assert!(body["routes"]["/wp/v2/posts"].is_object());
}

#[tokio::test]
async fn test_rest_route_query_parameter() {
    let (server, _guard) = create_test_server();
    let response = server.get("/").add_query_param("rest_route", "/wp/v2/types").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["post"]["rest_base"], json!("posts"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (server, _guard) = create_test_server();
    let response = server.get("/wp-json/wp/v2/nothing-here").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("rest_no_route"));
    assert_eq!(body["data"]["status"], json!(404));
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

#[tokio::test]
async fn test_invalid_key_rejected() {
    let (server, _guard) = create_test_server();
    let response = server
        .get("/wp-json/wp/v2/posts")
        .add_header(header::AUTHORIZATION, bearer("not-a-configured-key"))
        .await;
    assert_eq!(response.status_code().as_u16(), 401);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("rest_not_logged_in"));
}

#[tokio::test]
async fn test_anonymous_cannot_create() {
    let (server, _guard) = create_test_server();
    let response = server
        .post("/wp-json/wp/v2/posts")
        .json(&json!({"title": "Nope"}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("rest_cannot_create"));
}

#[tokio::test]
async fn test_contributor_cannot_publish() {
    let (server, _guard) = create_test_server();
    let response = server
        .post("/wp-json/wp/v2/posts")
        .add_header(header::AUTHORIZATION, bearer(CONTRIBUTOR_KEY))
        .json(&json!({"title": "Mine", "status": "publish"}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("rest_cannot_publish"));
}

// =============================================================================
// POSTS
// =============================================================================

#[tokio::test]
async fn test_post_lifecycle() {
    let (server, _guard) = create_test_server();
    let id = create_post(&server, "Hello").await;

    let response = server.get(&format!("/wp-json/wp/v2/posts/{id}")).await;
    response.assert_status_ok();
    let post: Value = response.json();
    assert_eq!(post["title"]["rendered"], json!("Hello"));
    assert!(post.get("_links").is_some());
    assert!(header_str(&response, "allow").unwrap().contains("GET"));

    let response = server
        .put(&format!("/wp-json/wp/v2/posts/{id}"))
        .add_header(header::AUTHORIZATION, bearer(ADMIN_KEY))
        .json(&json!({"title": "Hello again"}))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["title"]["raw"], json!("Hello again"));

    let response = server
        .delete(&format!("/wp-json/wp/v2/posts/{id}"))
        .add_header(header::AUTHORIZATION, bearer(ADMIN_KEY))
        .add_query_param("force", "true")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["deleted"], json!(true));
    assert_eq!(body["previous"]["id"], json!(id));

    server
        .get(&format!("/wp-json/wp/v2/posts/{id}"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_form_encoded_body() {
    let (server, _guard) = create_test_server();
    let response = server
        .post("/wp-json/wp/v2/posts")
        .add_header(header::AUTHORIZATION, bearer(ADMIN_KEY))
        .form(&[("title", "From a form"), ("status", "draft")])
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["status"], json!("draft"));
    assert_eq!(body["title"]["raw"], json!("From a form"));
}

#[tokio::test]
async fn test_invalid_json_body() {
    let (server, _guard) = create_test_server();
    let response = server
        .post("/wp-json/wp/v2/posts")
        .add_header(header::AUTHORIZATION, bearer(ADMIN_KEY))
        .bytes(axum::body::Bytes::from_static(b"{not json"))
        .content_type("application/json")
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["code"], json!("rest_invalid_json"));
}

#[tokio::test]
async fn test_pagination_headers() {
    let (server, _guard) = create_test_server();
    for title in ["One", "Two", "Three"] {
        create_post(&server, title).await;
    }

    let response = server
        .get("/wp-json/wp/v2/posts")
        .add_query_param("per_page", "2")
        .add_query_param("page", "1")
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>().as_array().unwrap().len(), 2);
    assert_eq!(header_str(&response, "x-wp-total").as_deref(), Some("3"));
    assert_eq!(header_str(&response, "x-wp-totalpages").as_deref(), Some("2"));
    let link = header_str(&response, "link").unwrap();
    assert!(link.contains("rel=\"next\""));
    assert!(link.contains("page=2"));

    let response = server
        .get("/wp-json/wp/v2/posts")
        .add_query_param("per_page", "2")
        .add_query_param("page", "3")
        .await;
    response.assert_status_bad_request();
    assert_eq!(
        response.json::<Value>()["code"],
        json!("rest_post_invalid_page_number")
    );
}

#[tokio::test]
async fn test_invalid_param_reports_details() {
    let (server, _guard) = create_test_server();
    let response = server
        .get("/wp-json/wp/v2/posts")
        .add_query_param("per_page", "500")
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["code"], json!("rest_invalid_param"));
    assert!(body["data"]["params"]["per_page"].is_string());
}

#[tokio::test]
async fn test_envelope_wraps_errors() {
    let (server, _guard) = create_test_server();
    let response = server
        .get("/wp-json/wp/v2/posts/999")
        .add_query_param("_envelope", "1")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], json!(404));
    assert_eq!(body["body"]["code"], json!("rest_post_invalid_id"));
}

#[tokio::test]
async fn test_method_override_header() {
    let (server, _guard) = create_test_server();
    let id = create_post(&server, "Override").await;
    let response = server
        .post(&format!("/wp-json/wp/v2/posts/{id}"))
        .add_header(header::AUTHORIZATION, bearer(ADMIN_KEY))
        .add_header("x-http-method-override", HeaderValue::from_static("DELETE"))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], json!("trash"));
}

// =============================================================================
// OPTIONS AND COMMENTS
// =============================================================================

#[tokio::test]
async fn test_options_describes_route() {
    let (server, _guard) = create_test_server();
    let response = server.method(axum::http::Method::OPTIONS, "/wp-json/wp/v2/comments").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["namespace"], json!("wp/v2"));
    assert!(body["methods"].as_array().unwrap().contains(&json!("POST")));
    assert_eq!(body["schema"]["title"], json!("comment"));
}

#[tokio::test]
async fn test_cors_preflight_still_answered() {
    let (server, _guard) = create_test_server();
    let response = server
        .method(axum::http::Method::OPTIONS, "/wp-json/wp/v2/posts")
        .add_header(header::ORIGIN, HeaderValue::from_static("http://localhost:3000"))
        .add_header(header::ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("POST"))
        .await;
    response.assert_status_ok();
    assert_eq!(
        header_str(&response, "access-control-allow-origin").as_deref(),
        Some("http://localhost:3000")
    );
}

#[tokio::test]
async fn test_options_with_origin_is_not_a_preflight() {
    let (server, _guard) = create_test_server();
    let response = server
        .method(axum::http::Method::OPTIONS, "/wp-json/wp/v2/posts")
        .add_header(header::ORIGIN, HeaderValue::from_static("http://localhost:3000"))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["schema"]["title"], json!("post"));
}

#[tokio::test]
async fn test_comment_on_post() {
    let (server, _guard) = create_test_server();
    let post = create_post(&server, "Discuss").await;
    let response = server
        .post("/wp-json/wp/v2/comments")
        .add_header(header::AUTHORIZATION, bearer(ADMIN_KEY))
        .json(&json!({"post": post, "content": "First!"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let comment: Value = response.json();
    assert_eq!(comment["post"], json!(post));
    assert_eq!(comment["author"], json!(1));
    assert_eq!(comment["status"], json!("approved"));

    let response = server
        .get("/wp-json/wp/v2/comments")
        .add_query_param("post", post.to_string())
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>().as_array().unwrap().len(), 1);
}

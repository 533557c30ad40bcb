//! # Authentication Module
//!
//! Bearer API keys mapped to configured users.
//!
//! ## Usage
//!
//! Send the API key in the Authorization header:
//! ```text
//! Authorization: Bearer <your-api-key>
//! ```
//!
//! Requests without the header run as the anonymous caller. A header with
//! an unknown key is rejected with 401 before reaching the pipeline.

use super::AppState;
use crate::config::UserConfig;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use freshpress_core::{RestError, User};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// The caller resolved for a request, stored as a request extension.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<User>);

// =============================================================================
// API KEYS
// =============================================================================

/// Key table built from the configured users.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    entries: Arc<Vec<(Vec<u8>, User)>>,
}

impl ApiKeys {
    #[must_use]
    pub fn from_users(users: &[UserConfig]) -> Self {
        Self {
            entries: Arc::new(
                users
                    .iter()
                    .map(|u| (u.api_key.as_bytes().to_vec(), u.to_user()))
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// User owning `provided`. Every entry is compared, in constant time per
    /// entry, so timing does not reveal which key matched.
    #[must_use]
    pub fn resolve(&self, provided: &str) -> Option<User> {
        let provided = provided.as_bytes();
        let mut found = None;
        for (expected, user) in self.entries.iter() {
            if keys_match(provided, expected) && found.is_none() {
                found = Some(user.clone());
            }
        }
        found
    }
}

/// Pad both keys to the same length so `ct_eq` always runs over the same
/// number of bytes.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided.len()].copy_from_slice(provided);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

fn unauthorized(message: &str) -> Response {
    let err = RestError::new("rest_not_logged_in", message, 401);
    (StatusCode::UNAUTHORIZED, Json(err.to_json())).into_response()
}

/// Resolve the caller and attach it as [`CurrentUser`].
pub async fn api_key_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().map(str::to_owned));

    let user = match auth_header {
        None => None,
        Some(Err(_)) => {
            tracing::warn!(
                event = "auth_failure",
                reason = "malformed_authorization_header",
                "Authentication failed: header is not ASCII"
            );
            return unauthorized("The Authorization header is malformed.");
        }
        Some(Ok(value)) => {
            let provided = value.strip_prefix("Bearer ").unwrap_or(&value).trim();
            match state.keys.resolve(provided) {
                Some(user) => {
                    tracing::debug!(event = "auth_success", user = user.id);
                    Some(user)
                }
                None => {
                    tracing::warn!(
                        event = "auth_failure",
                        reason = "invalid_api_key",
                        "Authentication failed: invalid API key"
                    );
                    return unauthorized("The API key is invalid.");
                }
            }
        }
    };

    request.extensions_mut().insert(CurrentUser(user));
    next.run(request).await
}

// =============================================================================
// TESTS
// =============================================================================

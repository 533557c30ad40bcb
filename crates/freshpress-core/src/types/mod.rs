//! # Core Type Definitions
//!
//! Shared vocabulary for the REST pipeline:
//! - Response contexts (`Context`)
//! - HTTP methods and the method-set constants used at route registration
//! - Error types (`RestError`, `StoreError`, `FreshPressError`)
//!
//! `RestError` is the only error shape that crosses a controller boundary.
//! It is returned as a value and propagated with `?`; the dispatcher alone
//! turns it into an HTTP status.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

// =============================================================================
// CONTEXT
// =============================================================================

/// Scope under which a request is made; selects which schema fields are
/// present in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    View,
    Edit,
    Embed,
}

impl Context {
    pub const ALL: [Context; 3] = [Context::View, Context::Edit, Context::Embed];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Embed => "embed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Self::View),
            "edit" => Some(Self::Edit),
            "embed" => Some(Self::Embed),
            _ => None,
        }
    }
}

// =============================================================================
// HTTP METHODS
// =============================================================================

/// HTTP verb of an inbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            "OPTIONS" => Some(Self::Options),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Get => 1,
            Self::Head => 1 << 1,
            Self::Post => 1 << 2,
            Self::Put => 1 << 3,
            Self::Patch => 1 << 4,
            Self::Delete => 1 << 5,
            Self::Options => 1 << 6,
        }
    }
}

/// A set of HTTP methods an endpoint answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Methods(u8);

impl Methods {
    pub const NONE: Self = Self(0);
    /// GET and HEAD.
    pub const READABLE: Self = Self(Method::Get.bit() | Method::Head.bit());
    /// POST.
    pub const CREATABLE: Self = Self(Method::Post.bit());
    /// POST, PUT and PATCH.
    pub const EDITABLE: Self = Self(Method::Post.bit() | Method::Put.bit() | Method::Patch.bit());
    /// DELETE.
    pub const DELETABLE: Self = Self(Method::Delete.bit());

    const ORDER: [Method; 6] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
    ];

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn contains(self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }

    /// Creation-only argument keys (`default`, `required`) are kept only for
    /// this exact set.
    #[must_use]
    pub fn is_creatable(self) -> bool {
        self == Self::CREATABLE
    }

    /// Method names in canonical order.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        Self::ORDER
            .iter()
            .filter(|m| self.contains(**m))
            .map(|m| m.as_str())
            .collect()
    }
}

// =============================================================================
// REST ERROR
// =============================================================================

/// Uniform error shape of the REST pipeline: machine code, human message,
/// HTTP status and optional extra data.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct RestError {
    pub code: String,
    pub message: String,
    pub status: u16,
    pub data: Map<String, Value>,
}

/// Result alias used by every controller operation.
pub type RestResult<T> = Result<T, RestError>;

impl RestError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
            data: Map::new(),
        }
    }

    /// Default for lifecycle methods a controller does not override.
    pub fn not_implemented(method: &str) -> Self {
        Self::new(
            "invalid-method",
            format!("Method '{method}' not implemented. Must be overridden in subclass."),
            405,
        )
    }

    /// Generic denial produced when a permission check answers "no" without
    /// a more specific error.
    pub fn forbidden(status: u16) -> Self {
        Self::new("rest_forbidden", "Sorry, you are not allowed to do that.", status)
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Wire representation: `{code, message, data: {status, ...}}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut data = Map::new();
        data.insert("status".to_string(), json!(self.status));
        for (k, v) in &self.data {
            data.insert(k.clone(), v.clone());
        }
        json!({
            "code": self.code,
            "message": self.message,
            "data": Value::Object(data),
        })
    }
}

// =============================================================================
// STORE ERROR
// =============================================================================

/// Failures reported by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Could not insert {0} into the database.")]
    Insert(String),

    #[error("Could not update {0} in the database.")]
    Update(String),

    #[error("Could not delete {0}.")]
    Delete(String),

    /// Rejected by the store's own validation, not a write failure.
    #[error("{message}")]
    Invalid { code: String, message: String },

    #[error("{0} does not exist.")]
    NotFound(String),
}

impl StoreError {
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Insert(_) => "db_insert_error",
            Self::Update(_) => "db_update_error",
            Self::Delete(_) => "db_delete_error",
            Self::Invalid { code, .. } => code,
            Self::NotFound(_) => "db_not_found",
        }
    }

    /// True when the write itself failed (surfaced as 500).
    #[must_use]
    pub const fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Insert(_) | Self::Update(_) | Self::Delete(_))
    }
}

impl From<StoreError> for RestError {
    fn from(err: StoreError) -> Self {
        let status = if err.is_storage_failure() { 500 } else { 400 };
        RestError::new(err.code().to_string(), err.to_string(), status)
    }
}

// =============================================================================
// APPLICATION ERROR
// =============================================================================

/// Errors outside the request pipeline: snapshots, configuration, I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FreshPressError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Route registration error: {0}")]
    RouteError(String),
}

// =============================================================================
// TESTS
// =============================================================================

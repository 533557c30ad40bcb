//! # Request Envelope
//!
//! Normalized inbound call. Parameters live in four layers with fixed
//! lookup precedence: route > query > body > defaults.

use crate::auth::Authorizer;
use crate::schema::Args;
use crate::text::{parse_id_list, parse_list, value_as_bool, value_as_i64, value_as_string};
use crate::types::{Context, Method, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    route: String,
    url_params: Map<String, Value>,
    query_params: Map<String, Value>,
    body_params: Map<String, Value>,
    default_params: Map<String, Value>,
    headers: BTreeMap<String, Vec<String>>,
    attributes: Args,
    remote_addr: Option<String>,
}

/// Header keys are lower-cased with `-` folded to `_`.
fn canonical_header(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

impl Request {
    pub fn new(method: Method, route: impl Into<String>) -> Self {
        Self {
            method,
            route: route.into(),
            url_params: Map::new(),
            query_params: Map::new(),
            body_params: Map::new(),
            default_params: Map::new(),
            headers: BTreeMap::new(),
            attributes: Args::new(),
            remote_addr: None,
        }
    }

    // -------------------------------------------------------------------------
    // Builders
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn with_query(mut self, params: Map<String, Value>) -> Self {
        self.query_params = params;
        self
    }

    #[must_use]
    pub fn with_body(mut self, params: Map<String, Value>) -> Self {
        self.body_params = params;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Shorthand for tests and internal sub-requests.
    #[must_use]
    pub fn with_param(mut self, name: &str, value: Value) -> Self {
        self.query_params.insert(name.to_string(), value);
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    #[must_use]
    pub fn route(&self) -> &str {
        &self.route
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    fn layers(&self) -> [&Map<String, Value>; 4] {
        [
            &self.url_params,
            &self.query_params,
            &self.body_params,
            &self.default_params,
        ]
    }

    /// Highest-precedence value for a parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.layers().into_iter().find_map(|layer| layer.get(name))
    }

    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Write to the route layer, which wins over every other source.
    pub fn set_param(&mut self, name: &str, value: Value) {
        self.url_params.insert(name.to_string(), value);
    }

    /// Merged view, last write wins in precedence order.
    #[must_use]
    pub fn get_params(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for layer in self.layers().into_iter().rev() {
            for (k, v) in layer {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    #[must_use]
    pub fn get_query_params(&self) -> &Map<String, Value> {
        &self.query_params
    }

    #[must_use]
    pub fn get_body_params(&self) -> &Map<String, Value> {
        &self.body_params
    }

    pub fn set_url_params(&mut self, params: Map<String, Value>) {
        self.url_params = params;
    }

    pub fn set_default_params(&mut self, params: Map<String, Value>) {
        self.default_params = params;
    }

    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(canonical_header(name))
            .or_default()
            .push(value.into());
    }

    /// All values of a header joined with `,`.
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<String> {
        self.headers
            .get(&canonical_header(name))
            .map(|values| values.join(","))
    }

    #[must_use]
    pub fn attributes(&self) -> &Args {
        &self.attributes
    }

    pub fn set_attributes(&mut self, args: Args) {
        self.attributes = args;
    }

    // -------------------------------------------------------------------------
    // Typed reads
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn param_i64(&self, name: &str) -> Option<i64> {
        self.param(name).and_then(value_as_i64)
    }

    #[must_use]
    pub fn param_u64(&self, name: &str) -> Option<u64> {
        self.param_i64(name).and_then(|v| u64::try_from(v).ok())
    }

    #[must_use]
    pub fn param_bool(&self, name: &str) -> bool {
        self.param(name).is_some_and(value_as_bool)
    }

    #[must_use]
    pub fn param_str(&self, name: &str) -> Option<String> {
        self.param(name).and_then(value_as_string)
    }

    #[must_use]
    pub fn param_ids(&self, name: &str) -> Vec<u64> {
        self.param(name).map(parse_id_list).unwrap_or_default()
    }

    #[must_use]
    pub fn param_list(&self, name: &str) -> Vec<Value> {
        self.param(name).map(parse_list).unwrap_or_default()
    }

    /// Requested context, `view` when absent or unknown.
    #[must_use]
    pub fn context(&self) -> Context {
        self.param_str("context")
            .as_deref()
            .and_then(Context::parse)
            .unwrap_or(Context::View)
    }

    // -------------------------------------------------------------------------
    // Argument processing
    // -------------------------------------------------------------------------

    /// Fill the defaults layer from the matched endpoint args.
    pub fn apply_defaults(&mut self) {
        let defaults: Map<String, Value> = self
            .attributes
            .iter()
            .filter_map(|(name, arg)| arg.spec.default.clone().map(|d| (name.clone(), d)))
            .collect();
        self.default_params = defaults;
    }

    /// Check required presence, then every supplied value.
    pub fn has_valid_params(&self) -> RestResult<()> {
        let missing: Vec<&str> = self
            .attributes
            .iter()
            .filter(|(name, arg)| arg.spec.required && !self.has_param(name))
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(RestError::new(
                "rest_missing_callback_param",
                format!("Missing parameter(s): {}", missing.join(", ")),
                400,
            )
            .with_data("params", json!(missing)));
        }

        let mut invalid = Map::new();
        for (name, arg) in &self.attributes {
            if let Some(value) = self.param(name) {
                if let Err(message) = arg.check(value, name) {
                    invalid.insert(name.clone(), json!(message));
                }
            }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(invalid_params(invalid))
        }
    }

    /// Run each arg's sanitizer over every layer that carries the param.
    pub fn sanitize_params(&mut self, auth: &dyn Authorizer) -> RestResult<()> {
        let mut invalid = Map::new();
        let attributes = self.attributes.clone();
        for layer in [
            &mut self.url_params,
            &mut self.query_params,
            &mut self.body_params,
        ] {
            for (name, arg) in &attributes {
                let Some(value) = layer.get_mut(name) else {
                    continue;
                };
                match arg.clean(value, name, auth) {
                    Ok(clean) => *value = clean,
                    Err(message) => {
                        invalid.insert(name.clone(), json!(message));
                    }
                }
            }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(invalid_params(invalid))
        }
    }
}

fn invalid_params(invalid: Map<String, Value>) -> RestError {
    let names: Vec<&str> = invalid.keys().map(String::as_str).collect();
    RestError::new(
        "rest_invalid_param",
        format!("Invalid parameter(s): {}", names.join(", ")),
        400,
    )
    .with_data("params", Value::Object(invalid.clone()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::Anonymous;
    use crate::schema::{Arg, Property};

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn precedence_is_route_query_body_defaults() {
        let mut req = Request::new(Method::Post, "/wp/v2/posts/5")
            .with_query(map(json!({"id": 1, "a": "query"})))
            .with_body(map(json!({"a": "body", "b": "body"})));
        req.set_default_params(map(json!({"b": "default", "c": "default"})));
        req.set_url_params(map(json!({"id": 5})));

        assert_eq!(req.param("id"), Some(&json!(5)));
        assert_eq!(req.param("a"), Some(&json!("query")));
        assert_eq!(req.param("b"), Some(&json!("body")));
        assert_eq!(req.param("c"), Some(&json!("default")));

        let merged = req.get_params();
        assert_eq!(merged["id"], json!(5));
        assert_eq!(merged["a"], json!("query"));

        req.set_param("a", json!("forced"));
        assert_eq!(req.param("a"), Some(&json!("forced")));
    }

    #[test]
    fn headers_are_normalized_and_joined() {
        let req = Request::new(Method::Get, "/")
            .with_header("User-Agent", "one")
            .with_header("user_agent", "two");
        assert_eq!(req.get_header("USER-AGENT").as_deref(), Some("one,two"));
        assert_eq!(req.get_header("accept"), None);
    }

    #[test]
    fn missing_required_params_are_reported() {
        let mut req = Request::new(Method::Post, "/");
        let mut args = Args::new();
        args.insert("post".into(), Arg::new(Property::integer().required()));
        req.set_attributes(args);
        let err = req.has_valid_params().unwrap_err();
        assert_eq!(err.code, "rest_missing_callback_param");
        assert_eq!(err.data["params"], json!(["post"]));
    }

    #[test]
    fn invalid_params_carry_messages() {
        let mut req = Request::new(Method::Get, "/").with_param("per_page", json!("lots"));
        let mut args = Args::new();
        args.insert("per_page".into(), Arg::new(Property::integer()));
        req.set_attributes(args);
        let err = req.has_valid_params().unwrap_err();
        assert_eq!(err.code, "rest_invalid_param");
        assert_eq!(err.status, 400);
        assert_eq!(
            err.data["params"]["per_page"],
            json!("per_page is not of type integer.")
        );
    }

    #[test]
    fn sanitize_coerces_and_defaults_fill() {
        let mut req = Request::new(Method::Get, "/").with_param("page", json!("3"));
        let mut args = Args::new();
        args.insert("page".into(), Arg::new(Property::integer().default_value(json!(1))));
        args.insert(
            "per_page".into(),
            Arg::new(Property::integer().default_value(json!(10))),
        );
        req.set_attributes(args);
        req.apply_defaults();
        req.sanitize_params(&Anonymous).unwrap();
        assert_eq!(req.param("page"), Some(&json!(3)));
        assert_eq!(req.param_i64("per_page"), Some(10));
    }
}

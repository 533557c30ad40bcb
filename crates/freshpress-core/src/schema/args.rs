//! # Endpoint Arguments
//!
//! Argument descriptors attached to endpoints, plus the generic request
//! validator and sanitizer that every descriptor falls back to.

use super::{Format, JsonType, Property};
use crate::auth::{Authorizer, Cap};
use crate::dates;
use crate::text::{
    is_email, parse_list, sanitize_key, sanitize_text_field, sanitize_title, value_as_bool,
    value_as_i64, value_as_string,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::IpAddr;

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Sanitizer applied to an argument after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitize {
    /// Coerce to the declared schema type.
    Request,
    /// Leave the value untouched.
    Skip,
    Slug,
    TextField,
    Key,
    AbsInt,
    SlugList,
    /// Statuses outside the default set need `edit_cap`.
    PostStatuses { edit_cap: String },
}

/// Validator applied to an argument before sanitization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validate {
    /// Check against the declared schema.
    Request,
    Skip,
}

/// A single endpoint argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub spec: Property,
    pub sanitize: Sanitize,
    pub validate: Validate,
}

/// Endpoint arguments keyed by parameter name.
pub type Args = BTreeMap<String, Arg>;

impl Arg {
    #[must_use]
    pub fn new(spec: Property) -> Self {
        Self {
            spec,
            sanitize: Sanitize::Request,
            validate: Validate::Request,
        }
    }

    #[must_use]
    pub fn with_sanitize(mut self, sanitize: Sanitize) -> Self {
        self.sanitize = sanitize;
        self
    }

    #[must_use]
    pub fn with_validate(mut self, validate: Validate) -> Self {
        self.validate = validate;
        self
    }

    pub fn check(&self, value: &Value, param: &str) -> Result<(), String> {
        match self.validate {
            Validate::Request => validate_value(value, &self.spec, param),
            Validate::Skip => Ok(()),
        }
    }

    pub fn clean(&self, value: &Value, param: &str, auth: &dyn Authorizer) -> Result<Value, String> {
        match &self.sanitize {
            Sanitize::Request => Ok(sanitize_value(value, &self.spec)),
            Sanitize::Skip => Ok(value.clone()),
            Sanitize::Slug => Ok(json!(sanitize_title(&string_of(value)))),
            Sanitize::TextField => Ok(json!(sanitize_text_field(&string_of(value)))),
            Sanitize::Key => Ok(json!(sanitize_key(&string_of(value)))),
            Sanitize::AbsInt => Ok(json!(value_as_i64(value).unwrap_or(0).unsigned_abs())),
            Sanitize::SlugList => Ok(Value::Array(
                parse_list(value)
                    .iter()
                    .filter_map(value_as_string)
                    .map(|s| json!(sanitize_title(&s)))
                    .collect(),
            )),
            Sanitize::PostStatuses { edit_cap } => {
                sanitize_post_statuses(value, &self.spec, edit_cap, param, auth)
            }
        }
    }

    /// Client-facing description used by route introspection.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = self.spec.to_json();
        if let Value::Object(map) = &mut out {
            map.insert("required".into(), Value::Bool(self.spec.required));
        }
        out
    }
}

fn string_of(value: &Value) -> String {
    value_as_string(value).unwrap_or_default()
}

// =============================================================================
// VALIDATION
// =============================================================================

fn type_error(param: &str, ty: &str) -> String {
    format!("{param} is not of type {ty}.")
}

fn enum_contains(options: &[Value], value: &Value) -> bool {
    options.iter().any(|option| {
        option == value
            || (value.is_string() && value_as_string(option) == value_as_string(value))
    })
}

fn strict_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_boolean(value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Number(n) => matches!(n.as_i64(), Some(0 | 1)),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "" | "true" | "false" | "1" | "0"),
        _ => false,
    }
}

/// Check a value against a schema fragment. The error is a human message
/// naming `param`.
pub fn validate_value(value: &Value, spec: &Property, param: &str) -> Result<(), String> {
    if value.is_null() && spec.types.contains(&JsonType::Null) {
        return Ok(());
    }
    let Some(ty) = spec.primary_type() else {
        return Ok(());
    };

    match ty {
        JsonType::Array => {
            // Scalars are read as one-item lists.
            if value.is_object() {
                return Err(type_error(param, "array"));
            }
            if let Some(items) = &spec.items {
                for (i, item) in parse_list(value).iter().enumerate() {
                    validate_value(item, items, &format!("{param}[{i}]"))?;
                }
            }
            return Ok(());
        }
        JsonType::Object => {
            if !value.is_object() {
                return Err(type_error(param, "object"));
            }
        }
        _ => {}
    }

    if let Some(options) = &spec.enum_values {
        if !enum_contains(options, value) {
            let listed: Vec<String> = options.iter().filter_map(value_as_string).collect();
            return Err(format!("{param} is not one of {}.", listed.join(", ")));
        }
    }

    match ty {
        JsonType::Integer => {
            let Some(n) = strict_integer(value) else {
                return Err(type_error(param, "integer"));
            };
            if let Some(min) = spec.minimum {
                if n < min {
                    return Err(format!("{param} must be greater than or equal to {min}"));
                }
            }
            if let Some(max) = spec.maximum {
                if n > max {
                    return Err(format!("{param} must be less than or equal to {max}"));
                }
            }
        }
        JsonType::Boolean if !is_boolean(value) => return Err(type_error(param, "boolean")),
        JsonType::String if !value.is_string() => return Err(type_error(param, "string")),
        _ => {}
    }

    if let (Some(format), Value::String(s)) = (spec.format, value) {
        match format {
            Format::DateTime if dates::parse_date(s).is_none() => {
                return Err("Invalid date.".to_string());
            }
            Format::Email if !is_email(s.trim()) => {
                return Err("Invalid email address.".to_string());
            }
            Format::Ip if s.parse::<IpAddr>().is_err() => {
                return Err(format!("{param} is not a valid IP address."));
            }
            _ => {}
        }
    }
    Ok(())
}

// =============================================================================
// SANITIZATION
// =============================================================================

/// Coerce a validated value to the declared schema type.
pub fn sanitize_value(value: &Value, spec: &Property) -> Value {
    if value.is_null() && spec.types.contains(&JsonType::Null) {
        return Value::Null;
    }
    match spec.primary_type() {
        Some(JsonType::Array) => Value::Array(
            parse_list(value)
                .iter()
                .map(|item| match &spec.items {
                    Some(items) => sanitize_value(item, items),
                    None => item.clone(),
                })
                .collect(),
        ),
        Some(JsonType::Integer) => json!(value_as_i64(value).unwrap_or(0)),
        Some(JsonType::Boolean) => Value::Bool(value_as_bool(value)),
        Some(JsonType::String) => match value_as_string(value) {
            Some(s) => match spec.format {
                Some(Format::Email | Format::Uri) => json!(s.trim()),
                _ => json!(s),
            },
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

fn sanitize_post_statuses(
    value: &Value,
    spec: &Property,
    edit_cap: &str,
    param: &str,
    auth: &dyn Authorizer,
) -> Result<Value, String> {
    let statuses: Vec<String> = parse_list(value)
        .iter()
        .filter_map(value_as_string)
        .map(|s| sanitize_key(&s))
        .collect();
    let defaults = spec.default.as_ref().map(parse_list).unwrap_or_default();

    for status in &statuses {
        if defaults.iter().any(|d| d.as_str() == Some(status.as_str())) {
            continue;
        }
        if !auth.user_can(Cap::Named(edit_cap)) {
            return Err("Status is forbidden.".to_string());
        }
        if let Some(items) = &spec.items {
            validate_value(&json!(status), items, param)?;
        }
    }
    Ok(json!(statuses))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::Anonymous;

    #[test]
    fn integers_accept_numeric_strings_and_bounds() {
        let spec = Property::integer().minimum(1).maximum(100);
        assert!(validate_value(&json!("10"), &spec, "per_page").is_ok());
        assert!(validate_value(&json!(10), &spec, "per_page").is_ok());
        assert_eq!(
            validate_value(&json!("abc"), &spec, "per_page"),
            Err("per_page is not of type integer.".to_string())
        );
        assert!(validate_value(&json!(0), &spec, "per_page").is_err());
        assert!(validate_value(&json!(101), &spec, "per_page").is_err());
    }

    #[test]
    fn enums_compare_string_forms() {
        let spec = Property::string().one_of(["asc", "desc"]);
        assert!(validate_value(&json!("asc"), &spec, "order").is_ok());
        assert_eq!(
            validate_value(&json!("up"), &spec, "order"),
            Err("order is not one of asc, desc.".to_string())
        );
    }

    #[test]
    fn scalar_is_a_one_item_list() {
        let spec = Property::array(Property::integer());
        assert!(validate_value(&json!(5), &spec, "post").is_ok());
        assert_eq!(sanitize_value(&json!(5), &spec), json!([5]));
        assert_eq!(
            validate_value(&json!({"a": 1}), &spec, "post"),
            Err("post is not of type array.".to_string())
        );
        let flags = Property::array(Property::boolean());
        assert_eq!(sanitize_value(&json!(true), &flags), json!([true]));
    }

    #[test]
    fn arrays_validate_each_item() {
        let spec = Property::array(Property::integer());
        assert!(validate_value(&json!("1,2,3"), &spec, "include").is_ok());
        assert_eq!(
            validate_value(&json!(["1", "x"]), &spec, "include"),
            Err("include[1] is not of type integer.".to_string())
        );
        assert_eq!(
            sanitize_value(&json!("1, 2"), &spec),
            json!([1, 2])
        );
    }

    #[test]
    fn nullable_dates_and_formats() {
        let spec = Property::string().nullable().format(Format::DateTime);
        assert!(validate_value(&Value::Null, &spec, "date").is_ok());
        assert!(validate_value(&json!("2017-01-01T00:00:00"), &spec, "date").is_ok());
        assert!(validate_value(&json!("not a date"), &spec, "date").is_err());

        let ip = Property::string().format(Format::Ip);
        assert!(validate_value(&json!("127.0.0.1"), &ip, "author_ip").is_ok());
        assert!(validate_value(&json!("localhost"), &ip, "author_ip").is_err());
    }

    #[test]
    fn booleans_sanitize_loosely() {
        let spec = Property::boolean();
        assert!(validate_value(&json!("false"), &spec, "force").is_ok());
        assert!(validate_value(&json!("maybe"), &spec, "force").is_err());
        assert_eq!(sanitize_value(&json!("false"), &spec), json!(false));
        assert_eq!(sanitize_value(&json!("1"), &spec), json!(true));
    }

    #[test]
    fn non_default_statuses_need_capability() {
        let arg = Arg::new(
            Property::array(Property::string().one_of(["publish", "draft", "any"]))
                .default_value(json!("publish")),
        )
        .with_sanitize(Sanitize::PostStatuses {
            edit_cap: "edit_posts".into(),
        });
        assert_eq!(
            arg.clean(&json!("publish"), "status", &Anonymous),
            Ok(json!(["publish"]))
        );
        assert_eq!(
            arg.clean(&json!("draft"), "status", &Anonymous),
            Err("Status is forbidden.".to_string())
        );
    }

    #[test]
    fn custom_sanitizers() {
        let anon = Anonymous;
        let slug = Arg::new(Property::string()).with_sanitize(Sanitize::Slug);
        assert_eq!(slug.clean(&json!("Hello World"), "slug", &anon), Ok(json!("hello-world")));
        let abs = Arg::new(Property::integer()).with_sanitize(Sanitize::AbsInt);
        assert_eq!(abs.clean(&json!("-4"), "page", &anon), Ok(json!(4)));
        let list = Arg::new(Property::array(Property::string())).with_sanitize(Sanitize::SlugList);
        assert_eq!(list.clean(&json!("A b,c"), "slug", &anon), Ok(json!(["a", "b", "c"])));
    }
}

//! # Schema Engine
//!
//! JSON-Schema descriptions of REST resources. A schema is computed from
//! registry state every time it is requested and is never mutated after
//! `SchemaBuilder::build`.
//!
//! One schema drives three things:
//! - response filtering by context (`Schema::filter_by_context`)
//! - endpoint argument derivation (`Schema::endpoint_args`)
//! - the `context` collection parameter (`Schema::context_param`)

pub mod args;

pub use args::{Arg, Args, Sanitize, Validate};

use crate::types::{Context, Methods};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};

/// JSON-Schema dialect advertised on every item schema.
pub const SCHEMA_DIALECT: &str = "http://json-schema.org/draft-04/schema#";

// =============================================================================
// PRIMITIVE DESCRIPTORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JsonType {
    String,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl JsonType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    DateTime,
    Email,
    Uri,
    Ip,
}

impl Format {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DateTime => "date-time",
            Self::Email => "email",
            Self::Uri => "uri",
            Self::Ip => "ip",
        }
    }
}

/// Server-side argument overrides. Never serialized to clients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgOptions {
    pub sanitize: Option<Sanitize>,
    pub validate: Option<Validate>,
    pub default: Option<Value>,
    pub required: Option<bool>,
}

// =============================================================================
// PROPERTY
// =============================================================================

/// One schema property. Also the shape of an endpoint argument descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Property {
    pub description: Option<String>,
    pub types: Vec<JsonType>,
    pub format: Option<Format>,
    /// `None` means visible in every context.
    pub context: Option<Vec<Context>>,
    pub readonly: bool,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    pub required: bool,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    pub items: Option<Box<Property>>,
    pub properties: Option<BTreeMap<String, Property>>,
    pub arg_options: Option<ArgOptions>,
}

impl Property {
    #[must_use]
    pub fn of(ty: JsonType) -> Self {
        Self {
            types: vec![ty],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn string() -> Self {
        Self::of(JsonType::String)
    }

    #[must_use]
    pub fn integer() -> Self {
        Self::of(JsonType::Integer)
    }

    #[must_use]
    pub fn boolean() -> Self {
        Self::of(JsonType::Boolean)
    }

    #[must_use]
    pub fn object() -> Self {
        Self::of(JsonType::Object)
    }

    #[must_use]
    pub fn array(items: Property) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(JsonType::Array)
        }
    }

    /// Also accept `null`.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        if !self.types.contains(&JsonType::Null) {
            self.types.push(JsonType::Null);
        }
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    #[must_use]
    pub fn context(mut self, contexts: &[Context]) -> Self {
        self.context = Some(contexts.to_vec());
        self
    }

    #[must_use]
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn minimum(mut self, min: i64) -> Self {
        self.minimum = Some(min);
        self
    }

    #[must_use]
    pub fn maximum(mut self, max: i64) -> Self {
        self.maximum = Some(max);
        self
    }

    /// Nested sub-property of an object property.
    #[must_use]
    pub fn sub(mut self, name: impl Into<String>, property: Property) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), property);
        self
    }

    #[must_use]
    pub fn arg_options(mut self, options: ArgOptions) -> Self {
        self.arg_options = Some(options);
        self
    }

    /// Shorthand for an `arg_options` sanitize override.
    #[must_use]
    pub fn sanitize_with(mut self, sanitize: Sanitize) -> Self {
        self.arg_options.get_or_insert_with(ArgOptions::default).sanitize = Some(sanitize);
        self
    }

    #[must_use]
    pub fn visible_in(&self, context: Context) -> bool {
        self.context.as_ref().is_none_or(|c| c.contains(&context))
    }

    /// First non-null type.
    #[must_use]
    pub fn primary_type(&self) -> Option<JsonType> {
        self.types.iter().copied().find(|t| *t != JsonType::Null)
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        self.primary_type() == Some(JsonType::Object)
    }

    /// Client-facing JSON. `arg_options` are never part of it.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        if let Some(d) = &self.description {
            out.insert("description".into(), json!(d));
        }
        match self.types.as_slice() {
            [] => {}
            [single] => {
                out.insert("type".into(), json!(single.as_str()));
            }
            many => {
                let names: Vec<&str> = many.iter().map(|t| t.as_str()).collect();
                out.insert("type".into(), json!(names));
            }
        }
        if let Some(f) = self.format {
            out.insert("format".into(), json!(f.as_str()));
        }
        if let Some(ctx) = &self.context {
            let names: Vec<&str> = ctx.iter().map(|c| c.as_str()).collect();
            out.insert("context".into(), json!(names));
        }
        if self.readonly {
            out.insert("readonly".into(), Value::Bool(true));
        }
        if let Some(d) = &self.default {
            out.insert("default".into(), d.clone());
        }
        if let Some(e) = &self.enum_values {
            out.insert("enum".into(), Value::Array(e.clone()));
        }
        if let Some(min) = self.minimum {
            out.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.maximum {
            out.insert("maximum".into(), json!(max));
        }
        if let Some(items) = &self.items {
            out.insert("items".into(), items.to_json());
        }
        if let Some(props) = &self.properties {
            let nested: Map<String, Value> = props
                .iter()
                .map(|(k, p)| (k.clone(), p.to_json()))
                .collect();
            out.insert("properties".into(), Value::Object(nested));
        }
        Value::Object(out)
    }

    fn without_arg_options(&self) -> Self {
        let mut p = self.clone();
        p.arg_options = None;
        if let Some(props) = p.properties.as_mut() {
            for nested in props.values_mut() {
                *nested = nested.without_arg_options();
            }
        }
        p
    }
}

// =============================================================================
// SCHEMA
// =============================================================================

/// An immutable item schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub title: String,
    pub properties: BTreeMap<String, Property>,
}

impl Schema {
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Copy with every `arg_options` stripped, safe to hand to clients.
    #[must_use]
    pub fn public(&self) -> Schema {
        Schema {
            title: self.title.clone(),
            properties: self
                .properties
                .iter()
                .map(|(k, p)| (k.clone(), p.without_arg_options()))
                .collect(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let props: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, p)| (k.clone(), p.to_json()))
            .collect();
        json!({
            "$schema": SCHEMA_DIALECT,
            "title": self.title,
            "type": "object",
            "properties": Value::Object(props),
        })
    }

    /// Unique union of the top-level context tags, descending lexical order
    /// (`view`, `embed`, `edit`).
    #[must_use]
    pub fn contexts(&self) -> Vec<Context> {
        let set: BTreeSet<&'static str> = self
            .properties
            .values()
            .filter_map(|p| p.context.as_ref())
            .flatten()
            .map(|c| c.as_str())
            .collect();
        set.into_iter().rev().filter_map(Context::parse).collect()
    }

    /// The `context` query parameter derived from this schema.
    #[must_use]
    pub fn context_param(&self, default: Option<Context>) -> Arg {
        let mut spec = Property::string()
            .describe("Scope under which the request is made; determines fields present in response.");
        let contexts = self.contexts();
        if !contexts.is_empty() {
            spec = spec.one_of(contexts.iter().map(|c| c.as_str()));
        }
        if let Some(d) = default {
            spec = spec.default_value(json!(d.as_str()));
        }
        Arg::new(spec).with_sanitize(Sanitize::Key)
    }

    /// Input arguments accepted by an endpoint with the given method set.
    ///
    /// Readonly properties are skipped. `default` and `required` survive only
    /// for the creatable set, including when they come from `arg_options`.
    #[must_use]
    pub fn endpoint_args(&self, methods: Methods) -> Args {
        let creatable = methods.is_creatable();
        let mut args = Args::new();
        for (name, prop) in &self.properties {
            if prop.readonly {
                continue;
            }
            let mut spec = Property {
                description: prop.description.clone(),
                types: prop.types.clone(),
                format: prop.format,
                enum_values: prop.enum_values.clone(),
                items: prop.items.clone(),
                minimum: prop.minimum,
                maximum: prop.maximum,
                ..Property::default()
            };
            if creatable {
                spec.default.clone_from(&prop.default);
                spec.required = prop.required;
            }
            let mut arg = Arg::new(spec);
            if let Some(options) = &prop.arg_options {
                if let Some(s) = &options.sanitize {
                    arg.sanitize = s.clone();
                }
                if let Some(v) = options.validate {
                    arg.validate = v;
                }
                if creatable {
                    if let Some(d) = &options.default {
                        arg.spec.default = Some(d.clone());
                    }
                    if let Some(r) = options.required {
                        arg.spec.required = r;
                    }
                }
            }
            args.insert(name.clone(), arg);
        }
        args
    }

    /// Drop fields the schema hides in `context`.
    ///
    /// Keys without a schema entry or without a context list are kept.
    /// Object properties with nested properties are filtered one level deep.
    #[must_use]
    pub fn filter_by_context(&self, mut data: Map<String, Value>, context: Context) -> Map<String, Value> {
        let keys: Vec<String> = data.keys().cloned().collect();
        for key in keys {
            let Some(prop) = self.properties.get(&key) else {
                continue;
            };
            let Some(contexts) = &prop.context else {
                continue;
            };
            if !contexts.contains(&context) {
                data.remove(&key);
                continue;
            }
            if !prop.is_object() {
                continue;
            }
            let (Some(nested), Some(Value::Object(value))) = (&prop.properties, data.get_mut(&key))
            else {
                continue;
            };
            for (attribute, details) in nested {
                if !details.visible_in(context) {
                    value.remove(attribute);
                }
            }
        }
        data
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Composes a fixed base with optional overlays into an immutable `Schema`.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    title: String,
    properties: BTreeMap<String, Property>,
}

impl SchemaBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, property: Property) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    /// Add a property only when `condition` holds.
    #[must_use]
    pub fn property_if(
        self,
        condition: bool,
        name: impl Into<String>,
        property: impl FnOnce() -> Property,
    ) -> Self {
        if condition {
            self.property(name, property())
        } else {
            self
        }
    }

    #[must_use]
    pub fn extend<I, K>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Property)>,
        K: Into<String>,
    {
        for (name, prop) in properties {
            self.properties.insert(name.into(), prop);
        }
        self
    }

    #[must_use]
    pub fn overlay(self, f: impl FnOnce(Self) -> Self) -> Self {
        f(self)
    }

    #[must_use]
    pub fn build(self) -> Schema {
        Schema {
            title: self.title,
            properties: self.properties,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! # Meta Fields Bridge
//!
//! Exposes registered metadata keys as the `meta` field of a resource.
//! Reads return one entry per registered key; writes validate the whole
//! payload first, then apply it key by key. `null` deletes a key.

use crate::registry::{MetaKey, MetaObjectType, Registry};
use crate::schema::args::{sanitize_value, validate_value};
use crate::schema::{ArgOptions, JsonType, Property, Sanitize, Validate};
use crate::store::{MetaStore, Store};
use crate::types::{Context, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// A validated change to one key.
#[derive(Debug, Clone, PartialEq)]
enum MetaChange {
    Delete { key: String },
    Single { key: String, value: Value },
    Multiple { key: String, values: Vec<Value> },
}

/// Meta bridge for one object type (and subtype).
#[derive(Debug, Clone)]
pub struct MetaFields {
    registry: Arc<Registry>,
    object_type: MetaObjectType,
    subtype: Option<String>,
}

impl MetaFields {
    #[must_use]
    pub fn for_post(registry: Arc<Registry>, post_type: &str) -> Self {
        Self {
            registry,
            object_type: MetaObjectType::Post,
            subtype: Some(post_type.to_string()),
        }
    }

    #[must_use]
    pub fn for_comment(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            object_type: MetaObjectType::Comment,
            subtype: None,
        }
    }

    /// Object type the field is registered on: the post type or `comment`.
    #[must_use]
    pub fn rest_field_type(&self) -> String {
        match (self.object_type, self.subtype.as_deref()) {
            (MetaObjectType::Post, Some(subtype)) => subtype.to_string(),
            (other, _) => other.as_str().to_string(),
        }
    }

    fn registered(&self) -> Vec<&MetaKey> {
        self.registry
            .meta_keys(self.object_type, self.subtype.as_deref())
            .into_iter()
            .filter(|k| k.show_in_rest)
            .collect()
    }

    fn key_schema(key: &MetaKey) -> Property {
        let item = Property::of(key.ty);
        let prop = if key.single {
            item
        } else {
            Property::array(item)
        };
        prop.describe(key.description.clone())
            .context(&[Context::View, Context::Edit])
    }

    /// The `meta` object property: one sub-property per registered key.
    #[must_use]
    pub fn field_schema(&self) -> Property {
        let mut prop = Property::object()
            .describe("Meta fields.")
            .context(&[Context::View, Context::Edit])
            .arg_options(ArgOptions {
                sanitize: Some(Sanitize::Skip),
                validate: Some(Validate::Request),
                ..ArgOptions::default()
            });
        for key in self.registered() {
            prop = prop.sub(key.key.clone(), Self::key_schema(key));
        }
        prop
    }

    // -------------------------------------------------------------------------
    // Read
    // -------------------------------------------------------------------------

    /// Current values of every registered key.
    #[must_use]
    pub fn get_value(&self, object_id: u64, store: &dyn Store) -> Map<String, Value> {
        let mut out = Map::new();
        for key in self.registered() {
            let stored = store.get_meta(self.object_type, object_id, &key.key);
            let item = Property::of(key.ty);
            let value = if key.single {
                stored
                    .first()
                    .map(|v| sanitize_value(v, &item))
                    .unwrap_or_else(|| empty_value(key.ty))
            } else {
                Value::Array(stored.iter().map(|v| sanitize_value(v, &item)).collect())
            };
            out.insert(key.key.clone(), value);
        }
        out
    }

    // -------------------------------------------------------------------------
    // Write
    // -------------------------------------------------------------------------

    /// Validate a `meta` payload without touching storage.
    pub fn check_value(&self, values: &Value) -> RestResult<()> {
        self.plan(values).map(|_| ())
    }

    /// Apply a `meta` payload. Every key is validated before the first
    /// write; the first failing key aborts.
    pub fn update_value(
        &self,
        values: &Value,
        object_id: u64,
        store: &mut dyn Store,
    ) -> RestResult<()> {
        for change in self.plan(values)? {
            self.apply(change, object_id, store)?;
        }
        Ok(())
    }

    fn plan(&self, values: &Value) -> RestResult<Vec<MetaChange>> {
        let Value::Object(values) = values else {
            return Err(RestError::new(
                "rest_invalid_param",
                "Invalid parameter(s): meta",
                400,
            )
            .with_data("params", json!({"meta": "meta is not of type object."})));
        };

        let mut changes = Vec::new();
        for key in self.registered() {
            let Some(value) = values.get(&key.key) else {
                continue;
            };
            if key.key.starts_with('_') {
                return Err(RestError::new(
                    "rest_cannot_update",
                    format!("Sorry, you are not allowed to edit the {} custom field.", key.key),
                    403,
                )
                .with_data("key", json!(key.key)));
            }
            if value.is_null() {
                changes.push(MetaChange::Delete {
                    key: key.key.clone(),
                });
                continue;
            }

            let schema = Self::key_schema(key);
            let param = format!("meta.{}", key.key);
            validate_value(value, &schema, &param).map_err(|message| invalid_meta(&param, &message))?;
            let clean = sanitize_value(value, &schema);
            if key.single {
                changes.push(MetaChange::Single {
                    key: key.key.clone(),
                    value: clean,
                });
            } else {
                let Value::Array(items) = clean else {
                    return Err(invalid_meta(&param, &format!("{param} is not of type array.")));
                };
                changes.push(MetaChange::Multiple {
                    key: key.key.clone(),
                    values: items,
                });
            }
        }
        Ok(changes)
    }

    fn apply(&self, change: MetaChange, object_id: u64, store: &mut dyn Store) -> RestResult<()> {
        let ty = self.object_type;
        let result = match change {
            MetaChange::Delete { key } => store.delete_meta(ty, object_id, &key, None),
            MetaChange::Single { key, value } => {
                let current = store.get_meta(ty, object_id, &key);
                if current.len() == 1 && current[0] == value {
                    return Ok(());
                }
                store.update_meta(ty, object_id, &key, value)
            }
            MetaChange::Multiple { key, values } => {
                let current = store.get_meta(ty, object_id, &key);
                let mut result = Ok(());
                for stale in current.iter().filter(|v| !values.contains(v)) {
                    result = result.and_then(|()| store.delete_meta(ty, object_id, &key, Some(stale)));
                }
                for fresh in values.into_iter().filter(|v| !current.contains(v)) {
                    result = result.and_then(|()| store.add_meta(ty, object_id, &key, fresh));
                }
                result
            }
        };
        result.map_err(|e| {
            RestError::new(
                "rest_meta_database_error",
                format!("Could not update meta value in database: {e}"),
                500,
            )
        })
    }
}

fn invalid_meta(param: &str, message: &str) -> RestError {
    RestError::new(
        "rest_invalid_param",
        format!("Invalid parameter(s): {param}"),
        400,
    )
    .with_data("params", json!({ param: message }))
}

fn empty_value(ty: JsonType) -> Value {
    match ty {
        JsonType::String => json!(""),
        JsonType::Integer => json!(0),
        JsonType::Boolean => json!(false),
        JsonType::Array => json!([]),
        JsonType::Object => json!({}),
        JsonType::Null => Value::Null,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::SiteOptions;
    use crate::store::MemoryStore;

    fn bridge() -> MetaFields {
        let mut registry = Registry::with_defaults(SiteOptions::default());
        registry.register_meta(
            MetaKey::new(MetaObjectType::Post, "mood", JsonType::String).describe("Mood."),
        );
        registry.register_meta(MetaKey::new(MetaObjectType::Post, "tags", JsonType::Integer).multiple());
        registry.register_meta(
            MetaKey::new(MetaObjectType::Post, "page_only", JsonType::Boolean).for_subtype("page"),
        );
        registry.register_meta(MetaKey::new(MetaObjectType::Post, "_secret", JsonType::String));
        MetaFields::for_post(Arc::new(registry), "post")
    }

    #[test]
    fn schema_lists_registered_keys_for_subtype() {
        let schema = bridge().field_schema();
        let props = schema.properties.unwrap();
        assert!(props.contains_key("mood"));
        assert!(props.contains_key("tags"));
        assert!(!props.contains_key("page_only"));
        assert_eq!(props["tags"].primary_type(), Some(JsonType::Array));
    }

    #[test]
    fn reads_fill_defaults() {
        let store = MemoryStore::default();
        let values = bridge().get_value(1, &store);
        assert_eq!(values["mood"], json!(""));
        assert_eq!(values["tags"], json!([]));
    }

    #[test]
    fn writes_single_multi_and_delete() {
        let meta = bridge();
        let mut store = MemoryStore::default();
        meta.update_value(&json!({"mood": "happy", "tags": ["1", 2]}), 7, &mut store)
            .unwrap();
        assert_eq!(store.get_meta(MetaObjectType::Post, 7, "mood"), vec![json!("happy")]);
        assert_eq!(store.get_meta(MetaObjectType::Post, 7, "tags"), vec![json!(1), json!(2)]);

        meta.update_value(&json!({"tags": [2, 3], "mood": null}), 7, &mut store)
            .unwrap();
        assert!(store.get_meta(MetaObjectType::Post, 7, "mood").is_empty());
        assert_eq!(store.get_meta(MetaObjectType::Post, 7, "tags"), vec![json!(2), json!(3)]);
    }

    #[test]
    fn invalid_payload_writes_nothing() {
        let meta = bridge();
        let mut store = MemoryStore::default();
        let err = meta
            .update_value(&json!({"mood": "ok", "tags": ["x"]}), 7, &mut store)
            .unwrap_err();
        assert_eq!(err.code, "rest_invalid_param");
        assert!(store.get_meta(MetaObjectType::Post, 7, "mood").is_empty());

        let err = meta.check_value(&json!({"_secret": "x"})).unwrap_err();
        assert_eq!(err.status, 403);
        assert_eq!(err.code, "rest_cannot_update");
    }

    #[test]
    fn field_type_follows_the_resource() {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        assert_eq!(MetaFields::for_post(registry.clone(), "page").rest_field_type(), "page");
        assert_eq!(MetaFields::for_comment(registry).rest_field_type(), "comment");
    }
}

//! # Post Types Controller
//!
//! `/wp/v2/types` lists REST-visible post types keyed by name;
//! `/wp/v2/types/{type}` returns one.

use super::{
    Controller, Endpoint, Env, ItemLifecycle, NAMESPACE, Operation, Route,
    add_additional_fields_schema, add_additional_fields_to_object, denied, with_arg,
};
use crate::auth::Cap;
use crate::registry::{PostTypeObject, Registry};
use crate::request::Request;
use crate::response::{Link, Response};
use crate::schema::{Arg, Args, Property, Schema, SchemaBuilder};
use crate::types::{Context, Methods, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PostTypesController {
    registry: Arc<Registry>,
}

impl PostTypesController {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    fn can_edit(post_type: &PostTypeObject, env: &Env<'_>) -> bool {
        env.auth.user_can(Cap::Named(&post_type.caps.edit_posts))
    }

    fn prepare(&self, post_type: &PostTypeObject, req: &Request, env: &Env<'_>) -> RestResult<Response> {
        let Some(schema) = self.item_schema() else {
            return Ok(Response::new(json!({})));
        };
        let taxonomies: Vec<&str> = self
            .registry
            .rest_taxonomies(&post_type.name)
            .into_iter()
            .map(|t| t.name.as_str())
            .collect();
        let supports: Map<String, Value> = post_type
            .features
            .iter()
            .map(|f| (f.clone(), json!(true)))
            .collect();

        let mut data = Map::new();
        data.insert("capabilities".into(), json!(post_type.caps));
        data.insert("description".into(), json!(post_type.description));
        data.insert("hierarchical".into(), json!(post_type.hierarchical));
        data.insert("labels".into(), json!(post_type.labels));
        data.insert("name".into(), json!(post_type.label()));
        data.insert("slug".into(), json!(post_type.name));
        data.insert("supports".into(), Value::Object(supports));
        data.insert("taxonomies".into(), json!(taxonomies));
        data.insert("rest_base".into(), json!(post_type.rest_base));

        add_additional_fields_to_object(&self.registry, "type", &mut data, env.store());
        let data = schema.filter_by_context(data, req.context());

        let mut response = Response::new(Value::Object(data));
        response.add_link(
            "collection",
            Link::new(self.registry.rest_url(&format!("{NAMESPACE}/types"))),
        );
        response.add_link(
            "https://api.w.org/items",
            Link::new(
                self.registry
                    .rest_url(&format!("{NAMESPACE}/{}", post_type.rest_base)),
            ),
        );
        Ok(response)
    }
}

impl Controller for PostTypesController {
    fn routes(&self) -> RestResult<Vec<Route>> {
        let base = format!("/{NAMESPACE}/types");
        let type_arg = Arg::new(
            Property::string().describe("An alphanumeric identifier for the post type."),
        );
        let mut item_args = Args::new();
        item_args.insert("context".into(), self.context_param(Some(Context::View)));

        Ok(vec![
            Route::new(
                base.clone(),
                vec![Endpoint::new(
                    Methods::READABLE,
                    Operation::GetItems,
                    self.collection_params(),
                )],
            )?,
            Route::new(
                format!("{base}/(?P<type>[\\w-]+)"),
                vec![Endpoint::new(
                    Methods::READABLE,
                    Operation::GetItem,
                    with_arg(item_args, "type", &type_arg),
                )],
            )?,
        ])
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn item_schema(&self) -> Option<Schema> {
        use Context::{Edit, Embed, View};
        let builder = SchemaBuilder::new("type")
            .property(
                "capabilities",
                Property::object()
                    .describe("All capabilities used by the post type.")
                    .context(&[Edit])
                    .readonly(),
            )
            .property(
                "description",
                Property::string()
                    .describe("A human-readable description of the post type.")
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "hierarchical",
                Property::boolean()
                    .describe("Whether or not the post type should have children.")
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "labels",
                Property::object()
                    .describe("Human-readable labels for the post type for various contexts.")
                    .context(&[Edit])
                    .readonly(),
            )
            .property(
                "name",
                Property::string()
                    .describe("The title for the post type.")
                    .context(&[View, Edit, Embed])
                    .readonly(),
            )
            .property(
                "slug",
                Property::string()
                    .describe("An alphanumeric identifier for the post type.")
                    .context(&[View, Edit, Embed])
                    .readonly(),
            )
            .property(
                "supports",
                Property::object()
                    .describe("All features, supported by the post type.")
                    .context(&[Edit])
                    .readonly(),
            )
            .property(
                "taxonomies",
                Property::array(Property::string())
                    .describe("Taxonomies associated with post type.")
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "rest_base",
                Property::string()
                    .describe("REST base route for the post type.")
                    .context(&[View, Edit, Embed])
                    .readonly(),
            );
        Some(add_additional_fields_schema(&self.registry, "type", builder).build())
    }

    fn collection_params(&self) -> Args {
        let mut params = Args::new();
        params.insert("context".into(), self.context_param(Some(Context::View)));
        params
    }

    fn get_items_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        if req.context() != Context::Edit {
            return Ok(());
        }
        if self
            .registry
            .post_types()
            .any(|t| t.show_in_rest && Self::can_edit(t, env))
        {
            return Ok(());
        }
        Err(denied(
            "rest_cannot_view",
            "Sorry, you are not allowed to edit posts in this post type.",
            env,
        ))
    }

    fn get_items(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let edit = req.context() == Context::Edit;
        let mut data = Map::new();
        for post_type in self.registry.post_types() {
            if !post_type.show_in_rest || (edit && !Self::can_edit(post_type, env)) {
                continue;
            }
            let item = self.prepare(post_type, req, env)?;
            data.insert(post_type.name.clone(), item.into_collection_item());
        }
        Ok(Response::new(Value::Object(data)))
    }

    /// Visibility is decided by the handler.
    fn get_item_permissions_check(&self, _req: &Request, _env: &Env<'_>) -> RestResult<()> {
        Ok(())
    }

    fn get_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let name = req.param_str("type").unwrap_or_default();
        let post_type = self
            .registry
            .post_type(&name)
            .ok_or_else(|| RestError::new("rest_type_invalid", "Invalid post type.", 404))?;
        if !post_type.show_in_rest {
            return Err(denied("rest_cannot_read_type", "Cannot view post type.", env));
        }
        if req.context() == Context::Edit && !Self::can_edit(post_type, env) {
            return Err(denied(
                "rest_forbidden_context",
                "Sorry, you are not allowed to edit posts in this post type.",
                env,
            ));
        }
        self.prepare(post_type, req, env)
    }
}

impl ItemLifecycle for PostTypesController {
    type Item = PostTypeObject;
    type Prepared = ();

    fn prepare_item_for_response(&self, item: &PostTypeObject, req: &Request, env: &Env<'_>) -> RestResult<Response> {
        self.prepare(item, req, env)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::{Anonymous, RoleAuthorizer};
    use crate::model::{Role, User};
    use crate::registry::SiteOptions;
    use crate::store::MemoryStore;
    use crate::types::Method;

    fn controller() -> (PostTypesController, Arc<Registry>) {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        (PostTypesController::new(Arc::clone(&registry)), registry)
    }

    #[test]
    fn listing_is_keyed_by_name_and_skips_hidden() {
        let (controller, _) = controller();
        let mut store = MemoryStore::default();
        let mut env = Env::new(&mut store, &Anonymous);
        let response = controller
            .get_items(&Request::new(Method::Get, "/wp/v2/types"), &mut env)
            .unwrap();
        let data = response.data().as_object().unwrap();
        assert!(data.contains_key("post"));
        assert!(data.contains_key("page"));
        assert!(!data.contains_key("revision"));
        assert_eq!(data["post"]["taxonomies"], json!(["category", "post_tag"]));
        assert!(data["post"].get("supports").is_none());
        assert!(data["page"]["_links"]["collection"].is_array());
    }

    #[test]
    fn item_errors() {
        let (controller, _) = controller();
        let mut store = MemoryStore::default();
        let mut env = Env::new(&mut store, &Anonymous);
        let req = Request::new(Method::Get, "/wp/v2/types/book").with_param("type", json!("book"));
        assert_eq!(controller.get_item(&req, &mut env).unwrap_err().code, "rest_type_invalid");

        let req = Request::new(Method::Get, "/wp/v2/types/revision").with_param("type", json!("revision"));
        let err = controller.get_item(&req, &mut env).unwrap_err();
        assert_eq!(err.code, "rest_cannot_read_type");
        assert_eq!(err.status, 401);
    }

    #[test]
    fn edit_context_shows_supports_for_editors() {
        let (controller, registry) = controller();
        let mut store = MemoryStore::default();
        let editor = RoleAuthorizer::new(
            Some(User {
                id: 2,
                login: "ed".into(),
                display_name: "Ed".into(),
                slug: "ed".into(),
                email: "ed@example.org".into(),
                url: String::new(),
                roles: vec![Role::Editor],
            }),
            registry,
        );
        let mut env = Env::new(&mut store, &editor);
        let req = Request::new(Method::Get, "/wp/v2/types/page")
            .with_param("type", json!("page"))
            .with_param("context", json!("edit"));
        let response = controller.get_item(&req, &mut env).unwrap();
        assert_eq!(response.data()["supports"]["page-attributes"], json!(true));
        assert_eq!(response.data()["capabilities"]["publish_posts"], json!("publish_pages"));
    }
}

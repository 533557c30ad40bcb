//! # Taxonomies Controller
//!
//! Read-only view of the taxonomy registry at `/wp/v2/taxonomies`.
//! Hidden taxonomies are never listed; edit context is limited to
//! taxonomies the caller can manage.

use super::{
    Controller, Endpoint, Env, ItemLifecycle, NAMESPACE, Operation, Route,
    add_additional_fields_schema, add_additional_fields_to_object, denied, with_arg,
};
use crate::auth::Cap;
use crate::registry::{Registry, TaxonomyObject};
use crate::request::Request;
use crate::response::{Link, Response};
use crate::schema::{Arg, Args, Property, Schema, SchemaBuilder};
use crate::types::{Context, Methods, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TaxonomiesController {
    registry: Arc<Registry>,
}

impl TaxonomiesController {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Taxonomies for `type`, or all of them.
    fn candidates(&self, req: &Request) -> Vec<&TaxonomyObject> {
        match req.param_str("type").filter(|t| !t.is_empty()) {
            Some(post_type) => self.registry.object_taxonomies(&post_type),
            None => self.registry.taxonomies().collect(),
        }
    }

    fn can_manage(taxonomy: &TaxonomyObject, env: &Env<'_>) -> bool {
        env.auth.user_can(Cap::Named(&taxonomy.caps.manage_terms))
    }

    fn prepare(&self, taxonomy: &TaxonomyObject, req: &Request, env: &Env<'_>) -> RestResult<Response> {
        let Some(schema) = self.item_schema() else {
            return Ok(Response::new(json!({})));
        };
        let mut data = Map::new();
        data.insert("name".into(), json!(taxonomy.label()));
        data.insert("slug".into(), json!(taxonomy.name));
        data.insert("capabilities".into(), json!(taxonomy.caps));
        data.insert("description".into(), json!(taxonomy.description));
        data.insert("labels".into(), json!(taxonomy.labels));
        data.insert("types".into(), json!(taxonomy.object_types));
        data.insert("show_cloud".into(), json!(taxonomy.show_tagcloud));
        data.insert("hierarchical".into(), json!(taxonomy.hierarchical));
        data.insert("rest_base".into(), json!(taxonomy.rest_base));

        add_additional_fields_to_object(&self.registry, "taxonomy", &mut data, env.store());
        let data = schema.filter_by_context(data, req.context());

        let mut response = Response::new(Value::Object(data));
        response.add_link(
            "collection",
            Link::new(self.registry.rest_url(&format!("{NAMESPACE}/taxonomies"))),
        );
        response.add_link(
            "https://api.w.org/items",
            Link::new(
                self.registry
                    .rest_url(&format!("{NAMESPACE}/{}", taxonomy.rest_base)),
            ),
        );
        Ok(response)
    }
}

impl Controller for TaxonomiesController {
    fn routes(&self) -> RestResult<Vec<Route>> {
        let base = format!("/{NAMESPACE}/taxonomies");
        let taxonomy = Arg::new(
            Property::string().describe("An alphanumeric identifier for the taxonomy."),
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
                format!("{base}/(?P<taxonomy>[\\w-]+)"),
                vec![Endpoint::new(
                    Methods::READABLE,
                    Operation::GetItem,
                    with_arg(item_args, "taxonomy", &taxonomy),
                )],
            )?,
        ])
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn item_schema(&self) -> Option<Schema> {
        use Context::{Edit, Embed, View};
        let builder = SchemaBuilder::new("taxonomy")
            .property(
                "capabilities",
                Property::object()
                    .describe("All capabilities used by the taxonomy.")
                    .context(&[Edit])
                    .readonly(),
            )
            .property(
                "description",
                Property::string()
                    .describe("A human-readable description of the taxonomy.")
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "hierarchical",
                Property::boolean()
                    .describe("Whether or not the taxonomy should have children.")
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "labels",
                Property::object()
                    .describe("Human-readable labels for the taxonomy for various contexts.")
                    .context(&[Edit])
                    .readonly(),
            )
            .property(
                "name",
                Property::string()
                    .describe("The title for the taxonomy.")
                    .context(&[View, Edit, Embed])
                    .readonly(),
            )
            .property(
                "slug",
                Property::string()
                    .describe("An alphanumeric identifier for the taxonomy.")
                    .context(&[View, Edit, Embed])
                    .readonly(),
            )
            .property(
                "show_cloud",
                Property::boolean()
                    .describe("Whether or not the term cloud should be displayed.")
                    .context(&[Edit])
                    .readonly(),
            )
            .property(
                "types",
                Property::array(Property::string())
                    .describe("Types associated with the taxonomy.")
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "rest_base",
                Property::string()
                    .describe("REST base route for the taxonomy.")
                    .context(&[View, Edit, Embed])
                    .readonly(),
            );
        Some(add_additional_fields_schema(&self.registry, "taxonomy", builder).build())
    }

    fn collection_params(&self) -> Args {
        let mut params = Args::new();
        params.insert("context".into(), self.context_param(Some(Context::View)));
        params.insert(
            "type".into(),
            Arg::new(
                Property::string()
                    .describe("Limit results to taxonomies associated with a specific post type."),
            ),
        );
        params
    }

    fn get_items_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        if req.context() != Context::Edit {
            return Ok(());
        }
        let manages_any = self
            .candidates(req)
            .into_iter()
            .any(|t| t.show_in_rest && Self::can_manage(t, env));
        if manages_any {
            Ok(())
        } else {
            Err(denied(
                "rest_cannot_view",
                "Sorry, you are not allowed to manage terms in this taxonomy.",
                env,
            ))
        }
    }

    fn get_items(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let edit = req.context() == Context::Edit;
        let mut data = Map::new();
        for taxonomy in self.candidates(req) {
            if !taxonomy.show_in_rest || (edit && !Self::can_manage(taxonomy, env)) {
                continue;
            }
            let item = self.prepare(taxonomy, req, env)?;
            data.insert(taxonomy.name.clone(), item.into_collection_item());
        }
        // Serialized as an object even when empty.
        Ok(Response::new(Value::Object(data)))
    }

    fn get_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let name = req.param_str("taxonomy").unwrap_or_default();
        let Some(taxonomy) = self.registry.taxonomy(&name) else {
            return Ok(());
        };
        if !taxonomy.show_in_rest {
            return Err(RestError::forbidden(env.auth.required_code()));
        }
        if req.context() == Context::Edit && !Self::can_manage(taxonomy, env) {
            return Err(denied(
                "rest_forbidden_context",
                "Sorry, you are not allowed to manage terms in this taxonomy.",
                env,
            ));
        }
        Ok(())
    }

    fn get_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let name = req.param_str("taxonomy").unwrap_or_default();
        let taxonomy = self
            .registry
            .taxonomy(&name)
            .ok_or_else(|| RestError::new("rest_taxonomy_invalid", "Invalid taxonomy.", 404))?;
        self.prepare(taxonomy, req, env)
    }
}

impl ItemLifecycle for TaxonomiesController {
    type Item = TaxonomyObject;
    type Prepared = ();

    fn prepare_item_for_response(&self, item: &TaxonomyObject, req: &Request, env: &Env<'_>) -> RestResult<Response> {
        self.prepare(item, req, env)
    }
}

//! # Controller Contract
//!
//! Every resource controller implements [`Controller`]: it declares its
//! routes, its item schema and the lifecycle operations the dispatcher
//! calls. Lifecycle methods a controller does not override answer
//! 405 `invalid-method`.
//!
//! Permission checks see a read-only [`Env`]; handlers get it mutably and
//! are the only place writes reach the store.

pub mod comments;
pub mod meta;
pub mod oembed;
pub mod post_types;
pub mod posts;
pub mod revisions;
pub mod taxonomies;

use crate::auth::Authorizer;
use crate::dates;
use crate::registry::Registry;
use crate::request::Request;
use crate::response::Response;
use crate::schema::{Arg, Args, Property, Sanitize, Schema, SchemaBuilder};
use crate::store::Store;
use crate::types::{Context, Methods, RestError, RestResult, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value, json};
use url::Url;

/// Namespace every built-in controller registers under.
pub const NAMESPACE: &str = "wp/v2";

// =============================================================================
// EXECUTION ENVIRONMENT
// =============================================================================

/// Collaborators for one request.
pub struct Env<'a> {
    pub store: &'a mut dyn Store,
    pub auth: &'a dyn Authorizer,
    /// Wall-clock time the request is processed at.
    pub now: DateTime<Utc>,
}

impl<'a> Env<'a> {
    pub fn new(store: &'a mut dyn Store, auth: &'a dyn Authorizer) -> Self {
        Self {
            store,
            auth,
            now: Utc::now(),
        }
    }

    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Read-only view of the store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        &*self.store
    }

    /// Current time as (site-local, gmt).
    #[must_use]
    pub fn written_at(&self, offset_minutes: i32) -> (NaiveDateTime, NaiveDateTime) {
        let gmt = self.now.naive_utc();
        (dates::to_local(gmt, offset_minutes), gmt)
    }
}

// =============================================================================
// ROUTES
// =============================================================================

/// What an endpoint does when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetItems,
    GetItem,
    CreateItem,
    UpdateItem,
    DeleteItem,
    /// Controller-specific operation, dispatched to `custom`.
    Custom(&'static str),
}

/// One method set on a route.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub methods: Methods,
    pub operation: Operation,
    pub args: Args,
}

impl Endpoint {
    #[must_use]
    pub fn new(methods: Methods, operation: Operation, args: Args) -> Self {
        Self {
            methods,
            operation,
            args,
        }
    }
}

/// A path pattern and its endpoints.
#[derive(Debug, Clone)]
pub struct Route {
    /// Display form, e.g. `/wp/v2/posts/(?P<id>[\d]+)`.
    pub path: String,
    pub pattern: Regex,
    pub endpoints: Vec<Endpoint>,
}

impl Route {
    /// Compile `path` anchored at both ends.
    pub fn new(path: impl Into<String>, endpoints: Vec<Endpoint>) -> RestResult<Self> {
        let path = path.into();
        let pattern = Regex::new(&format!("^{path}$")).map_err(|e| {
            RestError::new("rest_invalid_route", format!("Invalid route {path}: {e}"), 500)
        })?;
        Ok(Self {
            path,
            pattern,
            endpoints,
        })
    }

    /// Named captures when `path` matches.
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<Map<String, Value>> {
        let caps = self.pattern.captures(path)?;
        let mut params = Map::new();
        for name in self.pattern.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                params.insert(name.to_string(), json!(m.as_str()));
            }
        }
        Some(params)
    }

    /// Every method the route answers to.
    #[must_use]
    pub fn methods(&self) -> Methods {
        self.endpoints
            .iter()
            .fold(Methods::NONE, |acc, e| acc.union(e.methods))
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

fn unimplemented_op<T>(name: &str) -> RestResult<T> {
    Err(RestError::not_implemented(name))
}

/// A REST resource controller.
pub trait Controller: Send + Sync {
    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn routes(&self) -> RestResult<Vec<Route>>;

    fn registry(&self) -> &Registry;

    /// Item schema computed from current registry state.
    fn item_schema(&self) -> Option<Schema> {
        None
    }

    /// Item schema without server-only argument options.
    fn public_item_schema(&self) -> Option<Schema> {
        self.item_schema().map(|s| s.public())
    }

    /// Object type additional fields are registered under.
    fn object_type(&self) -> Option<String> {
        self.item_schema().map(|s| s.title)
    }

    fn context_param(&self, default: Option<Context>) -> Arg {
        match self.item_schema() {
            Some(schema) => schema.context_param(default),
            None => {
                let mut spec = Property::string().describe(
                    "Scope under which the request is made; determines fields present in response.",
                );
                if let Some(d) = default {
                    spec = spec.default_value(json!(d.as_str()));
                }
                Arg::new(spec).with_sanitize(Sanitize::Key)
            }
        }
    }

    fn collection_params(&self) -> Args {
        base_collection_params(self.context_param(None))
    }

    /// Endpoint arguments derived from the item schema.
    fn endpoint_args(&self, methods: Methods) -> Args {
        self.item_schema()
            .map(|s| s.endpoint_args(methods))
            .unwrap_or_default()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    fn get_items_permissions_check(&self, _req: &Request, _env: &Env<'_>) -> RestResult<()> {
        unimplemented_op("get_items_permissions_check")
    }

    fn get_items(&self, _req: &Request, _env: &mut Env<'_>) -> RestResult<Response> {
        unimplemented_op("get_items")
    }

    fn get_item_permissions_check(&self, _req: &Request, _env: &Env<'_>) -> RestResult<()> {
        unimplemented_op("get_item_permissions_check")
    }

    fn get_item(&self, _req: &Request, _env: &mut Env<'_>) -> RestResult<Response> {
        unimplemented_op("get_item")
    }

    fn create_item_permissions_check(&self, _req: &Request, _env: &Env<'_>) -> RestResult<()> {
        unimplemented_op("create_item_permissions_check")
    }

    fn create_item(&self, _req: &Request, _env: &mut Env<'_>) -> RestResult<Response> {
        unimplemented_op("create_item")
    }

    fn update_item_permissions_check(&self, _req: &Request, _env: &Env<'_>) -> RestResult<()> {
        unimplemented_op("update_item_permissions_check")
    }

    fn update_item(&self, _req: &Request, _env: &mut Env<'_>) -> RestResult<Response> {
        unimplemented_op("update_item")
    }

    fn delete_item_permissions_check(&self, _req: &Request, _env: &Env<'_>) -> RestResult<()> {
        unimplemented_op("delete_item_permissions_check")
    }

    fn delete_item(&self, _req: &Request, _env: &mut Env<'_>) -> RestResult<Response> {
        unimplemented_op("delete_item")
    }

    fn custom_permissions_check(
        &self,
        name: &str,
        _req: &Request,
        _env: &Env<'_>,
    ) -> RestResult<()> {
        unimplemented_op(&format!("{name}_permissions_check"))
    }

    fn custom(&self, name: &str, _req: &Request, _env: &mut Env<'_>) -> RestResult<Response> {
        unimplemented_op(name)
    }

    /// Run the permission check bound to `operation`.
    fn check_permission(
        &self,
        operation: Operation,
        req: &Request,
        env: &Env<'_>,
    ) -> RestResult<()> {
        match operation {
            Operation::GetItems => self.get_items_permissions_check(req, env),
            Operation::GetItem => self.get_item_permissions_check(req, env),
            Operation::CreateItem => self.create_item_permissions_check(req, env),
            Operation::UpdateItem => self.update_item_permissions_check(req, env),
            Operation::DeleteItem => self.delete_item_permissions_check(req, env),
            Operation::Custom(name) => self.custom_permissions_check(name, req, env),
        }
    }

    /// Run the handler bound to `operation`.
    fn handle(
        &self,
        operation: Operation,
        req: &Request,
        env: &mut Env<'_>,
    ) -> RestResult<Response> {
        match operation {
            Operation::GetItems => self.get_items(req, env),
            Operation::GetItem => self.get_item(req, env),
            Operation::CreateItem => self.create_item(req, env),
            Operation::UpdateItem => self.update_item(req, env),
            Operation::DeleteItem => self.delete_item(req, env),
            Operation::Custom(name) => self.custom(name, req, env),
        }
    }
}

/// Conversion between stored items and the wire.
pub trait ItemLifecycle {
    type Item;
    type Prepared;

    fn prepare_item_for_database(
        &self,
        _req: &Request,
        _env: &Env<'_>,
    ) -> RestResult<Self::Prepared> {
        unimplemented_op("prepare_item_for_database")
    }

    fn prepare_item_for_response(
        &self,
        _item: &Self::Item,
        _req: &Request,
        _env: &Env<'_>,
    ) -> RestResult<Response> {
        unimplemented_op("prepare_item_for_response")
    }
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// `context`, `page`, `per_page` and `search`.
#[must_use]
pub fn base_collection_params(context: Arg) -> Args {
    let mut args = Args::new();
    args.insert("context".into(), context);
    args.insert(
        "page".into(),
        Arg::new(
            Property::integer()
                .describe("Current page of the collection.")
                .default_value(json!(1))
                .minimum(1),
        )
        .with_sanitize(Sanitize::AbsInt),
    );
    args.insert(
        "per_page".into(),
        Arg::new(
            Property::integer()
                .describe("Maximum number of items to be returned in result set.")
                .default_value(json!(10))
                .minimum(1)
                .maximum(100),
        )
        .with_sanitize(Sanitize::AbsInt),
    );
    args.insert(
        "search".into(),
        Arg::new(Property::string().describe("Limit results to those matching a string."))
            .with_sanitize(Sanitize::TextField),
    );
    args
}

/// Delete-route `force` argument.
#[must_use]
pub fn force_arg(description: &str) -> Arg {
    Arg::new(
        Property::boolean()
            .describe(description)
            .default_value(json!(false)),
    )
}

/// Add a route-level argument (such as `id`) to an endpoint's args.
#[must_use]
pub fn with_arg(mut args: Args, name: &str, arg: &Arg) -> Args {
    args.entry(name.to_string()).or_insert_with(|| arg.clone());
    args
}

/// Unique numeric identifier argument shared by single-item routes.
#[must_use]
pub fn id_arg(description: &str) -> Arg {
    Arg::new(Property::integer().describe(description))
}

/// Filter the response map by context.
#[must_use]
pub fn filter_response_by_context(
    schema: &Schema,
    data: Map<String, Value>,
    context: Context,
) -> Map<String, Value> {
    schema.filter_by_context(data, context)
}

/// Number of pages for `total` items, `per_page` at a time.
#[must_use]
pub fn max_pages(total: u64, per_page: u64) -> u64 {
    if per_page == 0 {
        0
    } else {
        total.div_ceil(per_page)
    }
}

/// Collection URL of the current route with the request's query string.
fn collection_base(req: &Request, registry: &Registry) -> Option<Url> {
    let mut url = Url::parse(&registry.rest_url(req.route())).ok()?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (key, value) in req.get_query_params() {
            pairs.append_pair(key, &query_value(value));
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Some(url)
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(query_value).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn with_page(base: &Url, page: u64) -> String {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("page", &page.to_string());
    }
    url.to_string()
}

/// `X-WP-Total`, `X-WP-TotalPages` and prev/next `Link` headers.
pub fn add_pagination_headers(
    response: &mut Response,
    req: &Request,
    registry: &Registry,
    total: u64,
    per_page: u64,
    page: u64,
) {
    let pages = max_pages(total, per_page);
    response.header("X-WP-Total", total.to_string(), true);
    response.header("X-WP-TotalPages", pages.to_string(), true);

    let Some(base) = collection_base(req, registry) else {
        return;
    };
    if page > 1 {
        let prev = (page - 1).min(pages);
        response.link_header("prev", &with_page(&base, prev), &[]);
    }
    if pages > page {
        response.link_header("next", &with_page(&base, page + 1), &[]);
    }
}

/// Collection response body: every item flattened with its links.
#[must_use]
pub fn collection_response(items: Vec<Response>) -> Response {
    Response::new(Value::Array(
        items.into_iter().map(Response::into_collection_item).collect(),
    ))
}

// -----------------------------------------------------------------------------
// Additional fields
// -----------------------------------------------------------------------------

/// Populate registered additional fields through their getters.
pub fn add_additional_fields_to_object(
    registry: &Registry,
    object_type: &str,
    data: &mut Map<String, Value>,
    store: &dyn Store,
) {
    let Some(fields) = registry.rest_fields(object_type) else {
        return;
    };
    for (name, field) in fields {
        if let Some(get) = &field.get {
            let value = get(data, name, store);
            data.insert(name.clone(), value);
        }
    }
}

/// Run update callbacks for fields present in the request. Stops at the
/// first error.
pub fn update_additional_fields_for_object(
    registry: &Registry,
    object_type: &str,
    object_id: u64,
    req: &Request,
    store: &mut dyn Store,
) -> RestResult<()> {
    let Some(fields) = registry.rest_fields(object_type) else {
        return Ok(());
    };
    for (name, field) in fields {
        let (Some(update), Some(value)) = (&field.update, req.param(name)) else {
            continue;
        };
        update(value, object_id, name, store)?;
    }
    Ok(())
}

/// Merge schemas of additional fields registered for the builder's title.
#[must_use]
pub fn add_additional_fields_schema(
    registry: &Registry,
    object_type: &str,
    builder: SchemaBuilder,
) -> SchemaBuilder {
    let Some(fields) = registry.rest_fields(object_type) else {
        return builder;
    };
    builder.extend(
        fields
            .iter()
            .filter_map(|(name, f)| f.schema.clone().map(|s| (name.clone(), s))),
    )
}

/// Map a storage failure onto the REST error surfaced to the client.
#[must_use]
pub fn store_failure(err: StoreError) -> RestError {
    let rest = RestError::from(err);
    if rest.status >= 500 {
        tracing::warn!(event = "store_failure", code = %rest.code, "{}", rest.message);
    }
    rest
}

/// Error for a permission check answering "no" with a specific code.
#[must_use]
pub fn denied(code: &str, message: &str, env: &Env<'_>) -> RestError {
    RestError::new(code, message, env.auth.required_code())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::{AdditionalField, SiteOptions};
    use crate::store::MemoryStore;
    use crate::types::Method;
    use std::sync::Arc;

    struct Bare(Registry);

    impl Controller for Bare {
        fn routes(&self) -> RestResult<Vec<Route>> {
            Ok(vec![Route::new(
                "/wp/v2/bare/(?P<id>[\\d]+)",
                vec![Endpoint::new(Methods::READABLE, Operation::GetItem, Args::new())],
            )?])
        }

        fn registry(&self) -> &Registry {
            &self.0
        }
    }

    #[test]
    fn unimplemented_lifecycle_answers_405() {
        let controller = Bare(Registry::new(SiteOptions::default()));
        let mut store = MemoryStore::default();
        let auth = crate::auth::Anonymous;
        let mut env = Env::new(&mut store, &auth);
        let req = Request::new(Method::Get, "/wp/v2/bare/1");
        let err = controller.get_item(&req, &mut env).unwrap_err();
        assert_eq!(err.status, 405);
        assert_eq!(err.code, "invalid-method");
        let err = controller
            .check_permission(Operation::DeleteItem, &req, &env)
            .unwrap_err();
        assert_eq!(err.status, 405);
    }

    #[test]
    fn routes_capture_named_groups() {
        let controller = Bare(Registry::new(SiteOptions::default()));
        let routes = controller.routes().unwrap();
        let params = routes[0].captures("/wp/v2/bare/42").unwrap();
        assert_eq!(params["id"], json!("42"));
        assert!(routes[0].captures("/wp/v2/bare/abc").is_none());
        assert!(routes[0].methods().contains(Method::Head));
    }

    #[test]
    fn base_collection_params_have_bounds() {
        let args = base_collection_params(Arg::new(Property::string()));
        assert_eq!(args["page"].spec.default, Some(json!(1)));
        assert_eq!(args["per_page"].spec.maximum, Some(100));
        assert_eq!(args["search"].sanitize, Sanitize::TextField);
    }

    #[test]
    fn pagination_headers_and_links() {
        let registry = Registry::new(SiteOptions::default());
        let req = Request::new(Method::Get, "/wp/v2/posts")
            .with_param("page", json!(2))
            .with_param("per_page", json!(2))
            .with_param("categories", json!([3, 4]));
        let mut response = Response::default();
        add_pagination_headers(&mut response, &req, &registry, 5, 2, 2);
        assert_eq!(response.get_header("X-WP-Total"), Some("5"));
        assert_eq!(response.get_header("X-WP-TotalPages"), Some("3"));
        let links: Vec<&str> = response
            .headers()
            .iter()
            .filter(|(k, _)| k == "Link")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(links.len(), 2);
        assert!(links[0].contains("page=1"));
        assert!(links[0].contains("rel=\"prev\""));
        assert!(links[0].contains("categories=3%2C4"));
        assert!(links[1].contains("page=3"));
        assert!(links[1].contains("rel=\"next\""));
    }

    #[test]
    fn prev_link_is_clamped_past_the_end() {
        let registry = Registry::new(SiteOptions::default());
        let req = Request::new(Method::Get, "/wp/v2/posts").with_param("page", json!(9));
        let mut response = Response::default();
        add_pagination_headers(&mut response, &req, &registry, 3, 1, 9);
        let prev = response.get_header("Link").unwrap();
        assert!(prev.contains("page=3"));
        assert_eq!(max_pages(0, 10), 0);
        assert_eq!(max_pages(11, 10), 2);
    }

    #[test]
    fn additional_fields_read_and_write() {
        let mut registry = Registry::new(SiteOptions::default());
        registry.register_rest_field(
            "post",
            "shout",
            AdditionalField {
                get: Some(Arc::new(|data, _, _| {
                    json!(data["slug"].as_str().unwrap_or_default().to_uppercase())
                })),
                update: Some(Arc::new(|value, _, _, _| {
                    if value == "bad" {
                        Err(RestError::new("shout_invalid", "No.", 400))
                    } else {
                        Ok(())
                    }
                })),
                schema: Some(Property::string()),
            },
        );
        let store = MemoryStore::default();
        let mut data = Map::new();
        data.insert("slug".into(), json!("hello"));
        add_additional_fields_to_object(&registry, "post", &mut data, &store);
        assert_eq!(data["shout"], json!("HELLO"));

        let mut store = MemoryStore::default();
        let absent = Request::new(Method::Post, "/");
        assert!(update_additional_fields_for_object(&registry, "post", 1, &absent, &mut store).is_ok());
        let bad = Request::new(Method::Post, "/").with_param("shout", json!("bad"));
        let err = update_additional_fields_for_object(&registry, "post", 1, &bad, &mut store)
            .unwrap_err();
        assert_eq!(err.code, "shout_invalid");

        let schema = add_additional_fields_schema(&registry, "post", SchemaBuilder::new("post")).build();
        assert!(schema.has("shout"));
    }
}

//! # REST Server
//!
//! Route table and dispatcher. A call runs through a fixed pipeline:
//!
//! ```text
//! match route -> defaults -> validate -> sanitize -> permission -> handler
//! ```
//!
//! Any step may answer with a [`RestError`]; the dispatcher is the only
//! place errors become responses. `OPTIONS` on a route answers with its
//! description instead of running the pipeline, and `/` lists every route.

use crate::auth::Authorizer;
use crate::controller::comments::CommentsController;
use crate::controller::oembed::{OEmbedController, OEmbedProvider, TransientCache};
use crate::controller::post_types::PostTypesController;
use crate::controller::posts::PostsController;
use crate::controller::revisions::RevisionsController;
use crate::controller::taxonomies::TaxonomiesController;
use crate::controller::{Controller, Endpoint, Env, Operation, Route};
use crate::registry::Registry;
use crate::request::Request;
use crate::response::Response;
use crate::store::Store;
use crate::types::{Method, Methods, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Post types served by a dedicated media controller in full installs.
const UNSERVED_POST_TYPES: [&str; 1] = ["attachment"];

struct RegisteredRoute {
    namespace: String,
    route: Route,
    controller: usize,
}

/// Route table plus the controllers behind it.
pub struct RestServer {
    registry: Arc<Registry>,
    controllers: Vec<Arc<dyn Controller>>,
    routes: Vec<RegisteredRoute>,
}

impl std::fmt::Debug for RestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestServer")
            .field("controllers", &self.controllers.len())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl RestServer {
    /// An empty server.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            controllers: Vec::new(),
            routes: Vec::new(),
        }
    }

    /// Server with the built-in controllers: posts and revisions for each
    /// REST-visible post type, comments, taxonomies, post types and oEmbed.
    pub fn with_defaults(
        registry: Arc<Registry>,
        cache: Arc<dyn TransientCache>,
        provider: Arc<dyn OEmbedProvider>,
    ) -> RestResult<Self> {
        let mut server = Self::new(Arc::clone(&registry));
        let post_types: Vec<(String, bool)> = registry
            .post_types()
            .filter(|t| t.show_in_rest && !UNSERVED_POST_TYPES.contains(&t.name.as_str()))
            .map(|t| (t.name.clone(), t.supports("revisions")))
            .collect();
        for (name, revisions) in post_types {
            server.register(Arc::new(PostsController::new(&name, Arc::clone(&registry))))?;
            if revisions {
                server.register(Arc::new(RevisionsController::new(&name, Arc::clone(&registry))))?;
            }
        }
        server.register(Arc::new(CommentsController::new(Arc::clone(&registry))))?;
        server.register(Arc::new(TaxonomiesController::new(Arc::clone(&registry))))?;
        server.register(Arc::new(PostTypesController::new(Arc::clone(&registry))))?;
        server.register(Arc::new(OEmbedController::new(
            Arc::clone(&registry),
            cache,
            provider,
        )))?;
        Ok(server)
    }

    /// Add a controller and its routes.
    pub fn register(&mut self, controller: Arc<dyn Controller>) -> RestResult<()> {
        let index = self.controllers.len();
        let namespace = controller.namespace().to_string();
        for route in controller.routes()? {
            tracing::trace!(event = "route_registered", route = %route.path);
            self.routes.push(RegisteredRoute {
                namespace: namespace.clone(),
                route,
                controller: index,
            });
        }
        self.controllers.push(controller);
        Ok(())
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registered route paths in registration order.
    pub fn route_paths(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.route.path.as_str())
    }

    /// Registered namespaces, each once.
    #[must_use]
    pub fn namespaces(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.routes
            .iter()
            .filter(|r| seen.insert(r.namespace.clone()))
            .map(|r| r.namespace.clone())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Serve one call at the current time.
    pub fn dispatch(&self, req: Request, store: &mut dyn Store, auth: &dyn Authorizer) -> Response {
        let mut env = Env::new(store, auth);
        self.dispatch_in(req, &mut env)
    }

    /// Serve one call in a prepared environment. The returned response has
    /// its links folded into the body.
    pub fn dispatch_in(&self, req: Request, env: &mut Env<'_>) -> Response {
        let envelope = req.get_query_params().contains_key("_envelope");
        let response = match self.serve(req, env) {
            Ok(response) => finalize(response),
            Err(err) => {
                if err.status >= 500 {
                    tracing::warn!(event = "request_failed", code = %err.code, status = err.status);
                }
                Response::from_error(&err)
            }
        };
        if envelope { wrap_envelope(&response) } else { response }
    }

    fn serve(&self, mut req: Request, env: &mut Env<'_>) -> RestResult<Response> {
        let path = normalize_path(req.route());
        if path == "/" {
            return Ok(Response::new(self.index()));
        }

        let matched: Vec<(&RegisteredRoute, Map<String, Value>)> = self
            .routes
            .iter()
            .filter_map(|r| r.route.captures(&path).map(|caps| (r, caps)))
            .collect();
        let Some((first, _)) = matched.first() else {
            return Err(no_route());
        };
        if req.method() == Method::Options {
            return Ok(Response::new(self.describe_route(first)));
        }

        let method = req.method();
        let Some((registered, endpoint, captures)) = matched.into_iter().find_map(|(r, caps)| {
            r.route
                .endpoints
                .iter()
                .find(|e| e.methods.contains(method))
                .map(|e| (r, e, caps))
        }) else {
            return Err(no_route());
        };
        let controller = &self.controllers[registered.controller];
        tracing::debug!(
            event = "route_matched",
            method = method.as_str(),
            route = %registered.route.path,
        );

        req.set_url_params(captures);
        req.set_attributes(endpoint.args.clone());
        req.apply_defaults();
        req.has_valid_params()?;
        req.sanitize_params(env.auth)?;

        controller.check_permission(endpoint.operation, &req, env)?;
        let mut response = controller.handle(endpoint.operation, &req, env)?;

        if endpoint.operation == Operation::GetItem {
            let allowed = allowed_methods(controller.as_ref(), &registered.route, &req, env);
            response.header("Allow", allowed.names().join(", "), true);
        }
        Ok(response)
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    fn endpoints_json(endpoints: &[Endpoint]) -> Value {
        Value::Array(
            endpoints
                .iter()
                .map(|e| {
                    let args: Map<String, Value> = e
                        .args
                        .iter()
                        .map(|(name, arg)| (name.clone(), arg.to_json()))
                        .collect();
                    json!({"methods": e.methods.names(), "args": args})
                })
                .collect(),
        )
    }

    fn route_methods(route: &Route) -> Vec<&'static str> {
        route.methods().names()
    }

    fn describe_route(&self, registered: &RegisteredRoute) -> Value {
        let controller = &self.controllers[registered.controller];
        let mut data = json!({
            "namespace": registered.namespace,
            "methods": Self::route_methods(&registered.route),
            "endpoints": Self::endpoints_json(&registered.route.endpoints),
        });
        if let (Value::Object(map), Some(schema)) = (&mut data, controller.public_item_schema()) {
            map.insert("schema".into(), schema.to_json());
        }
        data
    }

    /// `GET /` body: site description, namespaces and every route.
    #[must_use]
    pub fn index(&self) -> Value {
        let options = self.registry.options();
        let mut routes = Map::new();
        for registered in &self.routes {
            routes.insert(
                registered.route.path.clone(),
                json!({
                    "namespace": registered.namespace,
                    "methods": Self::route_methods(&registered.route),
                    "endpoints": Self::endpoints_json(&registered.route.endpoints),
                }),
            );
        }
        json!({
            "name": options.name,
            "description": options.description,
            "url": options.home,
            "home": options.home,
            "namespaces": self.namespaces(),
            "routes": routes,
        })
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn no_route() -> RestError {
    RestError::new(
        "rest_no_route",
        "No route was found matching the URL and request method",
        404,
    )
}

/// Leading slash, no trailing slash (except the root).
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}

/// Methods of a single-item route the caller may use: reads always, writes
/// and deletes when their permission check passes.
fn allowed_methods(controller: &dyn Controller, route: &Route, req: &Request, env: &Env<'_>) -> Methods {
    route.endpoints.iter().fold(Methods::NONE, |acc, endpoint| {
        let allowed = match endpoint.operation {
            Operation::UpdateItem | Operation::DeleteItem => {
                controller.check_permission(endpoint.operation, req, env).is_ok()
            }
            _ => true,
        };
        if allowed { acc.union(endpoint.methods) } else { acc }
    })
}

/// Fold links into the body.
fn finalize(response: Response) -> Response {
    let status = response.status();
    let headers = response.headers().to_vec();
    let mut out = Response::new(response.into_data());
    out.set_status(status);
    for (name, value) in headers {
        out.header(&name, value, false);
    }
    out
}

/// `_envelope`: status and headers moved into a 200 body.
fn wrap_envelope(response: &Response) -> Response {
    let mut headers = Map::new();
    for (name, value) in response.headers() {
        let merged = match headers.get(name).and_then(Value::as_str) {
            Some(existing) => format!("{existing}, {value}"),
            None => value.clone(),
        };
        headers.insert(name.clone(), json!(merged));
    }
    Response::new(json!({
        "body": response.data(),
        "status": response.status(),
        "headers": headers,
    }))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::{Anonymous, RoleAuthorizer};
    use crate::controller::oembed::{MemoryTransientCache, NoProvider};
    use crate::model::{Role, User};
    use crate::registry::SiteOptions;
    use crate::store::MemoryStore;

    fn server() -> (RestServer, Arc<Registry>) {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let server = RestServer::with_defaults(
            Arc::clone(&registry),
            Arc::new(MemoryTransientCache::new()),
            Arc::new(NoProvider),
        )
        .unwrap();
        (server, registry)
    }

    fn admin(registry: Arc<Registry>) -> RoleAuthorizer {
        RoleAuthorizer::new(
            Some(User {
                id: 1,
                login: "admin".into(),
                display_name: "Admin".into(),
                slug: "admin".into(),
                email: "admin@example.org".into(),
                url: String::new(),
                roles: vec![Role::Administrator],
            }),
            registry,
        )
    }

    #[test]
    fn registers_builtin_routes() {
        let (server, _) = server();
        let paths: Vec<&str> = server.route_paths().collect();
        assert!(paths.contains(&"/wp/v2/posts"));
        assert!(paths.contains(&"/wp/v2/pages/(?P<parent>[\\d]+)/revisions"));
        assert!(paths.contains(&"/wp/v2/comments/(?P<id>[\\d]+)"));
        assert!(paths.contains(&"/oembed/1.0/proxy"));
        assert!(!paths.iter().any(|p| p.starts_with("/wp/v2/media")));
        assert_eq!(server.namespaces(), vec!["wp/v2", "oembed/1.0"]);
    }

    #[test]
    fn unknown_route_is_404() {
        let (server, _) = server();
        let mut store = MemoryStore::default();
        let response = server.dispatch(Request::new(Method::Get, "/wp/v2/nothing"), &mut store, &Anonymous);
        assert_eq!(response.status(), 404);
        assert_eq!(response.data()["code"], json!("rest_no_route"));

        let response = server.dispatch(Request::new(Method::Delete, "/wp/v2/posts"), &mut store, &Anonymous);
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn index_lists_routes() {
        let (server, _) = server();
        let mut store = MemoryStore::default();
        let response = server.dispatch(Request::new(Method::Get, "/"), &mut store, &Anonymous);
        assert_eq!(response.status(), 200);
        assert!(response.data()["routes"]["/wp/v2/types"].is_object());
        assert_eq!(response.data()["namespaces"][0], json!("wp/v2"));
    }

    #[test]
    fn options_describes_route() {
        let (server, _) = server();
        let mut store = MemoryStore::default();
        let response = server.dispatch(Request::new(Method::Options, "/wp/v2/posts"), &mut store, &Anonymous);
        let data = response.data();
        assert_eq!(data["namespace"], json!("wp/v2"));
        assert_eq!(data["methods"], json!(["GET", "HEAD", "POST"]));
        assert_eq!(data["schema"]["title"], json!("post"));
        assert!(data["endpoints"][0]["args"]["per_page"].is_object());
    }

    #[test]
    fn create_then_read_through_pipeline() {
        let (server, registry) = server();
        let mut store = MemoryStore::default();
        let auth = admin(registry);
        let mut body = Map::new();
        body.insert("title".into(), json!("Hello"));
        body.insert("status".into(), json!("publish"));
        let created = server.dispatch(
            Request::new(Method::Post, "/wp/v2/posts").with_body(body),
            &mut store,
            &auth,
        );
        assert_eq!(created.status(), 201);
        let id = created.data()["id"].as_u64().unwrap();
        assert!(created.data()["_links"]["self"].is_array());

        let read = server.dispatch(
            Request::new(Method::Get, format!("/wp/v2/posts/{id}/")),
            &mut store,
            &Anonymous,
        );
        assert_eq!(read.status(), 200);
        assert_eq!(read.data()["title"]["rendered"], json!("Hello"));
        assert_eq!(read.get_header("Allow"), Some("GET, HEAD"));

        let read = server.dispatch(
            Request::new(Method::Get, format!("/wp/v2/posts/{id}")),
            &mut store,
            &auth,
        );
        assert_eq!(read.get_header("Allow"), Some("GET, HEAD, POST, PUT, PATCH, DELETE"));
    }

    #[test]
    fn invalid_params_are_rejected_before_permission() {
        let (server, _) = server();
        let mut store = MemoryStore::default();
        let response = server.dispatch(
            Request::new(Method::Get, "/wp/v2/posts").with_param("per_page", json!(500)),
            &mut store,
            &Anonymous,
        );
        assert_eq!(response.status(), 400);
        assert_eq!(response.data()["code"], json!("rest_invalid_param"));

        let response = server.dispatch(Request::new(Method::Get, "/oembed/1.0/embed"), &mut store, &Anonymous);
        assert_eq!(response.data()["code"], json!("rest_missing_callback_param"));
    }

    #[test]
    fn envelope_wraps_errors_in_200() {
        let (server, _) = server();
        let mut store = MemoryStore::default();
        let response = server.dispatch(
            Request::new(Method::Get, "/wp/v2/posts/999").with_param("_envelope", json!("1")),
            &mut store,
            &Anonymous,
        );
        assert_eq!(response.status(), 200);
        assert_eq!(response.data()["status"], json!(404));
        assert_eq!(response.data()["body"]["code"], json!("rest_post_invalid_id"));
    }
}

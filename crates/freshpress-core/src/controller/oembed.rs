//! # oEmbed Controller
//!
//! Two read-only endpoints under the `oembed/1.0` namespace:
//!
//! - `/embed` resolves one of this site's permalinks to a published post
//!   and describes it as a `rich` oEmbed object.
//! - `/proxy` fetches oEmbed data for a remote URL through an
//!   [`OEmbedProvider`] and caches it in a [`TransientCache`].
//!
//! ## Proxy caching
//!
//! The cache key hashes the full normalized argument set, not just the URL,
//! so the same URL at two widths is cached twice. The cache is consulted
//! before any fetch and a hit is returned as stored.

use super::{Controller, Endpoint, Env, Operation, Route};
use crate::registry::Registry;
use crate::request::Request;
use crate::response::Response;
use crate::schema::{Arg, Args, Format, Property, Sanitize};
use crate::store::{PostStore, UserStore};
use crate::text::esc_html;
use crate::types::{Methods, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use url::Url;

pub const OEMBED_NAMESPACE: &str = "oembed/1.0";

const MIN_WIDTH: u64 = 200;
const MAX_WIDTH: u64 = 600;
const MIN_HEIGHT: u64 = 200;
const MAX_HEIGHT: u64 = 1000;

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Key/value store with per-entry expiry.
pub trait TransientCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value, ttl: Duration);
}

/// Source of oEmbed data for remote URLs.
pub trait OEmbedProvider: Send + Sync {
    /// `None` when the URL has no oEmbed representation.
    fn fetch(&self, url: &str, args: &Map<String, Value>) -> Option<Value>;
}

impl<F> OEmbedProvider for F
where
    F: Fn(&str, &Map<String, Value>) -> Option<Value> + Send + Sync,
{
    fn fetch(&self, url: &str, args: &Map<String, Value>) -> Option<Value> {
        self(url, args)
    }
}

/// Provider that never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProvider;

impl OEmbedProvider for NoProvider {
    fn fetch(&self, _url: &str, _args: &Map<String, Value>) -> Option<Value> {
        None
    }
}

/// Process-local transient cache. Concurrent writers to one key: last
/// writer wins. A `None` expiry never lapses.
#[derive(Debug, Default)]
pub struct MemoryTransientCache {
    entries: Mutex<HashMap<String, (Value, Option<Instant>)>>,
}

fn lapsed(expires: Option<Instant>, now: Instant) -> bool {
    expires.is_some_and(|at| at <= now)
}

impl MemoryTransientCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransientCache for MemoryTransientCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((_, expires)) if lapsed(*expires, Instant::now()) => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    /// Expired entries are pruned on every write.
    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        let expires = now.checked_add(ttl);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (_, at)| !lapsed(*at, now));
        entries.insert(key.to_string(), (value, expires));
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Cache key for a proxy request: `oembed_` + blake3 of the sorted
/// arguments. Internal `_`-prefixed flags are not part of the key.
#[must_use]
pub fn proxy_cache_key(params: &Map<String, Value>) -> String {
    let normalized: BTreeMap<&String, &Value> = params
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .collect();
    let serialized = serde_json::to_vec(&normalized).unwrap_or_default();
    format!("oembed_{}", blake3::hash(&serialized).to_hex())
}

/// Embed frame size for a requested max width.
#[must_use]
pub fn embed_dimensions(maxwidth: u64) -> (u64, u64) {
    let width = maxwidth.clamp(MIN_WIDTH, MAX_WIDTH);
    let height = (width * 9).div_ceil(16).clamp(MIN_HEIGHT, MAX_HEIGHT);
    (width, height)
}

// =============================================================================
// CONTROLLER
// =============================================================================

#[derive(Clone)]
pub struct OEmbedController {
    registry: Arc<Registry>,
    cache: Arc<dyn TransientCache>,
    provider: Arc<dyn OEmbedProvider>,
}

impl std::fmt::Debug for OEmbedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OEmbedController").finish_non_exhaustive()
    }
}

impl OEmbedController {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        cache: Arc<dyn TransientCache>,
        provider: Arc<dyn OEmbedProvider>,
    ) -> Self {
        Self {
            registry,
            cache,
            provider,
        }
    }

    fn invalid_url() -> RestError {
        RestError::new("oembed_invalid_url", "Not Found", 404)
    }

    /// Post id behind one of this site's permalinks.
    fn url_to_post_id(&self, raw: &str) -> Option<u64> {
        let url = Url::parse(raw).ok()?;
        let home = Url::parse(&self.registry.options().home).ok()?;
        if url.host_str() != home.host_str() || url.port_or_known_default() != home.port_or_known_default() {
            return None;
        }
        url.query_pairs()
            .find(|(k, _)| matches!(k.as_ref(), "p" | "page_id" | "attachment_id"))
            .and_then(|(_, v)| v.parse().ok())
    }

    fn embed_html(permalink: &str, title: &str, width: u64, height: u64) -> String {
        let title = esc_html(title);
        format!(
            "<blockquote class=\"wp-embedded-content\"><a href=\"{permalink}\">{title}</a></blockquote>\n\
             <iframe sandbox=\"allow-scripts\" security=\"restricted\" src=\"{permalink}&embed=true\" \
             width=\"{width}\" height=\"{height}\" title=\"{title}\" frameborder=\"0\" marginwidth=\"0\" \
             marginheight=\"0\" scrolling=\"no\" class=\"wp-embedded-content\"></iframe>"
        )
    }

    fn proxy(&self, req: &Request) -> RestResult<Response> {
        let mut args = req.get_params();
        args.retain(|k, _| !k.starts_with('_'));
        let key = proxy_cache_key(&args);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(event = "oembed_cache_hit", key = %key);
            return Ok(Response::new(cached));
        }

        let url = args
            .remove("url")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(Self::invalid_url)?;
        let data = self.provider.fetch(&url, &args).ok_or_else(Self::invalid_url)?;
        let ttl = Duration::from_secs(self.registry.options().oembed_cache_ttl);
        self.cache.set(&key, data.clone(), ttl);
        tracing::debug!(event = "oembed_cache_store", key = %key, ttl = ttl.as_secs());
        Ok(Response::new(data))
    }
}

impl Controller for OEmbedController {
    fn namespace(&self) -> &str {
        OEMBED_NAMESPACE
    }

    fn routes(&self) -> RestResult<Vec<Route>> {
        let maxwidth = self.registry.options().oembed_default_width;
        let url = |description: &str| {
            Arg::new(
                Property::string()
                    .describe(description)
                    .format(Format::Uri)
                    .required(),
            )
        };
        let maxwidth_arg = Arg::new(
            Property::integer()
                .describe("The maximum width of the embed frame in pixels.")
                .default_value(json!(maxwidth)),
        )
        .with_sanitize(Sanitize::AbsInt);

        let mut embed = Args::new();
        embed.insert("url".into(), url("The URL of the resource for which to fetch oEmbed data."));
        embed.insert(
            "format".into(),
            Arg::new(Property::string().default_value(json!("json")).one_of(["json", "xml"])),
        );
        embed.insert("maxwidth".into(), maxwidth_arg.clone());

        let mut proxy = Args::new();
        proxy.insert("url".into(), url("The URL of the resource for which to fetch oEmbed data."));
        proxy.insert(
            "format".into(),
            Arg::new(
                Property::string()
                    .describe("The oEmbed format to use.")
                    .default_value(json!("json"))
                    .one_of(["json", "xml"]),
            ),
        );
        proxy.insert("maxwidth".into(), maxwidth_arg);
        proxy.insert(
            "maxheight".into(),
            Arg::new(Property::integer().describe("The maximum height of the embed frame in pixels."))
                .with_sanitize(Sanitize::AbsInt),
        );
        proxy.insert(
            "discover".into(),
            Arg::new(
                Property::boolean()
                    .describe("Whether to perform an oEmbed discovery request for non-whitelisted providers.")
                    .default_value(json!(true)),
            ),
        );

        Ok(vec![
            Route::new(
                format!("/{OEMBED_NAMESPACE}/embed"),
                vec![Endpoint::new(Methods::READABLE, Operation::GetItem, embed)],
            )?,
            Route::new(
                format!("/{OEMBED_NAMESPACE}/proxy"),
                vec![Endpoint::new(Methods::READABLE, Operation::Custom("proxy"), proxy)],
            )?,
        ])
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn get_item_permissions_check(&self, _req: &Request, _env: &Env<'_>) -> RestResult<()> {
        Ok(())
    }

    fn get_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let store = env.store();
        let post = req
            .param_str("url")
            .and_then(|url| self.url_to_post_id(&url))
            .and_then(|id| store.get_post(id))
            .filter(|p| p.status == "publish")
            .filter(|p| {
                self.registry
                    .post_type(&p.post_type)
                    .is_some_and(|t| t.is_viewable())
            })
            .ok_or_else(Self::invalid_url)?;

        let options = self.registry.options();
        let (width, height) = embed_dimensions(req.param_u64("maxwidth").unwrap_or(MAX_WIDTH));
        let permalink = super::posts::PostsController::new(&post.post_type, Arc::clone(&self.registry))
            .permalink(&post);
        let home = options.home.trim_end_matches('/');
        let (author_name, author_url) = match store.get_user(post.author) {
            Some(user) => (user.display_name, format!("{home}/?author={}", user.id)),
            None => (options.name.clone(), home.to_string()),
        };

        Ok(Response::new(json!({
            "version": "1.0",
            "provider_name": options.name,
            "provider_url": home,
            "author_name": author_name,
            "author_url": author_url,
            "title": post.title,
            "type": "rich",
            "width": width,
            "height": height,
            "html": Self::embed_html(&permalink, &post.title, width, height),
        })))
    }

    fn custom_permissions_check(&self, name: &str, _req: &Request, env: &Env<'_>) -> RestResult<()> {
        match name {
            "proxy" if env.auth.user_can(crate::auth::Cap::Named("edit_posts")) => Ok(()),
            "proxy" => Err(RestError::new(
                "rest_forbidden",
                "Sorry, you are not allowed to make proxied oEmbed requests.",
                env.auth.required_code(),
            )),
            other => Err(RestError::not_implemented(&format!("{other}_permissions_check"))),
        }
    }

    fn custom(&self, name: &str, req: &Request, _env: &mut Env<'_>) -> RestResult<Response> {
        match name {
            "proxy" => self.proxy(req),
            other => Err(RestError::not_implemented(other)),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::{Anonymous, RoleAuthorizer};
    use crate::model::{PreparedPost, Role, User};
    use crate::registry::SiteOptions;
    use crate::store::MemoryStore;
    use crate::types::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn controller(provider: Arc<dyn OEmbedProvider>) -> (OEmbedController, Arc<Registry>, Arc<MemoryTransientCache>) {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let cache = Arc::new(MemoryTransientCache::new());
        let controller = OEmbedController::new(
            Arc::clone(&registry),
            Arc::clone(&cache) as Arc<dyn TransientCache>,
            provider,
        );
        (controller, registry, cache)
    }

    #[test]
    fn dimensions_are_clamped() {
        assert_eq!(embed_dimensions(600), (600, 338));
        assert_eq!(embed_dimensions(50), (200, 200));
        assert_eq!(embed_dimensions(5000), (600, 338));
    }

    #[test]
    fn embed_resolves_local_published_posts() {
        let (controller, _, _) = controller(Arc::new(NoProvider));
        let mut store = MemoryStore::default();
        let id = store
            .insert_post(&PreparedPost {
                title: Some("Tom & Jerry".into()),
                status: Some("publish".into()),
                ..PreparedPost::default()
            })
            .unwrap();
        let draft = store.insert_post(&PreparedPost::default()).unwrap();
        let mut env = Env::new(&mut store, &Anonymous);

        let req = Request::new(Method::Get, "/oembed/1.0/embed")
            .with_param("url", json!(format!("http://localhost:8080/?p={id}")))
            .with_param("maxwidth", json!(400));
        let response = controller.get_item(&req, &mut env).unwrap();
        let data = response.data();
        assert_eq!(data["type"], json!("rich"));
        assert_eq!(data["width"], json!(400));
        assert_eq!(data["height"], json!(225));
        assert!(data["html"].as_str().unwrap().contains("Tom &amp; Jerry"));

        for url in [
            format!("http://localhost:8080/?p={draft}"),
            format!("http://elsewhere.test/?p={id}"),
            "not a url".to_string(),
        ] {
            let req = Request::new(Method::Get, "/oembed/1.0/embed").with_param("url", json!(url));
            assert_eq!(controller.get_item(&req, &mut env).unwrap_err().code, "oembed_invalid_url");
        }
    }

    #[test]
    fn proxy_requires_edit_posts() {
        let (controller, registry, _) = controller(Arc::new(NoProvider));
        let mut store = MemoryStore::default();
        let env = Env::new(&mut store, &Anonymous);
        let req = Request::new(Method::Get, "/oembed/1.0/proxy");
        let err = controller.custom_permissions_check("proxy", &req, &env).unwrap_err();
        assert_eq!(err.code, "rest_forbidden");
        assert_eq!(err.status, 401);

        let subscriber = RoleAuthorizer::new(
            Some(User {
                id: 4,
                login: "sub".into(),
                display_name: "Sub".into(),
                slug: "sub".into(),
                email: "sub@example.org".into(),
                url: String::new(),
                roles: vec![Role::Subscriber],
            }),
            registry,
        );
        let env = Env::new(&mut store, &subscriber);
        assert_eq!(
            controller.custom_permissions_check("proxy", &req, &env).unwrap_err().status,
            403
        );
    }

    #[test]
    fn proxy_caches_by_full_argument_set() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider = move |url: &str, args: &Map<String, Value>| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(!args.contains_key("url"));
            Some(json!({"type": "video", "url": url, "width": args["maxwidth"]}))
        };
        let (controller, _, cache) = controller(Arc::new(provider));
        let mut store = MemoryStore::default();
        let mut env = Env::new(&mut store, &Anonymous);

        let req = |width: u64| {
            Request::new(Method::Get, "/oembed/1.0/proxy")
                .with_param("url", json!("https://video.example/watch?v=1"))
                .with_param("maxwidth", json!(width))
        };
        let first = controller.custom("proxy", &req(500), &mut env).unwrap();
        let again = controller.custom("proxy", &req(500), &mut env).unwrap();
        assert_eq!(first.data(), again.data());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        controller.custom("proxy", &req(300), &mut env).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn proxy_miss_is_404_and_not_cached() {
        let (controller, _, cache) = controller(Arc::new(NoProvider));
        let mut store = MemoryStore::default();
        let mut env = Env::new(&mut store, &Anonymous);
        let req = Request::new(Method::Get, "/oembed/1.0/proxy")
            .with_param("url", json!("https://nothing.example/"));
        let err = controller.custom("proxy", &req, &mut env).unwrap_err();
        assert_eq!(err.code, "oembed_invalid_url");
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_key_ignores_order_and_internal_flags() {
        let mut a = Map::new();
        a.insert("url".into(), json!("https://x.example"));
        a.insert("maxwidth".into(), json!(600));
        let mut b = Map::new();
        b.insert("maxwidth".into(), json!(600));
        b.insert("_envelope".into(), json!(true));
        b.insert("url".into(), json!("https://x.example"));
        assert_eq!(proxy_cache_key(&a), proxy_cache_key(&b));
        assert!(proxy_cache_key(&a).starts_with("oembed_"));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = MemoryTransientCache::new();
        cache.set("k", json!(1), Duration::ZERO);
        assert!(cache.get("k").is_none());
        cache.set("k", json!(2), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!(2)));
    }

    #[test]
    fn writes_prune_lapsed_keys() {
        let cache = MemoryTransientCache::new();
        cache.set("stale", json!(1), Duration::ZERO);
        cache.set("fresh", json!(2), Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(json!(2)));
    }

    #[test]
    fn unbounded_ttl_never_lapses() {
        let cache = MemoryTransientCache::new();
        cache.set("k", json!(1), Duration::from_secs(u64::MAX));
        assert_eq!(cache.get("k"), Some(json!(1)));
    }
}

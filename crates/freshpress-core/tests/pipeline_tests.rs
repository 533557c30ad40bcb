//! # Pipeline Tests
//!
//! End-to-end calls through `RestServer::dispatch` against `MemoryStore`:
//! route match, argument processing, permission checks, handlers and the
//! response envelope.

use freshpress_core::controller::{Controller, Endpoint, Operation, Route};
use freshpress_core::model::{CommentApproval, PreparedComment, PreparedPost};
use freshpress_core::registry::{MetaKey, MetaObjectType};
use freshpress_core::schema::JsonType;
use freshpress_core::store::{CommentStore, PostStore};
use freshpress_core::{
    Anonymous, MemoryStore, MemoryTransientCache, Method, Methods, NoProvider, Registry, Request,
    RestResult, RestServer, Role, RoleAuthorizer, SiteOptions, User,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;

// =============================================================================
// FIXTURES
// =============================================================================

struct Site {
    server: RestServer,
    registry: Arc<Registry>,
    store: MemoryStore,
}

fn user(id: u64, role: Role) -> User {
    User {
        id,
        login: format!("user{id}"),
        display_name: format!("User {id}"),
        slug: format!("user{id}"),
        email: format!("user{id}@example.org"),
        url: String::new(),
        roles: vec![role],
    }
}

fn site_with(registry: Registry) -> Site {
    let registry = Arc::new(registry);
    let server = RestServer::with_defaults(
        Arc::clone(&registry),
        Arc::new(MemoryTransientCache::new()),
        Arc::new(NoProvider),
    )
    .expect("routes compile");
    let mut store = MemoryStore::default();
    store.insert_user(user(1, Role::Administrator));
    store.insert_user(user(2, Role::Contributor));
    Site {
        server,
        registry,
        store,
    }
}

fn site() -> Site {
    site_with(Registry::with_defaults(SiteOptions::default()))
}

impl Site {
    fn as_role(&self, id: u64, role: Role) -> RoleAuthorizer {
        RoleAuthorizer::new(Some(user(id, role)), Arc::clone(&self.registry))
    }

    fn admin(&self) -> RoleAuthorizer {
        self.as_role(1, Role::Administrator)
    }

    fn call(&mut self, req: Request, auth: &RoleAuthorizer) -> freshpress_core::Response {
        self.server.dispatch(req, &mut self.store, auth)
    }

    fn call_anonymous(&mut self, req: Request) -> freshpress_core::Response {
        self.server.dispatch(req, &mut self.store, &Anonymous)
    }

    fn publish(&mut self, title: &str) -> u64 {
        self.store
            .insert_post(&PreparedPost {
                title: Some(title.into()),
                content: Some(format!("{title} body")),
                status: Some("publish".into()),
                author: Some(1),
                post_type: Some("post".into()),
                ..PreparedPost::default()
            })
            .expect("insert post")
    }
}

fn body(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn header_u64(response: &freshpress_core::Response, name: &str) -> u64 {
    response
        .get_header(name)
        .and_then(|v| v.parse().ok())
        .expect("numeric header")
}

// =============================================================================
// POSTS
// =============================================================================

mod posts {
    use super::*;

    #[test]
    fn draft_without_title_or_content_is_created() {
        let mut site = site();
        let admin = site.admin();
        let response = site.call(
            Request::new(Method::Post, "/wp/v2/posts").with_body(body(json!({"status": "draft"}))),
            &admin,
        );
        assert_eq!(response.status(), 201);
        assert_eq!(response.data()["status"], json!("draft"));
        assert_eq!(response.data()["title"]["raw"], json!(""));
        assert!(response.get_header("Location").is_some());
    }

    #[test]
    fn private_post_needs_publish_capability() {
        let mut site = site();
        let contributor = site.as_role(2, Role::Contributor);
        let response = site.call(
            Request::new(Method::Post, "/wp/v2/posts")
                .with_body(body(json!({"title": "Secret", "status": "private"}))),
            &contributor,
        );
        assert_eq!(response.status(), 403);
        assert_eq!(response.data()["code"], json!("rest_cannot_publish"));
        assert_eq!(site.store.stats().posts, 0);
    }

    #[test]
    fn created_fields_read_back_and_readonly_input_is_ignored() {
        let mut site = site();
        let admin = site.admin();
        let created = site.call(
            Request::new(Method::Post, "/wp/v2/posts").with_body(body(json!({
                "title": "Round trip",
                "content": "<p>Body</p>",
                "excerpt": "Short",
                "slug": "Round Trip!",
                "status": "publish",
                "comment_status": "closed",
                "link": "https://elsewhere.example/",
                "modified": "2001-01-01T00:00:00",
            }))),
            &admin,
        );
        assert_eq!(created.status(), 201);
        let id = created.data()["id"].as_u64().expect("id");

        let read = site.call(
            Request::new(Method::Get, format!("/wp/v2/posts/{id}")).with_param("context", json!("edit")),
            &admin,
        );
        let data = read.data();
        assert_eq!(data["title"]["raw"], json!("Round trip"));
        assert_eq!(data["content"]["raw"], json!("<p>Body</p>"));
        assert_eq!(data["excerpt"]["raw"], json!("Short"));
        assert_eq!(data["slug"], json!("round-trip"));
        assert_eq!(data["status"], json!("publish"));
        assert_eq!(data["comment_status"], json!("closed"));
        assert_ne!(data["link"], json!("https://elsewhere.example/"));
        assert_ne!(data["modified"], json!("2001-01-01T00:00:00"));
    }

    #[test]
    fn view_context_hides_raw_fields() {
        let mut site = site();
        let id = site.publish("Visible");
        let read = site.call_anonymous(Request::new(Method::Get, format!("/wp/v2/posts/{id}")));
        assert_eq!(read.status(), 200);
        assert!(read.data()["content"].get("raw").is_none());
        assert!(read.data()["content"]["rendered"].is_string());
        assert!(read.data().get("password").is_none());
    }

    #[test]
    fn trash_then_gone_then_force_delete() {
        let mut site = site();
        let admin = site.admin();
        let id = site.publish("Doomed");
        let route = format!("/wp/v2/posts/{id}");

        let trashed = site.call(Request::new(Method::Delete, route.clone()), &admin);
        assert_eq!(trashed.status(), 200);
        assert_eq!(trashed.data()["status"], json!("trash"));

        let read = site.call(Request::new(Method::Get, route.clone()), &admin);
        assert_eq!(read.status(), 200);
        assert_eq!(read.data()["status"], json!("trash"));

        let again = site.call(Request::new(Method::Delete, route.clone()), &admin);
        assert_eq!(again.status(), 410);
        assert_eq!(again.data()["code"], json!("rest_already_trashed"));

        let forced = site.call(
            Request::new(Method::Delete, route.clone()).with_param("force", json!(true)),
            &admin,
        );
        assert_eq!(forced.status(), 200);
        assert_eq!(forced.data()["deleted"], json!(true));
        assert_eq!(forced.data()["previous"]["id"], json!(id));

        let read = site.call(Request::new(Method::Get, route), &admin);
        assert_eq!(read.status(), 404);
    }

    #[test]
    fn pagination_headers_and_out_of_range_page() {
        let mut site = site();
        for n in 0..7 {
            site.publish(&format!("Post {n}"));
        }
        let page = site.call_anonymous(
            Request::new(Method::Get, "/wp/v2/posts")
                .with_param("per_page", json!(3))
                .with_param("page", json!(2)),
        );
        assert_eq!(page.status(), 200);
        assert_eq!(header_u64(&page, "X-WP-Total"), 7);
        assert_eq!(header_u64(&page, "X-WP-TotalPages"), 3);
        assert_eq!(page.data().as_array().map(Vec::len), Some(3));
        let links: Vec<&str> = page
            .headers()
            .iter()
            .filter(|(k, _)| k == "Link")
            .map(|(_, v)| v.as_str())
            .collect();
        assert!(links.iter().any(|l| l.ends_with("rel=\"prev\"")));
        assert!(links.iter().any(|l| l.ends_with("rel=\"next\"")));

        let beyond = site.call_anonymous(
            Request::new(Method::Get, "/wp/v2/posts")
                .with_param("per_page", json!(3))
                .with_param("page", json!(4)),
        );
        assert_eq!(beyond.status(), 400);
        assert_eq!(beyond.data()["code"], json!("rest_post_invalid_page_number"));
    }

    #[test]
    fn huge_page_number_is_out_of_range() {
        let mut site = site();
        site.publish("Only");
        let response = site.call_anonymous(
            Request::new(Method::Get, "/wp/v2/posts").with_param("page", json!(i64::MAX)),
        );
        assert_eq!(response.status(), 400);
        assert_eq!(response.data()["code"], json!("rest_post_invalid_page_number"));
    }

    #[test]
    fn scalar_include_reads_as_a_single_id() {
        let mut site = site();
        let wanted = site.publish("Wanted");
        site.publish("Other");
        let response = site.call_anonymous(
            Request::new(Method::Get, "/wp/v2/posts").with_param("include", json!(wanted)),
        );
        assert_eq!(response.status(), 200);
        assert_eq!(response.data().as_array().map(Vec::len), Some(1));
        assert_eq!(response.data()[0]["id"], json!(wanted));
    }

    #[test]
    fn listing_filters_by_date_bounds_author_and_sticky() {
        let mut site = site();
        let sticky = site.publish("Sticky");
        let plain = site.publish("Plain");
        site.store.stick_post(sticky);

        let listed = |site: &mut Site, req: Request| -> Vec<Value> {
            let response = site.call_anonymous(req);
            assert_eq!(response.status(), 200);
            response.data().as_array().cloned().unwrap_or_default()
        };

        let ids = listed(&mut site, Request::new(Method::Get, "/wp/v2/posts").with_param("sticky", json!(false)));
        assert_eq!(ids.iter().map(|p| p["id"].clone()).collect::<Vec<_>>(), vec![json!(plain)]);

        let old = listed(
            &mut site,
            Request::new(Method::Get, "/wp/v2/posts").with_param("before", json!("2000-01-01T00:00:00")),
        );
        assert!(old.is_empty());
        let recent = listed(
            &mut site,
            Request::new(Method::Get, "/wp/v2/posts").with_param("after", json!("2000-01-01T00:00:00")),
        );
        assert_eq!(recent.len(), 2);

        let others = listed(&mut site, Request::new(Method::Get, "/wp/v2/posts").with_param("author", json!([2])));
        assert!(others.is_empty());
        let unknown = listed(&mut site, Request::new(Method::Get, "/wp/v2/posts").with_param("bogus", json!("x")));
        assert_eq!(unknown.len(), 2);
    }

    #[test]
    fn sticky_filter_with_disjoint_include_is_empty() {
        let mut site = site();
        let sticky = site.publish("Sticky");
        let plain = site.publish("Plain");
        site.store.stick_post(sticky);

        let response = site.call_anonymous(
            Request::new(Method::Get, "/wp/v2/posts")
                .with_param("sticky", json!(true))
                .with_param("include", json!([plain])),
        );
        assert_eq!(response.status(), 200);
        assert_eq!(response.data(), &json!([]));
        assert_eq!(header_u64(&response, "X-WP-Total"), 0);

        let response =
            site.call_anonymous(Request::new(Method::Get, "/wp/v2/posts").with_param("sticky", json!(true)));
        assert_eq!(response.data()[0]["id"], json!(sticky));
        assert_eq!(response.data().as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn invalid_meta_blocks_the_whole_write() {
        let mut registry = Registry::with_defaults(SiteOptions::default());
        registry.register_meta(MetaKey::new(MetaObjectType::Post, "rating", JsonType::Integer));
        let mut site = site_with(registry);
        let admin = site.admin();
        let response = site.call(
            Request::new(Method::Post, "/wp/v2/posts").with_body(body(json!({
                "title": "Rated",
                "meta": {"rating": "five"},
            }))),
            &admin,
        );
        assert_eq!(response.status(), 400);
        assert_eq!(response.data()["code"], json!("rest_invalid_param"));
        assert_eq!(site.store.stats().posts, 0);
    }

    #[test]
    fn update_records_a_revision() {
        let mut site = site();
        let admin = site.admin();
        let id = site.publish("First");
        let updated = site.call(
            Request::new(Method::Put, format!("/wp/v2/posts/{id}"))
                .with_body(body(json!({"content": "Second draft"}))),
            &admin,
        );
        assert_eq!(updated.status(), 200);

        let revisions = site.call(
            Request::new(Method::Get, format!("/wp/v2/posts/{id}/revisions")),
            &admin,
        );
        assert_eq!(revisions.status(), 200);
        let list = revisions.data().as_array().expect("list");
        assert!(!list.is_empty());
        assert_eq!(list[0]["parent"], json!(id));

        let anonymous = site.call_anonymous(Request::new(Method::Get, format!("/wp/v2/posts/{id}/revisions")));
        assert_eq!(anonymous.status(), 401);
    }
}

// =============================================================================
// COMMENTS
// =============================================================================

mod comments {
    use super::*;

    fn comment(site: &mut Site, post: u64, content: &str, approved: CommentApproval) -> u64 {
        site.store
            .insert_comment(&PreparedComment {
                post_id: Some(post),
                author_name: Some("Reader".into()),
                author_email: Some("reader@example.org".into()),
                content: Some(content.into()),
                approved: Some(approved),
                ..PreparedComment::default()
            })
            .expect("insert comment")
    }

    #[test]
    fn anonymous_listing_by_post_returns_only_approved() {
        let mut site = site();
        let mut target = 0;
        for n in 0..5 {
            target = site.publish(&format!("Post {n}"));
        }
        let other = site.publish("Other");
        comment(&mut site, target, "one", CommentApproval::Approved);
        comment(&mut site, target, "two", CommentApproval::Approved);
        comment(&mut site, target, "held", CommentApproval::Hold);
        comment(&mut site, other, "elsewhere", CommentApproval::Approved);

        let response = site.call_anonymous(
            Request::new(Method::Get, "/wp/v2/comments")
                .with_param("post", json!(target))
                .with_param("status", json!("approve")),
        );
        assert_eq!(response.status(), 200);
        let items = response.data().as_array().expect("list");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|c| c["post"] == json!(target)));
        assert!(items.iter().all(|c| c["status"] == json!("approved")));
        assert_eq!(header_u64(&response, "X-WP-Total"), 2);
    }

    #[test]
    fn repeated_status_update_is_a_no_op_success() {
        let mut site = site();
        let admin = site.admin();
        let post = site.publish("Discussed");
        let id = comment(&mut site, post, "moderate me", CommentApproval::Approved);
        let route = format!("/wp/v2/comments/{id}");

        for _ in 0..2 {
            let response = site.call(
                Request::new(Method::Put, route.clone()).with_body(body(json!({"status": "hold"}))),
                &admin,
            );
            assert_eq!(response.status(), 200);
            assert_eq!(response.data()["status"], json!("hold"));
        }
        assert_eq!(
            site.store.get_comment(id).map(|c| c.approved),
            Some(CommentApproval::Hold)
        );
    }

    #[test]
    fn anonymous_create_is_refused_by_default() {
        let mut site = site();
        let post = site.publish("Closed to strangers");
        let response = site.call_anonymous(
            Request::new(Method::Post, "/wp/v2/comments").with_body(body(json!({
                "post": post,
                "content": "Hi",
                "author_name": "Stranger",
                "author_email": "stranger@example.org",
            }))),
        );
        assert_eq!(response.status(), 401);
        assert_eq!(response.data()["code"], json!("rest_comment_login_required"));
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

mod dispatch {
    use super::*;

    /// Declares a create endpoint without implementing it.
    struct ReadOnly(Arc<Registry>);

    impl Controller for ReadOnly {
        fn routes(&self) -> RestResult<Vec<Route>> {
            Ok(vec![Route::new(
                "/wp/v2/widgets",
                vec![
                    Endpoint::new(Methods::READABLE, Operation::GetItems, Default::default()),
                    Endpoint::new(Methods::CREATABLE, Operation::CreateItem, Default::default()),
                ],
            )?])
        }

        fn registry(&self) -> &Registry {
            &self.0
        }
    }

    #[test]
    fn unimplemented_operation_is_405() {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let mut server = RestServer::new(Arc::clone(&registry));
        server.register(Arc::new(ReadOnly(registry))).expect("register");
        let mut store = MemoryStore::default();
        let response = server.dispatch(Request::new(Method::Post, "/wp/v2/widgets"), &mut store, &Anonymous);
        assert_eq!(response.status(), 405);
        assert_eq!(response.data()["code"], json!("invalid-method"));
    }

    #[test]
    fn options_schema_never_carries_arg_options() {
        let mut site = site();
        let response = site.call_anonymous(Request::new(Method::Options, "/wp/v2/comments"));
        assert_eq!(response.status(), 200);
        let text = response.data().to_string();
        assert!(!text.contains("arg_options"));
        assert_eq!(response.data()["schema"]["title"], json!("comment"));
    }

    #[test]
    fn embed_endpoint_resolves_own_permalinks() {
        let mut site = site();
        let id = site.publish("Embeddable");
        let response = site.call_anonymous(
            Request::new(Method::Get, "/oembed/1.0/embed")
                .with_param("url", json!(format!("http://localhost:8080/?p={id}"))),
        );
        assert_eq!(response.status(), 200);
        assert_eq!(response.data()["type"], json!("rich"));
        assert_eq!(response.data()["title"], json!("Embeddable"));

        let missing = site.call_anonymous(
            Request::new(Method::Get, "/oembed/1.0/embed").with_param("url", json!("http://other.example/?p=1")),
        );
        assert_eq!(missing.status(), 404);
    }

    #[test]
    fn proxy_requires_edit_posts() {
        let mut site = site();
        let subscriber = site.as_role(9, Role::Subscriber);
        let response = site.call(
            Request::new(Method::Get, "/oembed/1.0/proxy").with_param("url", json!("https://video.example/1")),
            &subscriber,
        );
        assert_eq!(response.status(), 403);
    }
}

//! # Revisions Controller
//!
//! Read and delete access to the stored revisions of one post type, nested
//! under the parent's route: `/wp/v2/{parent_base}/{parent}/revisions`.
//! Revisions cannot be trashed; deletion requires `force=true`.

use super::posts::PostsController;
use super::{
    Controller, Endpoint, Env, ItemLifecycle, NAMESPACE, Operation, Route,
    add_additional_fields_schema, add_additional_fields_to_object, collection_response, denied,
    force_arg, id_arg, with_arg,
};
use crate::auth::Cap;
use crate::dates::format_date;
use crate::model::Post;
use crate::registry::Registry;
use crate::request::Request;
use crate::response::{Link, Response};
use crate::schema::{Args, Format, Property, Schema, SchemaBuilder};
use crate::store::{PostStore, Store};
use crate::types::{Context, Methods, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RevisionsController {
    parent_post_type: String,
    parent_base: String,
    parent: PostsController,
    registry: Arc<Registry>,
}

impl RevisionsController {
    #[must_use]
    pub fn new(parent_post_type: &str, registry: Arc<Registry>) -> Self {
        let parent = PostsController::new(parent_post_type, Arc::clone(&registry));
        Self {
            parent_post_type: parent_post_type.to_string(),
            parent_base: parent.rest_base().to_string(),
            parent,
            registry,
        }
    }

    fn get_parent(&self, req: &Request, store: &dyn Store) -> RestResult<Post> {
        req.param_i64("parent")
            .filter(|id| *id > 0)
            .and_then(|id| u64::try_from(id).ok())
            .and_then(|id| store.get_post(id))
            .filter(|p| p.post_type == self.parent_post_type)
            .ok_or_else(|| RestError::new("rest_post_invalid_parent", "Invalid post parent ID.", 404))
    }

    fn get_revision(&self, req: &Request, store: &dyn Store) -> RestResult<Post> {
        req.param_i64("id")
            .filter(|id| *id > 0)
            .and_then(|id| u64::try_from(id).ok())
            .and_then(|id| store.get_post(id))
            .filter(|p| p.post_type == "revision")
            .ok_or_else(|| RestError::new("rest_post_invalid_id", "Invalid revision ID.", 404))
    }

    fn parent_property(&self, name: &str) -> Option<Property> {
        self.parent
            .item_schema()
            .and_then(|schema| schema.property(name).cloned())
    }
}

impl Controller for RevisionsController {
    fn routes(&self) -> RestResult<Vec<Route>> {
        let base = format!("/{NAMESPACE}/{}/(?P<parent>[\\d]+)/revisions", self.parent_base);
        let parent = id_arg("The ID for the parent of the object.");
        let id = id_arg("Unique identifier for the object.");

        let mut get_args = Args::new();
        get_args.insert("context".into(), self.context_param(Some(Context::View)));
        let mut delete_args = Args::new();
        delete_args.insert(
            "force".into(),
            force_arg("Required to be true, as revisions do not support trashing."),
        );
        let item = |args: Args| with_arg(with_arg(args, "parent", &parent), "id", &id);

        Ok(vec![
            Route::new(
                base.clone(),
                vec![Endpoint::new(
                    Methods::READABLE,
                    Operation::GetItems,
                    with_arg(self.collection_params(), "parent", &parent),
                )],
            )?,
            Route::new(
                format!("{base}/(?P<id>[\\d]+)"),
                vec![
                    Endpoint::new(Methods::READABLE, Operation::GetItem, item(get_args)),
                    Endpoint::new(Methods::DELETABLE, Operation::DeleteItem, item(delete_args)),
                ],
            )?,
        ])
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn item_schema(&self) -> Option<Schema> {
        use Context::{Edit, Embed, View};
        let builder = SchemaBuilder::new(format!("{}-revision", self.parent_post_type))
            .property(
                "author",
                Property::integer()
                    .describe("The ID for the author of the object.")
                    .context(&[View, Edit, Embed]),
            )
            .property(
                "date",
                Property::string()
                    .describe("The date the object was published, in the site's timezone.")
                    .format(Format::DateTime)
                    .context(&[View, Edit, Embed]),
            )
            .property(
                "date_gmt",
                Property::string()
                    .describe("The date the object was published, as GMT.")
                    .format(Format::DateTime)
                    .context(&[View, Edit]),
            )
            .property(
                "guid",
                self.parent_property("guid").unwrap_or_else(|| {
                    Property::string()
                        .describe("GUID for the object, as it exists in the database.")
                        .context(&[View, Edit])
                }),
            )
            .property(
                "id",
                Property::integer()
                    .describe("Unique identifier for the object.")
                    .context(&[View, Edit, Embed]),
            )
            .property(
                "modified",
                Property::string()
                    .describe("The date the object was last modified, in the site's timezone.")
                    .format(Format::DateTime)
                    .context(&[View, Edit]),
            )
            .property(
                "modified_gmt",
                Property::string()
                    .describe("The date the object was last modified, as GMT.")
                    .format(Format::DateTime)
                    .context(&[View, Edit]),
            )
            .property(
                "parent",
                Property::integer()
                    .describe("The ID for the parent of the object.")
                    .context(&[View, Edit, Embed]),
            )
            .property(
                "slug",
                Property::string()
                    .describe("An alphanumeric identifier for the object unique to its type.")
                    .context(&[View, Edit, Embed]),
            )
            .extend(
                ["title", "content", "excerpt"]
                    .into_iter()
                    .filter_map(|name| self.parent_property(name).map(|p| (name, p))),
            );
        let title = format!("{}-revision", self.parent_post_type);
        Some(add_additional_fields_schema(&self.registry, &title, builder).build())
    }

    fn collection_params(&self) -> Args {
        let mut params = Args::new();
        params.insert("context".into(), self.context_param(Some(Context::View)));
        params
    }

    fn get_items_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let parent = self.get_parent(req, env.store())?;
        if !env.auth.user_can(Cap::EditPost(&parent)) {
            return Err(denied(
                "rest_cannot_read",
                "Sorry, you are not allowed to view revisions of this post.",
                env,
            ));
        }
        Ok(())
    }

    fn get_items(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let parent = self.get_parent(req, env.store())?;
        let env: &Env<'_> = env;
        let items = env
            .store()
            .revisions(parent.id)
            .iter()
            .map(|revision| self.prepare_item_for_response(revision, req, env))
            .collect::<RestResult<Vec<_>>>()?;
        Ok(collection_response(items))
    }

    fn get_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        self.get_items_permissions_check(req, env)
    }

    fn get_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        self.get_parent(req, env.store())?;
        let revision = self.get_revision(req, env.store())?;
        self.prepare_item_for_response(&revision, req, env)
    }

    fn delete_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        self.get_parent(req, env.store())?;
        let revision = self.get_revision(req, env.store())?;
        self.get_items_permissions_check(req, env)?;
        if env.auth.user_can(Cap::DeletePost(&revision)) {
            Ok(())
        } else {
            Err(RestError::forbidden(env.auth.required_code()))
        }
    }

    fn delete_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let revision = self.get_revision(req, env.store())?;
        if !req.param_bool("force") {
            return Err(RestError::new(
                "rest_trash_not_supported",
                "Revisions do not support trashing. Set force=true to delete.",
                501,
            ));
        }
        let previous = self.prepare_item_for_response(&revision, req, env)?;
        env.store.delete_post(revision.id).map_err(|e| {
            tracing::warn!(event = "store_failure", revision = revision.id, "{e}");
            RestError::new("rest_cannot_delete", "The post cannot be deleted.", 500)
        })?;
        Ok(Response::new(json!({
            "deleted": true,
            "previous": previous.data().clone(),
        })))
    }
}

impl ItemLifecycle for RevisionsController {
    type Item = Post;
    type Prepared = ();

    fn prepare_item_for_response(&self, revision: &Post, req: &Request, env: &Env<'_>) -> RestResult<Response> {
        let Some(schema) = self.item_schema() else {
            return Ok(Response::new(json!({})));
        };
        let has = |name: &str| schema.has(name);
        let mut data = Map::new();

        if has("author") {
            data.insert("author".into(), json!(revision.author));
        }
        if has("date") {
            data.insert(
                "date".into(),
                revision
                    .date_gmt
                    .map_or(Value::Null, |_| json!(format_date(revision.date))),
            );
        }
        if has("date_gmt") {
            data.insert(
                "date_gmt".into(),
                revision.date_gmt.map_or(Value::Null, |gmt| json!(format_date(gmt))),
            );
        }
        if has("id") {
            data.insert("id".into(), json!(revision.id));
        }
        if has("modified") {
            data.insert("modified".into(), json!(format_date(revision.modified)));
        }
        if has("modified_gmt") {
            data.insert("modified_gmt".into(), json!(format_date(revision.modified_gmt)));
        }
        if has("parent") {
            data.insert("parent".into(), json!(revision.parent));
        }
        if has("slug") {
            data.insert("slug".into(), json!(revision.slug));
        }
        if has("guid") {
            data.insert(
                "guid".into(),
                json!({"rendered": revision.guid, "raw": revision.guid}),
            );
        }
        if has("title") {
            data.insert(
                "title".into(),
                json!({"raw": revision.title, "rendered": self.parent.rendered_title(revision)}),
            );
        }
        if has("content") {
            data.insert(
                "content".into(),
                json!({"raw": revision.content, "rendered": self.registry.render(&revision.content)}),
            );
        }
        if has("excerpt") {
            data.insert(
                "excerpt".into(),
                json!({"raw": revision.excerpt, "rendered": self.parent.rendered_excerpt(revision)}),
            );
        }

        add_additional_fields_to_object(&self.registry, &schema.title, &mut data, env.store());
        let data = schema.filter_by_context(data, req.context());

        let mut response = Response::new(Value::Object(data));
        if revision.parent != 0 {
            response.add_link(
                "parent",
                Link::new(self.registry.rest_url(&format!(
                    "{NAMESPACE}/{}/{}",
                    self.parent_base, revision.parent
                ))),
            );
        }
        Ok(response)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::RoleAuthorizer;
    use crate::model::{PreparedPost, Role, User};
    use crate::registry::SiteOptions;
    use crate::store::MemoryStore;
    use crate::types::Method;
    use chrono::NaiveDateTime;

    fn user(id: u64, role: Role) -> User {
        User {
            id,
            login: format!("u{id}"),
            display_name: format!("U{id}"),
            slug: format!("u{id}"),
            email: format!("u{id}@example.org"),
            url: String::new(),
            roles: vec![role],
        }
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    /// Published post by user 1 with one revision; returns (post, revision).
    fn seeded(store: &mut MemoryStore) -> (u64, u64) {
        let post = store
            .insert_post(&PreparedPost {
                title: Some("First".into()),
                content: Some("Body".into()),
                status: Some("publish".into()),
                author: Some(1),
                ..PreparedPost::default()
            })
            .unwrap();
        let when = (at("2021-05-01T10:00:00"), at("2021-05-01T10:00:00"));
        let revision = store.save_revision(post, 1, when).unwrap().unwrap();
        (post, revision)
    }

    fn request(method: Method, parent: u64, id: Option<u64>) -> Request {
        let mut req = Request::new(method, "/wp/v2/posts/1/revisions");
        req.set_param("parent", json!(parent));
        if let Some(id) = id {
            req.set_param("id", json!(id));
        }
        req
    }

    #[test]
    fn lists_revisions_with_parent_link() {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let controller = RevisionsController::new("post", Arc::clone(&registry));
        let mut store = MemoryStore::default();
        let (post, revision) = seeded(&mut store);
        let admin = RoleAuthorizer::new(Some(user(1, Role::Administrator)), registry);
        let mut env = Env::new(&mut store, &admin);

        let req = request(Method::Get, post, None);
        controller.get_items_permissions_check(&req, &env).unwrap();
        let response = controller.get_items(&req, &mut env).unwrap();
        let items = response.data().as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], json!(revision));
        assert_eq!(items[0]["title"]["rendered"], json!("First"));
        assert!(items[0]["title"].get("raw").is_none());
        assert!(
            items[0]["_links"]["parent"][0]["href"]
                .as_str()
                .unwrap()
                .ends_with(&format!("/wp/v2/posts/{post}"))
        );
    }

    #[test]
    fn parent_must_match_post_type() {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let controller = RevisionsController::new("page", Arc::clone(&registry));
        let mut store = MemoryStore::default();
        let (post, _) = seeded(&mut store);
        let admin = RoleAuthorizer::new(Some(user(1, Role::Administrator)), registry);
        let env = Env::new(&mut store, &admin);
        let err = controller
            .get_items_permissions_check(&request(Method::Get, post, None), &env)
            .unwrap_err();
        assert_eq!(err.code, "rest_post_invalid_parent");
        assert_eq!(err.status, 404);
    }

    #[test]
    fn reading_needs_edit_on_parent() {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let controller = RevisionsController::new("post", Arc::clone(&registry));
        let mut store = MemoryStore::default();
        let (post, _) = seeded(&mut store);
        let contributor = RoleAuthorizer::new(Some(user(7, Role::Contributor)), registry);
        let env = Env::new(&mut store, &contributor);
        let err = controller
            .get_items_permissions_check(&request(Method::Get, post, None), &env)
            .unwrap_err();
        assert_eq!(err.code, "rest_cannot_read");
        assert_eq!(err.status, 403);
    }

    #[test]
    fn delete_requires_force() {
        let registry = Arc::new(Registry::with_defaults(SiteOptions::default()));
        let controller = RevisionsController::new("post", Arc::clone(&registry));
        let mut store = MemoryStore::default();
        let (post, revision) = seeded(&mut store);
        let admin = RoleAuthorizer::new(Some(user(1, Role::Administrator)), registry);
        let mut env = Env::new(&mut store, &admin);

        let req = request(Method::Delete, post, Some(revision));
        controller.delete_item_permissions_check(&req, &env).unwrap();
        assert_eq!(controller.delete_item(&req, &mut env).unwrap_err().status, 501);

        let mut forced = req.clone();
        forced.set_param("force", json!(true));
        let response = controller.delete_item(&forced, &mut env).unwrap();
        assert_eq!(response.data()["deleted"], json!(true));
        assert_eq!(response.data()["previous"]["id"], json!(revision));
        assert!(env.store().revisions(post).is_empty());

        let err = controller.get_item(&forced, &mut env).unwrap_err();
        assert_eq!(err.code, "rest_post_invalid_id");
    }
}

//! # Posts Controller
//!
//! One instance per REST-visible post type, mounted at
//! `/wp/v2/{rest_base}` and `/wp/v2/{rest_base}/{id}`.
//!
//! ## Write order
//!
//! `prepare_item_for_database` runs every check that does not need the
//! stored row. Meta, terms and featured media are validated next. Only then
//! does the post reach the store, followed by sticky, format, featured
//! media, template, terms, meta and additional fields.

use super::meta::MetaFields;
use super::{
    Controller, Endpoint, Env, ItemLifecycle, NAMESPACE, Operation, Route, add_additional_fields_schema,
    add_additional_fields_to_object, add_pagination_headers, base_collection_params,
    collection_response, denied, force_arg, id_arg, store_failure, update_additional_fields_for_object,
    with_arg,
};
use crate::auth::Cap;
use crate::dates::{self, format_date};
use crate::model::{Post, PreparedPost};
use crate::registry::{MetaObjectType, POST_FORMATS, PostTypeCaps, PostTypeObject, Registry};
use crate::request::Request;
use crate::response::{API_REL_BASE, Link, Response};
use crate::schema::{
    Arg, ArgOptions, Args, Format, Property, Sanitize, Schema, SchemaBuilder, Validate,
};
use crate::store::{MetaStore, PostStore, QueryArgs, Store, TermStore, UserStore};
use crate::text::{parse_id_list, sanitize_title, trim_words, value_as_bool, value_as_u64};
use crate::types::{Context, Methods, RestError, RestResult};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Meta key holding the featured media id.
pub const THUMBNAIL_META: &str = "_thumbnail_id";

/// Meta key holding the page template file.
pub const TEMPLATE_META: &str = "_wp_page_template";

const EXCERPT_LENGTH: usize = 55;
const EXCERPT_MORE: &str = " [&hellip;]";

/// Public parameter => storage query argument.
const PARAMETER_MAPPINGS: [(&str, &str); 14] = [
    ("author", "author__in"),
    ("author_exclude", "author__not_in"),
    ("exclude", "post__not_in"),
    ("include", "post__in"),
    ("menu_order", "menu_order"),
    ("offset", "offset"),
    ("order", "order"),
    ("orderby", "orderby"),
    ("page", "paged"),
    ("parent", "post_parent__in"),
    ("parent_exclude", "post_parent__not_in"),
    ("search", "s"),
    ("slug", "post_name__in"),
    ("status", "post_status"),
];

const POST_FEATURES: &[&str] = &[
    "title",
    "editor",
    "author",
    "excerpt",
    "thumbnail",
    "comments",
    "revisions",
    "post-formats",
    "custom-fields",
];

const PAGE_FEATURES: &[&str] = &[
    "title",
    "editor",
    "author",
    "excerpt",
    "thumbnail",
    "comments",
    "revisions",
    "page-attributes",
    "custom-fields",
];

const ATTACHMENT_FEATURES: &[&str] = &["title", "author", "comments", "revisions", "custom-fields"];

/// Controller for one post type.
#[derive(Debug, Clone)]
pub struct PostsController {
    post_type: String,
    rest_base: String,
    registry: Arc<Registry>,
    meta: MetaFields,
}

impl PostsController {
    #[must_use]
    pub fn new(post_type: &str, registry: Arc<Registry>) -> Self {
        let rest_base = registry
            .post_type(post_type)
            .map_or_else(|| post_type.to_string(), |t| t.rest_base.clone());
        Self {
            post_type: post_type.to_string(),
            rest_base,
            meta: MetaFields::for_post(Arc::clone(&registry), post_type),
            registry,
        }
    }

    #[must_use]
    pub fn post_type(&self) -> &str {
        &self.post_type
    }

    #[must_use]
    pub fn rest_base(&self) -> &str {
        &self.rest_base
    }

    fn type_object(&self) -> Option<&PostTypeObject> {
        self.registry.post_type(&self.post_type)
    }

    fn caps(&self) -> PostTypeCaps {
        self.type_object().map_or_else(
            || PostTypeCaps::for_capability_type("post"),
            |t| t.caps.clone(),
        )
    }

    fn hierarchical(&self) -> bool {
        self.type_object().is_some_and(|t| t.hierarchical)
    }

    /// Built-in types have a fixed field set; others follow their features.
    fn schema_supports(&self, feature: &str) -> bool {
        match self.post_type.as_str() {
            "post" => POST_FEATURES.contains(&feature),
            "page" => PAGE_FEATURES.contains(&feature),
            "attachment" => ATTACHMENT_FEATURES.contains(&feature),
            _ => self.type_object().is_some_and(|t| t.supports(feature)),
        }
    }

    fn type_supports(&self, post_type: &str, feature: &str) -> bool {
        matches!(post_type, "post" | "page")
            || self
                .registry
                .post_type(post_type)
                .is_some_and(|t| t.supports(feature))
    }

    fn item_url(&self, id: u64) -> String {
        self.registry
            .rest_url(&format!("{NAMESPACE}/{}/{id}", self.rest_base))
    }

    /// HTML permalink of a post.
    #[must_use]
    pub fn permalink(&self, post: &Post) -> String {
        let home = self.registry.options().home.trim_end_matches('/');
        match post.post_type.as_str() {
            "post" => format!("{home}/?p={}", post.id),
            "page" => format!("{home}/?page_id={}", post.id),
            "attachment" => format!("{home}/?attachment_id={}", post.id),
            other => format!("{home}/?post_type={other}&p={}", post.id),
        }
    }

    // -------------------------------------------------------------------------
    // Lookup & permissions
    // -------------------------------------------------------------------------

    /// The post behind `id`, or 404 `rest_post_invalid_id`.
    pub fn get_post(&self, id: Option<i64>, store: &dyn Store) -> RestResult<Post> {
        let invalid = || RestError::new("rest_post_invalid_id", "Invalid post ID.", 404);
        let id = id
            .filter(|id| *id > 0)
            .and_then(|id| u64::try_from(id).ok())
            .ok_or_else(invalid)?;
        store
            .get_post(id)
            .filter(|p| p.post_type == self.post_type)
            .ok_or_else(invalid)
    }

    fn type_allowed(&self, post_type: &str) -> bool {
        self.registry
            .post_type(post_type)
            .is_some_and(|t| t.show_in_rest)
    }

    /// Whether the current user may see `post`.
    pub fn check_read_permission(&self, post: &Post, env: &Env<'_>) -> bool {
        if !self.type_allowed(&post.post_type) {
            return false;
        }
        if post.status == "publish" || env.auth.user_can(Cap::ReadPost(post)) {
            return true;
        }
        if self
            .registry
            .post_status(&post.status)
            .is_some_and(|s| s.public)
        {
            return true;
        }
        if post.status == "inherit" && post.parent > 0 {
            if let Some(parent) = env.store().get_post(post.parent) {
                return self.check_read_permission(&parent, env);
            }
        }
        post.status == "inherit"
    }

    fn check_update_permission(&self, post: &Post, env: &Env<'_>) -> bool {
        self.type_allowed(&post.post_type) && env.auth.user_can(Cap::EditPost(post))
    }

    fn check_create_permission(&self, env: &Env<'_>) -> bool {
        self.type_allowed(&self.post_type) && env.auth.user_can(Cap::Named(&self.caps().create_posts))
    }

    fn check_delete_permission(&self, post: &Post, env: &Env<'_>) -> bool {
        self.type_allowed(&post.post_type) && env.auth.user_can(Cap::DeletePost(post))
    }

    /// Every existing term the request assigns must be assignable.
    fn check_assign_terms_permission(&self, req: &Request, env: &Env<'_>) -> bool {
        for taxonomy in self.registry.rest_taxonomies(&self.post_type) {
            let Some(value) = req.param(&taxonomy.rest_base) else {
                continue;
            };
            for term_id in parse_id_list(value) {
                let Some(term) = env
                    .store()
                    .get_term(term_id)
                    .filter(|t| t.taxonomy == taxonomy.name)
                else {
                    continue;
                };
                if !env.auth.user_can(Cap::AssignTerm(&term)) {
                    return false;
                }
            }
        }
        true
    }

    /// Translate the collection parameters into storage query arguments.
    /// Only registered parameters that are present are carried over.
    pub fn items_query(&self, req: &Request, store: &dyn Store) -> RestResult<QueryArgs> {
        let orderby = req.param_str("orderby");
        if orderby.as_deref() == Some("relevance")
            && req.param_str("search").is_none_or(|s| s.is_empty())
        {
            return Err(RestError::new(
                "rest_no_search_term_defined",
                "You need to define a search term to order by relevance.",
                400,
            ));
        }
        if orderby.as_deref() == Some("include") && req.param_ids("include").is_empty() {
            return Err(RestError::new(
                "rest_orderby_include_missing_include",
                "You need to define an include parameter to order by include.",
                400,
            ));
        }

        let registered = self.collection_params();
        let mut args = QueryArgs::new();
        for (api, storage) in PARAMETER_MAPPINGS {
            if !registered.contains_key(api) {
                continue;
            }
            if let Some(value) = req.param(api) {
                args.set(storage, value.clone());
            }
        }

        let mut bounds = Map::new();
        for key in ["before", "after"] {
            if !registered.contains_key(key) {
                continue;
            }
            if let Some(value) = req.param(key) {
                bounds.insert(key.to_string(), value.clone());
            }
        }
        if !bounds.is_empty() {
            args.set("date_query", json!([bounds]));
        }

        let per_page = req.param_i64("per_page").unwrap_or(10).max(1);
        args.set("posts_per_page", json!(per_page));

        if registered.contains_key("sticky") && req.has_param("sticky") {
            let sticky = store.sticky_posts();
            if req.param_bool("sticky") {
                let include = args.ids("post__in").unwrap_or_default();
                let mut ids: Vec<u64> = if include.is_empty() {
                    sticky
                } else {
                    sticky.into_iter().filter(|id| include.contains(id)).collect()
                };
                if ids.is_empty() {
                    ids.push(0);
                }
                args.set("post__in", json!(ids));
            } else if !sticky.is_empty() {
                let mut exclude = args.ids("post__not_in").unwrap_or_default();
                exclude.extend(sticky);
                args.set("post__not_in", json!(exclude));
            }
        }

        args.set("post_type", json!(self.post_type));
        args.set("ignore_sticky_posts", json!(true));
        if args.contains("orderby") {
            let mapped = match orderby.as_deref() {
                Some("id") => Some("ID"),
                Some("include") => Some("post__in"),
                Some("slug") => Some("name"),
                _ => None,
            };
            if let Some(mapped) = mapped {
                args.set("orderby", json!(mapped));
            }
        }

        let mut tax_query = Vec::new();
        for taxonomy in self.registry.rest_taxonomies(&self.post_type) {
            let include = req.param_ids(&taxonomy.rest_base);
            if !include.is_empty() {
                tax_query.push(json!({
                    "taxonomy": taxonomy.name,
                    "field": "term_id",
                    "terms": include,
                    "include_children": false,
                }));
            }
            let exclude = req.param_ids(&format!("{}_exclude", taxonomy.rest_base));
            if !exclude.is_empty() {
                tax_query.push(json!({
                    "taxonomy": taxonomy.name,
                    "field": "term_id",
                    "terms": exclude,
                    "include_children": false,
                    "operator": "NOT IN",
                }));
            }
        }
        if !tax_query.is_empty() {
            args.set("tax_query", Value::Array(tax_query));
        }
        Ok(args)
    }

    /// Author and sticky rules shared by create and update.
    fn check_author_and_sticky(&self, req: &Request, env: &Env<'_>, verb: &str) -> RestResult<()> {
        let caps = self.caps();
        let others = env.auth.user_can(Cap::Named(&caps.edit_others_posts));
        if let Some(author) = req.param_u64("author").filter(|a| *a != 0) {
            if author != env.auth.current_user_id() && !others {
                return Err(denied(
                    "rest_cannot_edit_others",
                    &format!("Sorry, you are not allowed to {verb} posts as this user."),
                    env,
                ));
            }
        }
        if req.param_bool("sticky") && !others {
            return Err(denied(
                "rest_cannot_assign_sticky",
                "Sorry, you are not allowed to make posts sticky.",
                env,
            ));
        }
        Ok(())
    }

    fn passwords_match(stored: &str, supplied: &str) -> bool {
        stored.as_bytes().ct_eq(supplied.as_bytes()).into()
    }

    /// Edit context or the right password unlocks protected content.
    pub fn can_access_password_content(&self, post: &Post, req: &Request) -> bool {
        if post.password.is_empty() {
            return false;
        }
        if req.context() == Context::Edit {
            return true;
        }
        match req.param_str("password").filter(|p| !p.is_empty()) {
            Some(supplied) => Self::passwords_match(&post.password, &supplied),
            None => false,
        }
    }

    // -------------------------------------------------------------------------
    // Write helpers
    // -------------------------------------------------------------------------

    /// Status a client asked for, after capability checks.
    fn handle_status_param(&self, status: &str, env: &Env<'_>) -> RestResult<String> {
        let publish = || env.auth.user_can(Cap::Named(&self.caps().publish_posts));
        match status {
            "draft" | "pending" => Ok(status.to_string()),
            "private" if !publish() => Err(denied(
                "rest_cannot_publish",
                "Sorry, you are not allowed to create private posts in this post type.",
                env,
            )),
            "publish" | "future" if !publish() => Err(denied(
                "rest_cannot_publish",
                "Sorry, you are not allowed to publish posts in this post type.",
                env,
            )),
            "private" | "publish" | "future" => Ok(status.to_string()),
            other if self.registry.post_status(other).is_some() => Ok(other.to_string()),
            _ => Ok("draft".to_string()),
        }
    }

    fn check_terms(&self, req: &Request, store: &dyn Store) -> RestResult<()> {
        for taxonomy in self.registry.rest_taxonomies(&self.post_type) {
            let Some(value) = req.param(&taxonomy.rest_base) else {
                continue;
            };
            let invalid: Vec<u64> = parse_id_list(value)
                .into_iter()
                .filter(|id| {
                    store
                        .get_term(*id)
                        .is_none_or(|t| t.taxonomy != taxonomy.name)
                })
                .collect();
            if !invalid.is_empty() {
                return Err(RestError::new("rest_invalid_term", "Invalid term ID.", 400)
                    .with_data("params", json!({ taxonomy.rest_base.clone(): invalid })));
            }
        }
        Ok(())
    }

    fn check_featured_media(&self, req: &Request, store: &dyn Store) -> RestResult<()> {
        if !self.has_field("featured_media") {
            return Ok(());
        }
        let Some(media) = req.param_u64("featured_media").filter(|m| *m != 0) else {
            return Ok(());
        };
        match store.get_post(media) {
            Some(p) if p.post_type == "attachment" => Ok(()),
            _ => Err(RestError::new(
                "rest_invalid_featured_media",
                "Invalid featured media ID.",
                400,
            )),
        }
    }

    /// Everything that can fail after the post row is written, checked
    /// before it is.
    fn check_side_effects(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        self.check_featured_media(req, env.store())?;
        self.check_terms(req, env.store())?;
        if self.has_field("meta") {
            if let Some(meta) = req.param("meta") {
                self.meta.check_value(meta)?;
            }
        }
        Ok(())
    }

    fn has_field(&self, name: &str) -> bool {
        self.item_schema().is_some_and(|s| s.has(name))
    }

    fn set_format(&self, post_id: u64, format: &str, store: &mut dyn Store) -> RestResult<()> {
        if format == "standard" {
            return store
                .set_object_terms(post_id, "post_format", &[])
                .map_err(store_failure);
        }
        let slug = format!("post-format-{format}");
        let term_id = match store.get_term_by_slug("post_format", &slug) {
            Some(term) => term.id,
            None => store
                .insert_term("post_format", format, &slug)
                .map_err(store_failure)?,
        };
        store
            .set_object_terms(post_id, "post_format", &[term_id])
            .map_err(store_failure)
    }

    fn get_format(&self, post_id: u64, store: &dyn Store) -> String {
        store
            .object_terms(post_id, "post_format")
            .first()
            .and_then(|t| t.slug.strip_prefix("post-format-").map(str::to_string))
            .filter(|f| POST_FORMATS.contains(&f.as_str()))
            .unwrap_or_else(|| "standard".to_string())
    }

    fn featured_media(post_id: u64, store: &dyn Store) -> u64 {
        store
            .get_meta(MetaObjectType::Post, post_id, THUMBNAIL_META)
            .first()
            .and_then(value_as_u64)
            .unwrap_or(0)
    }

    fn handle_featured_media(&self, media: u64, post_id: u64, store: &mut dyn Store) -> RestResult<()> {
        let result = if media == 0 {
            store.delete_meta(MetaObjectType::Post, post_id, THUMBNAIL_META, None)
        } else {
            store.update_meta(MetaObjectType::Post, post_id, THUMBNAIL_META, json!(media))
        };
        result.map_err(store_failure)
    }

    fn handle_template(&self, template: &str, post_id: u64, store: &mut dyn Store) -> RestResult<()> {
        let known = self.registry.options().page_templates.contains_key(template);
        let value = if known { template } else { "" };
        store
            .update_meta(MetaObjectType::Post, post_id, TEMPLATE_META, json!(value))
            .map_err(store_failure)
    }

    fn handle_terms(&self, post_id: u64, req: &Request, store: &mut dyn Store) -> RestResult<()> {
        for taxonomy in self.registry.rest_taxonomies(&self.post_type) {
            let Some(value) = req.param(&taxonomy.rest_base) else {
                continue;
            };
            store
                .set_object_terms(post_id, &taxonomy.name, &parse_id_list(value))
                .map_err(store_failure)?;
        }
        Ok(())
    }

    /// Sticky, format, featured media, template, terms, meta and
    /// additional fields, in that order.
    fn apply_side_effects(
        &self,
        post_id: u64,
        req: &Request,
        env: &mut Env<'_>,
        creating: bool,
    ) -> RestResult<()> {
        let schema = self.item_schema();
        let has = |name: &str| schema.as_ref().is_some_and(|s| s.has(name));

        if has("sticky") && (creating || req.has_param("sticky")) {
            if req.param_bool("sticky") {
                env.store.stick_post(post_id);
            } else {
                env.store.unstick_post(post_id);
            }
        }
        if has("format") {
            if let Some(format) = req.param_str("format").filter(|f| !f.is_empty()) {
                self.set_format(post_id, &format, env.store)?;
            }
        }
        if has("featured_media") && req.has_param("featured_media") {
            let media = req.param_u64("featured_media").unwrap_or(0);
            self.handle_featured_media(media, post_id, env.store)?;
        }
        if has("template") {
            if let Some(template) = req.param_str("template") {
                self.handle_template(&template, post_id, env.store)?;
            }
        }
        self.handle_terms(post_id, req, env.store)?;
        if has("meta") {
            if let Some(meta) = req.param("meta") {
                self.meta.update_value(meta, post_id, env.store)?;
            }
        }
        update_additional_fields_for_object(&self.registry, &self.post_type, post_id, req, env.store)
    }

    fn refetch(&self, id: u64, store: &dyn Store) -> RestResult<Post> {
        store
            .get_post(id)
            .ok_or_else(|| RestError::new("rest_post_invalid_id", "Invalid post ID.", 404))
    }

    fn edit_request(req: &Request) -> Request {
        let mut req = req.clone();
        req.set_param("context", json!(Context::Edit.as_str()));
        req
    }

    // -------------------------------------------------------------------------
    // Response helpers
    // -------------------------------------------------------------------------

    fn prepare_links(&self, post: &Post, store: &dyn Store) -> Vec<(String, Link)> {
        let mut links = vec![
            ("self".to_string(), Link::new(self.item_url(post.id))),
            (
                "collection".to_string(),
                Link::new(self.registry.rest_url(&format!("{NAMESPACE}/{}", self.rest_base))),
            ),
            (
                "about".to_string(),
                Link::new(
                    self.registry
                        .rest_url(&format!("{NAMESPACE}/types/{}", self.post_type)),
                ),
            ),
        ];

        if self.type_supports(&post.post_type, "author") && post.author != 0 {
            links.push((
                "author".to_string(),
                Link::new(
                    self.registry
                        .rest_url(&format!("{NAMESPACE}/users/{}", post.author)),
                )
                .attr("embeddable", json!(true)),
            ));
        }
        if self.type_supports(&post.post_type, "comments") {
            links.push((
                "replies".to_string(),
                Link::new(format!(
                    "{}?post={}",
                    self.registry.rest_url(&format!("{NAMESPACE}/comments")),
                    post.id
                ))
                .attr("embeddable", json!(true)),
            ));
        }
        if self.type_supports(&post.post_type, "revisions") {
            links.push((
                "version-history".to_string(),
                Link::new(format!("{}/revisions", self.item_url(post.id))),
            ));
        }
        if self.hierarchical() && post.parent != 0 {
            links.push((
                "up".to_string(),
                Link::new(self.item_url(post.parent)).attr("embeddable", json!(true)),
            ));
        }

        let media = Self::featured_media(post.id, store);
        if media != 0 {
            links.push((
                format!("{API_REL_BASE}featuredmedia"),
                Link::new(self.registry.rest_url(&format!("{NAMESPACE}/media/{media}")))
                    .attr("embeddable", json!(true)),
            ));
        }
        if !matches!(post.post_type.as_str(), "attachment" | "nav_menu_item" | "revision") {
            links.push((
                format!("{API_REL_BASE}attachment"),
                Link::new(format!(
                    "{}?parent={}",
                    self.registry.rest_url(&format!("{NAMESPACE}/media")),
                    post.id
                )),
            ));
        }
        for taxonomy in self.registry.rest_taxonomies(&post.post_type) {
            links.push((
                format!("{API_REL_BASE}term"),
                Link::new(format!(
                    "{}?post={}",
                    self.registry
                        .rest_url(&format!("{NAMESPACE}/{}", taxonomy.rest_base)),
                    post.id
                ))
                .attr("taxonomy", json!(taxonomy.name))
                .attr("embeddable", json!(true)),
            ));
        }
        links
    }

    pub(crate) fn rendered_title(&self, post: &Post) -> String {
        if post.status == "private" {
            format!("Private: {}", post.title)
        } else {
            post.title.clone()
        }
    }

    pub(crate) fn rendered_excerpt(&self, post: &Post) -> String {
        let source = if post.excerpt.is_empty() {
            trim_words(&self.registry.render(&post.content), EXCERPT_LENGTH, EXCERPT_MORE)
        } else {
            post.excerpt.clone()
        };
        self.registry.render(&source)
    }

    // -------------------------------------------------------------------------
    // Schema pieces
    // -------------------------------------------------------------------------

    fn text_object(description: &str, what: &str, with_protected: bool, contexts: &[Context]) -> Property {
        use Context::{Edit, Embed, View};
        let rendered_ctx: &[Context] = if contexts.contains(&Embed) {
            &[View, Edit, Embed]
        } else {
            &[View, Edit]
        };
        let mut prop = Property::object()
            .describe(description)
            .context(contexts)
            .arg_options(ArgOptions {
                sanitize: Some(Sanitize::Skip),
                validate: Some(Validate::Skip),
                ..ArgOptions::default()
            })
            .sub(
                "raw",
                Property::string()
                    .describe(format!("{what} for the object, as it exists in the database."))
                    .context(&[Edit]),
            )
            .sub(
                "rendered",
                Property::string()
                    .describe(format!("HTML {} for the object, transformed for display.", what.to_lowercase()))
                    .context(rendered_ctx)
                    .readonly(),
            );
        if with_protected {
            prop = prop.sub(
                "protected",
                Property::boolean()
                    .describe(format!("Whether the {} is protected with a password.", what.to_lowercase()))
                    .context(&[View, Edit, Embed])
                    .readonly(),
            );
        }
        prop
    }

    fn status_names(&self, include_internal: bool) -> Vec<String> {
        self.registry
            .post_statuses()
            .filter(|s| include_internal || !s.internal)
            .map(|s| s.name.clone())
            .collect()
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

impl Controller for PostsController {
    fn routes(&self) -> RestResult<Vec<Route>> {
        let base = format!("/{NAMESPACE}/{}", self.rest_base);
        let id = id_arg("Unique identifier for the object.");

        let mut get_args = Args::new();
        get_args.insert("context".into(), self.context_param(Some(Context::View)));
        if self.has_field("password") {
            get_args.insert(
                "password".into(),
                Arg::new(
                    Property::string()
                        .describe("The password for the post if it is password protected."),
                ),
            );
        }
        let mut delete_args = Args::new();
        delete_args.insert(
            "force".into(),
            force_arg("Whether to bypass trash and force deletion."),
        );

        Ok(vec![
            Route::new(
                base.clone(),
                vec![
                    Endpoint::new(Methods::READABLE, Operation::GetItems, self.collection_params()),
                    Endpoint::new(
                        Methods::CREATABLE,
                        Operation::CreateItem,
                        self.endpoint_args(Methods::CREATABLE),
                    ),
                ],
            )?,
            Route::new(
                format!("{base}/(?P<id>[\\d]+)"),
                vec![
                    Endpoint::new(Methods::READABLE, Operation::GetItem, with_arg(get_args, "id", &id)),
                    Endpoint::new(
                        Methods::EDITABLE,
                        Operation::UpdateItem,
                        with_arg(self.endpoint_args(Methods::EDITABLE), "id", &id),
                    ),
                    Endpoint::new(
                        Methods::DELETABLE,
                        Operation::DeleteItem,
                        with_arg(delete_args, "id", &id),
                    ),
                ],
            )?,
        ])
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn item_schema(&self) -> Option<Schema> {
        use Context::{Edit, Embed, View};
        let all = [View, Edit, Embed];

        let builder = SchemaBuilder::new(self.post_type.clone())
            .property(
                "date",
                Property::string()
                    .nullable()
                    .describe("The date the object was published, in the site's timezone.")
                    .format(Format::DateTime)
                    .context(&all),
            )
            .property(
                "date_gmt",
                Property::string()
                    .nullable()
                    .describe("The date the object was published, as GMT.")
                    .format(Format::DateTime)
                    .context(&[View, Edit]),
            )
            .property(
                "guid",
                Property::object()
                    .describe("The globally unique identifier for the object.")
                    .context(&[View, Edit])
                    .readonly()
                    .sub(
                        "raw",
                        Property::string()
                            .describe("GUID for the object, as it exists in the database.")
                            .context(&[Edit])
                            .readonly(),
                    )
                    .sub(
                        "rendered",
                        Property::string()
                            .describe("GUID for the object, transformed for display.")
                            .context(&[View, Edit])
                            .readonly(),
                    ),
            )
            .property(
                "id",
                Property::integer()
                    .describe("Unique identifier for the object.")
                    .context(&all)
                    .readonly(),
            )
            .property(
                "link",
                Property::string()
                    .describe("URL to the object.")
                    .format(Format::Uri)
                    .context(&all)
                    .readonly(),
            )
            .property(
                "modified",
                Property::string()
                    .describe("The date the object was last modified, in the site's timezone.")
                    .format(Format::DateTime)
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "modified_gmt",
                Property::string()
                    .describe("The date the object was last modified, as GMT.")
                    .format(Format::DateTime)
                    .context(&[View, Edit])
                    .readonly(),
            )
            .property(
                "slug",
                Property::string()
                    .describe("An alphanumeric identifier for the object unique to its type.")
                    .context(&all)
                    .sanitize_with(Sanitize::Slug),
            )
            .property(
                "status",
                Property::string()
                    .describe("A named status for the object.")
                    .one_of(self.status_names(false))
                    .context(&[View, Edit]),
            )
            .property(
                "type",
                Property::string()
                    .describe("Type of Post for the object.")
                    .context(&all)
                    .readonly(),
            )
            .property(
                "password",
                Property::string()
                    .describe("A password to protect access to the content and excerpt.")
                    .context(&[Edit]),
            )
            .property_if(self.hierarchical(), "parent", || {
                Property::integer()
                    .describe("The ID for the parent of the object.")
                    .context(&[View, Edit])
            })
            .property_if(self.schema_supports("title"), "title", || {
                Self::text_object("The title for the object.", "Title", false, &all)
            })
            .property_if(self.schema_supports("editor"), "content", || {
                Self::text_object("The content for the object.", "Content", true, &[View, Edit])
            })
            .property_if(self.schema_supports("author"), "author", || {
                Property::integer()
                    .describe("The ID for the author of the object.")
                    .context(&all)
            })
            .property_if(self.schema_supports("excerpt"), "excerpt", || {
                Self::text_object("The excerpt for the object.", "Excerpt", true, &all)
            })
            .property_if(self.schema_supports("thumbnail"), "featured_media", || {
                Property::integer()
                    .describe("The ID of the featured media for the object.")
                    .context(&all)
            })
            .overlay(|b| {
                if !self.schema_supports("comments") {
                    return b;
                }
                b.property(
                    "comment_status",
                    Property::string()
                        .describe("Whether or not comments are open on the object.")
                        .one_of(["open", "closed"])
                        .context(&[View, Edit]),
                )
                .property(
                    "ping_status",
                    Property::string()
                        .describe("Whether or not the object can be pinged.")
                        .one_of(["open", "closed"])
                        .context(&[View, Edit]),
                )
            })
            .property_if(self.schema_supports("page-attributes"), "menu_order", || {
                Property::integer()
                    .describe("The order of the object in relation to other object of its type.")
                    .context(&[View, Edit])
            })
            .property_if(self.schema_supports("post-formats"), "format", || {
                Property::string()
                    .describe("The format for the object.")
                    .one_of(POST_FORMATS)
                    .context(&[View, Edit])
            })
            .property_if(self.schema_supports("custom-fields"), "meta", || {
                self.meta.field_schema()
            })
            .property_if(self.post_type == "post", "sticky", || {
                Property::boolean()
                    .describe("Whether or not the object should be treated as sticky.")
                    .context(&[View, Edit])
            })
            .property("template", {
                let mut templates: Vec<String> = self
                    .registry
                    .options()
                    .page_templates
                    .keys()
                    .cloned()
                    .collect();
                templates.push(String::new());
                Property::string()
                    .describe("The theme file to use to display the object.")
                    .one_of(templates)
                    .context(&[View, Edit])
            })
            .extend(
                self.registry
                    .rest_taxonomies(&self.post_type)
                    .into_iter()
                    .map(|t| {
                        (
                            t.rest_base.clone(),
                            Property::array(Property::integer())
                                .describe(format!(
                                    "The terms assigned to the object in the {} taxonomy.",
                                    t.name
                                ))
                                .context(&[View, Edit]),
                        )
                    }),
            );

        Some(add_additional_fields_schema(&self.registry, &self.post_type, builder).build())
    }

    fn collection_params(&self) -> Args {
        let mut params = base_collection_params(self.context_param(Some(Context::View)));
        let ids = |description: &str| {
            Arg::new(
                Property::array(Property::integer())
                    .describe(description)
                    .default_value(json!([])),
            )
        };
        let date = |description: &str| {
            Arg::new(Property::string().describe(description).format(Format::DateTime))
        };
        let page_like = self.post_type == "page" || self.schema_supports("page-attributes");

        params.insert(
            "after".into(),
            date("Limit response to posts published after a given ISO8601 compliant date."),
        );
        if self.type_object().is_some_and(|t| t.supports("author")) {
            params.insert(
                "author".into(),
                ids("Limit result set to posts assigned to specific authors."),
            );
            params.insert(
                "author_exclude".into(),
                ids("Ensure result set excludes posts assigned to specific authors."),
            );
        }
        params.insert(
            "before".into(),
            date("Limit response to posts published before a given ISO8601 compliant date."),
        );
        params.insert("exclude".into(), ids("Ensure result set excludes specific IDs."));
        params.insert("include".into(), ids("Limit result set to specific IDs."));
        if page_like {
            params.insert(
                "menu_order".into(),
                Arg::new(
                    Property::integer()
                        .describe("Limit result set to posts with a specific menu_order value."),
                ),
            );
        }
        params.insert(
            "offset".into(),
            Arg::new(
                Property::integer().describe("Offset the result set by a specific number of items."),
            ),
        );
        params.insert(
            "order".into(),
            Arg::new(
                Property::string()
                    .describe("Order sort attribute ascending or descending.")
                    .default_value(json!("desc"))
                    .one_of(["asc", "desc"]),
            ),
        );
        let mut orderby = vec![
            "author", "date", "id", "include", "modified", "parent", "relevance", "slug", "title",
        ];
        if page_like {
            orderby.push("menu_order");
        }
        params.insert(
            "orderby".into(),
            Arg::new(
                Property::string()
                    .describe("Sort collection by object attribute.")
                    .default_value(json!("date"))
                    .one_of(orderby),
            ),
        );
        if self.hierarchical() || self.post_type == "attachment" {
            params.insert(
                "parent".into(),
                ids("Limit result set to items with particular parent IDs."),
            );
            params.insert(
                "parent_exclude".into(),
                ids("Limit result set to all items except those of a particular parent ID."),
            );
        }
        params.insert(
            "slug".into(),
            Arg::new(
                Property::array(Property::string())
                    .describe("Limit result set to posts with one or more specific slugs."),
            )
            .with_sanitize(Sanitize::SlugList),
        );
        let mut statuses = self.status_names(true);
        statuses.push("any".to_string());
        params.insert(
            "status".into(),
            Arg::new(
                Property::array(Property::string().one_of(statuses))
                    .describe("Limit result set to posts assigned one or more statuses.")
                    .default_value(json!("publish")),
            )
            .with_sanitize(Sanitize::PostStatuses {
                edit_cap: self.caps().edit_posts,
            }),
        );
        for taxonomy in self.registry.rest_taxonomies(&self.post_type) {
            let base = &taxonomy.rest_base;
            params.insert(
                base.clone(),
                ids(&format!(
                    "Limit result set to all items that have the specified term assigned in the {base} taxonomy."
                )),
            );
            params.insert(
                format!("{base}_exclude"),
                ids(&format!(
                    "Limit result set to all items except those that have the specified term assigned in the {base} taxonomy."
                )),
            );
        }
        if self.post_type == "post" {
            params.insert(
                "sticky".into(),
                Arg::new(Property::boolean().describe("Limit result set to items that are sticky.")),
            );
        }
        params
    }

    // -------------------------------------------------------------------------
    // Collection
    // -------------------------------------------------------------------------

    fn get_items_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        if req.context() == Context::Edit && !env.auth.user_can(Cap::Named(&self.caps().edit_posts)) {
            return Err(denied(
                "rest_forbidden_context",
                "Sorry, you are not allowed to edit posts in this post type.",
                env,
            ));
        }
        Ok(())
    }

    fn get_items(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let mut args = self.items_query(req, env.store())?;
        let per_page = args.int("posts_per_page").unwrap_or(10);
        let result = env.store.query_posts(&args);
        let mut items = Vec::new();
        for post in &result.items {
            if !self.check_read_permission(post, env) {
                continue;
            }
            items.push(self.prepare_item_for_response(post, req, env)?);
        }

        let page = u64::try_from(args.int("paged").unwrap_or(1)).unwrap_or(1).max(1);
        let mut total = result.found;
        if total < 1 {
            args.remove("paged");
            total = env.store.query_posts(&args).found;
        }
        let per_page = u64::try_from(per_page).unwrap_or(10);
        let max_pages = super::max_pages(total, per_page);
        if page > max_pages && total > 0 {
            return Err(RestError::new(
                "rest_post_invalid_page_number",
                "The page number requested is larger than the number of pages available.",
                400,
            ));
        }

        let mut response = collection_response(items);
        add_pagination_headers(&mut response, req, &self.registry, total, per_page, page);
        Ok(response)
    }

    // -------------------------------------------------------------------------
    // Single item
    // -------------------------------------------------------------------------

    fn get_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let post = self.get_post(req.param_i64("id"), env.store())?;
        if req.context() == Context::Edit && !self.check_update_permission(&post, env) {
            return Err(denied(
                "rest_forbidden_context",
                "Sorry, you are not allowed to edit this post.",
                env,
            ));
        }
        if let Some(supplied) = req.param_str("password").filter(|p| !p.is_empty()) {
            if !Self::passwords_match(&post.password, &supplied) {
                return Err(RestError::new(
                    "rest_post_incorrect_password",
                    "Incorrect post password.",
                    403,
                ));
            }
        }
        if self.check_read_permission(&post, env) {
            Ok(())
        } else {
            Err(RestError::forbidden(env.auth.required_code()))
        }
    }

    fn get_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let post = self.get_post(req.param_i64("id"), env.store())?;
        let mut response = self.prepare_item_for_response(&post, req, env)?;
        if self
            .registry
            .post_type(&post.post_type)
            .is_some_and(PostTypeObject::is_viewable)
        {
            response.link_header("alternate", &self.permalink(&post), &[("type", "text/html")]);
        }
        Ok(response)
    }

    fn create_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        if req.param_u64("id").is_some_and(|id| id != 0) {
            return Err(RestError::new("rest_post_exists", "Cannot create existing post.", 400));
        }
        self.check_author_and_sticky(req, env, "create")?;
        if !self.check_create_permission(env) {
            return Err(denied(
                "rest_cannot_create",
                "Sorry, you are not allowed to create posts as this user.",
                env,
            ));
        }
        if !self.check_assign_terms_permission(req, env) {
            return Err(denied(
                "rest_cannot_assign_term",
                "Sorry, you are not allowed to assign the provided terms.",
                env,
            ));
        }
        Ok(())
    }

    fn create_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        if req.param_u64("id").is_some_and(|id| id != 0) {
            return Err(RestError::new("rest_post_exists", "Cannot create existing post.", 400));
        }
        let mut prepared = self.prepare_item_for_database(req, env)?;
        prepared.post_type = Some(self.post_type.clone());
        if prepared.author.is_none() {
            prepared.author = Some(env.auth.current_user_id());
        }
        self.check_side_effects(req, env)?;

        let post_id = env.store.insert_post(&prepared).map_err(store_failure)?;
        self.apply_side_effects(post_id, req, env, true)?;
        let post = self.refetch(post_id, env.store())?;
        tracing::debug!(event = "post_created", id = post_id, post_type = %self.post_type);

        let req = Self::edit_request(req);
        let mut response = self.prepare_item_for_response(&post, &req, env)?;
        response.set_status(201);
        response.header("Location", self.item_url(post_id), true);
        Ok(response)
    }

    fn update_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let post = self.get_post(req.param_i64("id"), env.store())?;
        if !self.check_update_permission(&post, env) {
            return Err(denied(
                "rest_cannot_edit",
                "Sorry, you are not allowed to edit this post.",
                env,
            ));
        }
        self.check_author_and_sticky(req, env, "update")?;
        if !self.check_assign_terms_permission(req, env) {
            return Err(denied(
                "rest_cannot_assign_term",
                "Sorry, you are not allowed to assign the provided terms.",
                env,
            ));
        }
        Ok(())
    }

    fn update_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        self.get_post(req.param_i64("id"), env.store())?;
        let prepared = self.prepare_item_for_database(req, env)?;
        self.check_side_effects(req, env)?;

        let post_id = env.store.update_post(&prepared).map_err(store_failure)?;
        self.apply_side_effects(post_id, req, env, false)?;
        if self.type_object().is_some_and(|t| t.supports("revisions")) {
            let written_at = env.written_at(self.registry.options().gmt_offset_minutes);
            let author = env.auth.current_user_id();
            env.store
                .save_revision(post_id, author, written_at)
                .map_err(store_failure)?;
        }
        let post = self.refetch(post_id, env.store())?;

        let req = Self::edit_request(req);
        self.prepare_item_for_response(&post, &req, env)
    }

    fn delete_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let post = self.get_post(req.param_i64("id"), env.store())?;
        if !self.check_delete_permission(&post, env) {
            return Err(denied(
                "rest_cannot_delete",
                "Sorry, you are not allowed to delete this post.",
                env,
            ));
        }
        Ok(())
    }

    fn delete_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let post = self.get_post(req.param_i64("id"), env.store())?;
        let force = req.param_bool("force");
        let supports_trash =
            self.registry.options().empty_trash_days > 0 && post.post_type != "attachment";

        if !self.check_delete_permission(&post, env) {
            return Err(denied(
                "rest_user_cannot_delete_post",
                "Sorry, you are not allowed to delete this post.",
                env,
            ));
        }
        let req = Self::edit_request(req);
        let cannot_delete = |_| RestError::new("rest_cannot_delete", "The post cannot be deleted.", 500);

        if force {
            let previous = self.prepare_item_for_response(&post, &req, env)?;
            env.store.delete_post(post.id).map_err(cannot_delete)?;
            return Ok(Response::new(json!({
                "deleted": true,
                "previous": previous.data().clone(),
            })));
        }

        if !supports_trash {
            return Err(RestError::new(
                "rest_trash_not_supported",
                "The post does not support trashing. Set force=true to delete.",
                501,
            ));
        }
        if post.status == "trash" {
            return Err(RestError::new(
                "rest_already_trashed",
                "The post has already been deleted.",
                410,
            ));
        }
        let trashed = env.store.trash_post(post.id).map_err(cannot_delete)?;
        self.prepare_item_for_response(&trashed, &req, env)
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// String or `{raw}` form of a text field.
fn raw_text(value: &Value, allow_empty_raw: bool) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("raw")
            .and_then(Value::as_str)
            .filter(|raw| allow_empty_raw || !raw.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

impl ItemLifecycle for PostsController {
    type Item = Post;
    type Prepared = PreparedPost;

    fn prepare_item_for_database(&self, req: &Request, env: &Env<'_>) -> RestResult<PreparedPost> {
        let schema = self.item_schema();
        let has = |name: &str| schema.as_ref().is_some_and(|s| s.has(name));
        let offset = self.registry.options().gmt_offset_minutes;
        let mut prepared = PreparedPost {
            written_at: Some(env.written_at(offset)),
            ..PreparedPost::default()
        };

        let existing = if req.has_param("id") {
            Some(self.get_post(req.param_i64("id"), env.store())?)
        } else {
            None
        };
        prepared.id = existing.as_ref().map(|p| p.id);

        if has("title") {
            prepared.title = req.param("title").and_then(|v| raw_text(v, false));
        }
        if has("content") {
            prepared.content = req.param("content").and_then(|v| raw_text(v, true));
        }
        if has("excerpt") {
            prepared.excerpt = req.param("excerpt").and_then(|v| raw_text(v, true));
        }

        prepared.post_type = Some(
            existing
                .as_ref()
                .map_or_else(|| self.post_type.clone(), |p| p.post_type.clone()),
        );

        if has("status") {
            if let Some(status) = req.param_str("status") {
                prepared.status = Some(self.handle_status_param(&status, env)?);
            }
        }

        let date = req.param_str("date").filter(|d| has("date") && !d.is_empty());
        let date_gmt = req
            .param_str("date_gmt")
            .filter(|d| has("date_gmt") && !d.is_empty());
        let pair = match (date, date_gmt) {
            (Some(local), _) => dates::date_with_gmt(&local, false, offset),
            (None, Some(gmt)) => dates::date_with_gmt(&gmt, true, offset),
            (None, None) => None,
        };
        if let Some((local, gmt)) = pair {
            prepared.date = Some(local);
            prepared.date_gmt = Some(gmt);
        }

        if has("slug") {
            prepared.slug = req.param_str("slug").map(|s| sanitize_title(&s));
        }

        if has("author") {
            if let Some(author) = req.param_u64("author").filter(|a| *a != 0) {
                if author != env.auth.current_user_id() && env.store().get_user(author).is_none() {
                    return Err(RestError::new("rest_invalid_author", "Invalid author ID.", 400));
                }
                prepared.author = Some(author);
            }
        }

        let wants_sticky = has("sticky") && req.param("sticky").is_some_and(value_as_bool);
        if has("password") {
            if let Some(password) = req.param_str("password") {
                if !password.is_empty() {
                    if wants_sticky {
                        return Err(RestError::new(
                            "rest_invalid_field",
                            "A post can not be sticky and have a password.",
                            400,
                        ));
                    }
                    let sticky_now = prepared
                        .id
                        .is_some_and(|id| env.store().sticky_posts().contains(&id));
                    if sticky_now {
                        return Err(RestError::new(
                            "rest_invalid_field",
                            "A sticky post can not be password protected.",
                            400,
                        ));
                    }
                }
                prepared.password = Some(password);
            }
        }
        if wants_sticky && existing.as_ref().is_some_and(|p| !p.password.is_empty()) {
            return Err(RestError::new(
                "rest_invalid_field",
                "A password protected post can not be set to sticky.",
                400,
            ));
        }

        if has("parent") {
            if let Some(parent) = req.param_i64("parent") {
                if parent == 0 {
                    prepared.parent = Some(0);
                } else {
                    let found = u64::try_from(parent)
                        .ok()
                        .and_then(|id| env.store().get_post(id))
                        .ok_or_else(|| {
                            RestError::new("rest_post_invalid_id", "Invalid post parent ID.", 400)
                        })?;
                    prepared.parent = Some(found.id);
                }
            }
        }

        if has("menu_order") {
            prepared.menu_order = req.param_i64("menu_order");
        }
        if has("comment_status") {
            prepared.comment_status = req.param_str("comment_status").filter(|s| !s.is_empty());
        }
        if has("ping_status") {
            prepared.ping_status = req.param_str("ping_status").filter(|s| !s.is_empty());
        }
        Ok(prepared)
    }

    fn prepare_item_for_response(&self, post: &Post, req: &Request, env: &Env<'_>) -> RestResult<Response> {
        let Some(schema) = self.item_schema() else {
            return Ok(Response::new(json!({})));
        };
        let has = |name: &str| schema.has(name);
        let store = env.store();
        let offset = self.registry.options().gmt_offset_minutes;
        let mut data = Map::new();

        if has("id") {
            data.insert("id".into(), json!(post.id));
        }
        if has("date") {
            data.insert("date".into(), json!(format_date(post.date)));
        }
        if has("date_gmt") {
            let gmt = post.date_gmt.unwrap_or_else(|| dates::to_gmt(post.date, offset));
            data.insert("date_gmt".into(), json!(format_date(gmt)));
        }
        if has("guid") {
            data.insert(
                "guid".into(),
                json!({"rendered": post.guid, "raw": post.guid}),
            );
        }
        if has("modified") {
            data.insert("modified".into(), json!(format_date(post.modified)));
        }
        if has("modified_gmt") {
            data.insert("modified_gmt".into(), json!(format_date(post.modified_gmt)));
        }
        if has("password") {
            data.insert("password".into(), json!(post.password));
        }
        if has("slug") {
            data.insert("slug".into(), json!(post.slug));
        }
        if has("status") {
            data.insert("status".into(), json!(post.status));
        }
        if has("type") {
            data.insert("type".into(), json!(post.post_type));
        }
        if has("link") {
            data.insert("link".into(), json!(self.permalink(post)));
        }
        if has("title") {
            data.insert(
                "title".into(),
                json!({"raw": post.title, "rendered": self.rendered_title(post)}),
            );
        }

        let locked = !post.password.is_empty() && !self.can_access_password_content(post, req);
        let protected = !post.password.is_empty();
        if has("content") {
            let rendered = if locked {
                String::new()
            } else {
                self.registry.render(&post.content)
            };
            data.insert(
                "content".into(),
                json!({"raw": post.content, "rendered": rendered, "protected": protected}),
            );
        }
        if has("excerpt") {
            let rendered = if locked {
                String::new()
            } else {
                self.rendered_excerpt(post)
            };
            data.insert(
                "excerpt".into(),
                json!({"raw": post.excerpt, "rendered": rendered, "protected": protected}),
            );
        }
        if has("author") {
            data.insert("author".into(), json!(post.author));
        }
        if has("featured_media") {
            data.insert("featured_media".into(), json!(Self::featured_media(post.id, store)));
        }
        if has("parent") {
            data.insert("parent".into(), json!(post.parent));
        }
        if has("menu_order") {
            data.insert("menu_order".into(), json!(post.menu_order));
        }
        if has("comment_status") {
            data.insert("comment_status".into(), json!(post.comment_status));
        }
        if has("ping_status") {
            data.insert("ping_status".into(), json!(post.ping_status));
        }
        if has("sticky") {
            data.insert("sticky".into(), json!(store.sticky_posts().contains(&post.id)));
        }
        if has("template") {
            let template = store
                .get_meta(MetaObjectType::Post, post.id, TEMPLATE_META)
                .first()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            data.insert("template".into(), json!(template));
        }
        if has("format") {
            data.insert("format".into(), json!(self.get_format(post.id, store)));
        }
        if has("meta") {
            data.insert("meta".into(), Value::Object(self.meta.get_value(post.id, store)));
        }
        for taxonomy in self.registry.rest_taxonomies(&self.post_type) {
            if !has(&taxonomy.rest_base) {
                continue;
            }
            let ids: Vec<u64> = store
                .object_terms(post.id, &taxonomy.name)
                .iter()
                .map(|t| t.id)
                .collect();
            data.insert(taxonomy.rest_base.clone(), json!(ids));
        }

        add_additional_fields_to_object(&self.registry, &self.post_type, &mut data, store);
        let data = schema.filter_by_context(data, req.context());

        let mut response = Response::new(Value::Object(data));
        for (rel, link) in self.prepare_links(post, store) {
            response.add_link(&rel, link);
        }
        Ok(response)
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! # Comments Controller
//!
//! `/wp/v2/comments` and `/wp/v2/comments/{id}`.
//!
//! ## Moderation
//!
//! Status changes go through [`StatusTransition`]. A transition to the
//! state a comment is already in succeeds without touching storage; an
//! unknown status token is rejected before anything is written.
//!
//! ## Creation checks
//!
//! Login policy, post state and discussion settings are permission checks.
//! Content, author data, field lengths, duplicates and flooding are checked
//! by the handler, all before the insert.

use super::meta::MetaFields;
use super::posts::PostsController;
use super::{
    Controller, Endpoint, Env, ItemLifecycle, NAMESPACE, Operation, Route, add_additional_fields_schema,
    add_additional_fields_to_object, add_pagination_headers, base_collection_params,
    collection_response, denied, force_arg, id_arg, max_pages, store_failure,
    update_additional_fields_for_object, with_arg,
};
use crate::auth::Cap;
use crate::dates::{self, format_date};
use crate::model::{Comment, CommentApproval, Post, PreparedComment, StatusTransition};
use crate::registry::{Registry, SiteOptions};
use crate::request::Request;
use crate::response::{Link, Response};
use crate::schema::{
    Arg, ArgOptions, Args, Format, Property, Sanitize, Schema, SchemaBuilder, Validate,
};
use crate::store::{CommentStore, PostStore, QueryArgs, Store, UserStore};
use crate::text::is_email;
use crate::types::{Context, Methods, RestError, RestResult};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;

/// Avatar sizes advertised in `author_avatar_urls`.
pub const AVATAR_SIZES: [u32; 3] = [24, 48, 96];

const MODERATE: &str = "moderate_comments";

/// (field, limit, error code)
const MAX_LENGTHS: [(&str, usize, &str); 4] = [
    ("author_name", 245, "comment_author_column_length"),
    ("author_email", 100, "comment_author_email_column_length"),
    ("author_url", 200, "comment_author_url_column_length"),
    ("content", 65_525, "comment_content_column_length"),
];

const PARAMETER_MAPPINGS: [(&str, &str); 14] = [
    ("author", "author__in"),
    ("author_email", "author_email"),
    ("author_exclude", "author__not_in"),
    ("exclude", "comment__not_in"),
    ("include", "comment__in"),
    ("offset", "offset"),
    ("order", "order"),
    ("parent", "parent__in"),
    ("parent_exclude", "parent__not_in"),
    ("per_page", "number"),
    ("post", "post__in"),
    ("search", "search"),
    ("status", "status"),
    ("type", "type"),
];

/// Gravatar URL for an email at one size.
#[must_use]
pub fn avatar_url(email: &str, size: u32, options: &SiteOptions) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    let hash: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "https://secure.gravatar.com/avatar/{hash}?s={size}&d={}&r={}",
        options.avatar_default, options.avatar_rating
    )
}

fn avatar_urls(email: &str, options: &SiteOptions) -> Value {
    let mut out = Map::new();
    for size in AVATAR_SIZES {
        out.insert(size.to_string(), json!(avatar_url(email, size, options)));
    }
    Value::Object(out)
}

/// `orderby` value as understood by the comment store.
fn normalize_orderby(orderby: &str) -> String {
    match orderby {
        "id" => "comment_ID".to_string(),
        "post" => "comment_post_ID".to_string(),
        "parent" => "comment_parent".to_string(),
        "include" => "comment__in".to_string(),
        other => format!("comment_{other}"),
    }
}

fn parse_status(token: &str) -> RestResult<StatusTransition> {
    StatusTransition::parse(token).ok_or_else(|| {
        RestError::new(
            "rest_comment_invalid_status",
            format!("Invalid comment status: {token}."),
            400,
        )
    })
}

#[derive(Debug, Clone)]
pub struct CommentsController {
    registry: Arc<Registry>,
    meta: MetaFields,
}

impl CommentsController {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            meta: MetaFields::for_comment(Arc::clone(&registry)),
            registry,
        }
    }

    fn item_url(&self, id: u64) -> String {
        self.registry.rest_url(&format!("{NAMESPACE}/comments/{id}"))
    }

    fn posts_for(&self, post: &Post) -> PostsController {
        PostsController::new(&post.post_type, Arc::clone(&self.registry))
    }

    fn can_moderate(env: &Env<'_>) -> bool {
        env.auth.user_can(Cap::Named(MODERATE))
    }

    /// The comment behind `id`, or 404. A comment whose post vanished is
    /// reported as an invalid post.
    pub fn get_comment(&self, id: Option<i64>, store: &dyn Store) -> RestResult<Comment> {
        let invalid = || RestError::new("rest_comment_invalid_id", "Invalid comment ID.", 404);
        let id = id
            .filter(|id| *id > 0)
            .and_then(|id| u64::try_from(id).ok())
            .ok_or_else(invalid)?;
        let comment = store.get_comment(id).ok_or_else(invalid)?;
        if comment.post_id != 0 && store.get_post(comment.post_id).is_none() {
            return Err(RestError::new("rest_post_invalid_id", "Invalid post ID.", 404));
        }
        Ok(comment)
    }

    // -------------------------------------------------------------------------
    // Permissions
    // -------------------------------------------------------------------------

    fn check_read_post_permission(&self, post: &Post, req: &Request, env: &Env<'_>) -> bool {
        let posts = self.posts_for(post);
        let single_post = req.param_ids("post").len() == 1;
        let single_comment = req.param_u64("id").is_some_and(|id| id != 0);
        let unlocked = (single_post || single_comment) && posts.can_access_password_content(post, req);
        if !post.password.is_empty() && !unlocked {
            env.auth.user_can(Cap::EditPost(post))
        } else {
            posts.check_read_permission(post, env)
        }
    }

    fn check_read_permission(&self, comment: &Comment, req: &Request, env: &Env<'_>) -> bool {
        let post = if comment.post_id != 0 {
            env.store().get_post(comment.post_id)
        } else {
            None
        };
        if let Some(post) = &post {
            if comment.approved == CommentApproval::Approved
                && self.check_read_post_permission(post, req, env)
            {
                return true;
            }
        }
        if !env.auth.is_logged_in() {
            return false;
        }
        if comment.post_id == 0 && !Self::can_moderate(env) {
            return false;
        }
        if comment.user_id != 0 && comment.user_id == env.auth.current_user_id() {
            return true;
        }
        env.auth.user_can(Cap::EditComment {
            comment,
            post: post.as_ref(),
        })
    }

    fn check_edit_permission(&self, comment: &Comment, env: &Env<'_>) -> bool {
        if !env.auth.is_logged_in() || !Self::can_moderate(env) {
            return false;
        }
        let post = env.store().get_post(comment.post_id);
        env.auth.user_can(Cap::EditComment {
            comment,
            post: post.as_ref(),
        })
    }

    // -------------------------------------------------------------------------
    // Write helpers
    // -------------------------------------------------------------------------

    fn check_lengths(prepared: &PreparedComment) -> RestResult<()> {
        for (field, limit, code) in MAX_LENGTHS {
            let value = match field {
                "author_name" => prepared.author_name.as_deref(),
                "author_email" => prepared.author_email.as_deref(),
                "author_url" => prepared.author_url.as_deref(),
                _ => prepared.content.as_deref(),
            };
            if value.is_some_and(|v| v.chars().count() > limit) {
                return Err(RestError::new(
                    code,
                    "Comment field exceeds maximum length allowed.",
                    400,
                ));
            }
        }
        Ok(())
    }

    /// Approval for a new comment, or the duplicate / flood rejection.
    fn allow_comment(&self, prepared: &PreparedComment, env: &Env<'_>) -> RestResult<CommentApproval> {
        if env.store().find_duplicate_comment(prepared).is_some() {
            return Err(RestError::new(
                "comment_duplicate",
                "Duplicate comment detected; it looks as though you've already said that!",
                409,
            ));
        }
        let moderator = Self::can_moderate(env);
        if !moderator {
            let ip = prepared.author_ip.as_deref().unwrap_or_default();
            let email = prepared.author_email.as_deref().unwrap_or_default();
            let window = self.registry.options().comment_flood_seconds;
            if let Some(last) = env.store().last_comment_time(ip, email) {
                let elapsed = env.now.naive_utc() - last;
                if elapsed.num_seconds() < window {
                    return Err(RestError::new(
                        "comment_flood",
                        "You are posting comments too quickly. Slow down.",
                        400,
                    ));
                }
            }
        }
        if moderator || !self.registry.options().comment_moderation {
            Ok(CommentApproval::Approved)
        } else {
            Ok(CommentApproval::Hold)
        }
    }

    /// Apply a status token. A transition to the current state is a
    /// successful no-op.
    fn handle_status_param(&self, token: &str, id: u64, env: &mut Env<'_>) -> RestResult<bool> {
        let transition = parse_status(token)?;
        env.store.transition_comment(id, transition).map_err(|e| {
            tracing::warn!(event = "store_failure", comment = id, "{e}");
            RestError::new("rest_comment_failed_edit", "Updating comment status failed.", 500)
        })
    }

    fn edit_request(req: &Request, context: Context) -> Request {
        let mut req = req.clone();
        req.set_param("context", json!(context.as_str()));
        req
    }

    fn prepare_links(&self, comment: &Comment, store: &dyn Store) -> Vec<(String, Link)> {
        let mut links = vec![
            ("self".to_string(), Link::new(self.item_url(comment.id))),
            (
                "collection".to_string(),
                Link::new(self.registry.rest_url(&format!("{NAMESPACE}/comments"))),
            ),
        ];
        if comment.user_id != 0 {
            links.push((
                "author".to_string(),
                Link::new(
                    self.registry
                        .rest_url(&format!("{NAMESPACE}/users/{}", comment.user_id)),
                )
                .attr("embeddable", json!(true)),
            ));
        }
        if comment.post_id != 0 {
            if let Some(post) = store.get_post(comment.post_id) {
                let base = self
                    .registry
                    .post_type(&post.post_type)
                    .map_or_else(|| post.post_type.clone(), |t| t.rest_base.clone());
                links.push((
                    "up".to_string(),
                    Link::new(
                        self.registry
                            .rest_url(&format!("{NAMESPACE}/{base}/{}", post.id)),
                    )
                    .attr("embeddable", json!(true))
                    .attr("post_type", json!(post.post_type)),
                ));
            }
        }
        if comment.parent != 0 {
            links.push((
                "in-reply-to".to_string(),
                Link::new(self.item_url(comment.parent)).attr("embeddable", json!(true)),
            ));
        }
        if store.comment_has_children(comment.id) {
            links.push((
                "children".to_string(),
                Link::new(format!(
                    "{}?parent={}",
                    self.registry.rest_url(&format!("{NAMESPACE}/comments")),
                    comment.id
                )),
            ));
        }
        links
    }

    fn comment_link(&self, comment: &Comment, store: &dyn Store) -> String {
        match store.get_post(comment.post_id) {
            Some(post) => format!("{}#comment-{}", self.posts_for(&post).permalink(&post), comment.id),
            None => format!(
                "{}/#comment-{}",
                self.registry.options().home.trim_end_matches('/'),
                comment.id
            ),
        }
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

impl Controller for CommentsController {
    fn routes(&self) -> RestResult<Vec<Route>> {
        let base = format!("/{NAMESPACE}/comments");
        let id = id_arg("Unique identifier for the object.");
        let password = Arg::new(Property::string().describe(
            "The password for the parent post of the comment (if the post is password protected).",
        ));

        let mut get_args = Args::new();
        get_args.insert("context".into(), self.context_param(Some(Context::View)));
        get_args.insert("password".into(), password.clone());
        let mut delete_args = Args::new();
        delete_args.insert("force".into(), force_arg("Whether to bypass trash and force deletion."));
        delete_args.insert("password".into(), password);

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

        let builder = SchemaBuilder::new("comment")
            .property(
                "id",
                Property::integer()
                    .describe("Unique identifier for the object.")
                    .context(&all)
                    .readonly(),
            )
            .property(
                "author",
                Property::integer()
                    .describe("The ID of the user object, if author was a user.")
                    .context(&all),
            )
            .property(
                "author_email",
                Property::string()
                    .describe("Email address for the object author.")
                    .format(Format::Email)
                    .context(&[Edit])
                    .arg_options(ArgOptions {
                        validate: Some(Validate::Skip),
                        ..ArgOptions::default()
                    }),
            )
            .property(
                "author_ip",
                Property::string()
                    .describe("IP address for the object author.")
                    .format(Format::Ip)
                    .context(&[Edit]),
            )
            .property(
                "author_name",
                Property::string()
                    .describe("Display name for the object author.")
                    .context(&all)
                    .sanitize_with(Sanitize::TextField),
            )
            .property(
                "author_url",
                Property::string()
                    .describe("URL for the object author.")
                    .format(Format::Uri)
                    .context(&all),
            )
            .property(
                "author_user_agent",
                Property::string()
                    .describe("User agent for the object author.")
                    .context(&[Edit])
                    .sanitize_with(Sanitize::TextField),
            )
            .property(
                "content",
                Property::object()
                    .describe("The content for the object.")
                    .context(&all)
                    .arg_options(ArgOptions {
                        sanitize: Some(Sanitize::Skip),
                        validate: Some(Validate::Skip),
                        ..ArgOptions::default()
                    })
                    .sub(
                        "raw",
                        Property::string()
                            .describe("Content for the object, as it exists in the database.")
                            .context(&[Edit]),
                    )
                    .sub(
                        "rendered",
                        Property::string()
                            .describe("HTML content for the object, transformed for display.")
                            .context(&all)
                            .readonly(),
                    ),
            )
            .property(
                "date",
                Property::string()
                    .describe("The date the object was published, in the site's timezone.")
                    .format(Format::DateTime)
                    .context(&all),
            )
            .property(
                "date_gmt",
                Property::string()
                    .describe("The date the object was published, as GMT.")
                    .format(Format::DateTime)
                    .context(&[View, Edit]),
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
                "parent",
                Property::integer()
                    .describe("The ID for the parent of the object.")
                    .context(&all)
                    .default_value(json!(0)),
            )
            .property(
                "post",
                Property::integer()
                    .describe("The ID of the associated post object.")
                    .context(&[View, Edit])
                    .default_value(json!(0)),
            )
            .property(
                "status",
                Property::string()
                    .describe("State of the object.")
                    .context(&[View, Edit])
                    .sanitize_with(Sanitize::Key),
            )
            .property(
                "type",
                Property::string()
                    .describe("Type of Comment for the object.")
                    .context(&all)
                    .readonly(),
            )
            .property_if(self.registry.options().show_avatars, "author_avatar_urls", || {
                AVATAR_SIZES.iter().fold(
                    Property::object()
                        .describe("Avatar URLs for the object author.")
                        .context(&all)
                        .readonly(),
                    |prop, size| {
                        prop.sub(
                            size.to_string(),
                            Property::string()
                                .describe(format!("Avatar URL with image size of {size} pixels."))
                                .format(Format::Uri)
                                .context(&[Embed, View, Edit]),
                        )
                    },
                )
            })
            .property("meta", self.meta.field_schema());

        Some(add_additional_fields_schema(&self.registry, "comment", builder).build())
    }

    fn collection_params(&self) -> Args {
        let mut params = base_collection_params(self.context_param(Some(Context::View)));
        let ids = |description: &str, default: bool| {
            let mut prop = Property::array(Property::integer()).describe(description);
            if default {
                prop = prop.default_value(json!([]));
            }
            Arg::new(prop)
        };
        let date = |description: &str| {
            Arg::new(Property::string().describe(description).format(Format::DateTime))
        };

        params.insert(
            "after".into(),
            date("Limit response to comments published after a given ISO8601 compliant date."),
        );
        params.insert(
            "author".into(),
            ids("Limit result set to comments assigned to specific user IDs. Requires authorization.", false),
        );
        params.insert(
            "author_exclude".into(),
            ids("Ensure result set excludes comments assigned to specific user IDs. Requires authorization.", false),
        );
        params.insert(
            "author_email".into(),
            Arg::new(
                Property::string()
                    .describe("Limit result set to that from a specific author email. Requires authorization.")
                    .format(Format::Email),
            ),
        );
        params.insert(
            "before".into(),
            date("Limit response to comments published before a given ISO8601 compliant date."),
        );
        params.insert("exclude".into(), ids("Ensure result set excludes specific IDs.", true));
        params.insert("include".into(), ids("Limit result set to specific IDs.", true));
        params.insert(
            "offset".into(),
            Arg::new(Property::integer().describe("Offset the result set by a specific number of items.")),
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
        params.insert(
            "orderby".into(),
            Arg::new(
                Property::string()
                    .describe("Sort collection by object attribute.")
                    .default_value(json!("date_gmt"))
                    .one_of(["date", "date_gmt", "id", "include", "post", "parent", "type"]),
            ),
        );
        params.insert(
            "parent".into(),
            ids("Limit result set to comments of specific parent IDs.", true),
        );
        params.insert(
            "parent_exclude".into(),
            ids("Ensure result set excludes specific parent IDs.", true),
        );
        params.insert(
            "post".into(),
            ids("Limit result set to comments assigned to specific post IDs.", true),
        );
        params.insert(
            "status".into(),
            Arg::new(
                Property::string()
                    .describe("Limit result set to comments assigned a specific status. Requires authorization.")
                    .default_value(json!("approve")),
            )
            .with_sanitize(Sanitize::Key),
        );
        params.insert(
            "type".into(),
            Arg::new(
                Property::string()
                    .describe("Limit result set to comments assigned a specific type. Requires authorization.")
                    .default_value(json!("comment")),
            )
            .with_sanitize(Sanitize::Key),
        );
        params.insert(
            "password".into(),
            Arg::new(Property::string().describe("The password for the post if it is password protected.")),
        );
        params
    }

    // -------------------------------------------------------------------------
    // Collection
    // -------------------------------------------------------------------------

    fn get_items_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        for post_id in req.param_ids("post") {
            if post_id == 0 {
                if !Self::can_moderate(env) {
                    return Err(denied(
                        "rest_cannot_read",
                        "Sorry, you are not allowed to read comments without a post.",
                        env,
                    ));
                }
                continue;
            }
            let Some(post) = env.store().get_post(post_id) else {
                continue;
            };
            if !self.check_read_post_permission(&post, req, env) {
                return Err(denied(
                    "rest_cannot_read_post",
                    "Sorry, you are not allowed to read the post for this comment.",
                    env,
                ));
            }
        }

        if req.context() == Context::Edit && !Self::can_moderate(env) {
            return Err(denied(
                "rest_forbidden_context",
                "Sorry, you are not allowed to edit comments.",
                env,
            ));
        }

        if !env.auth.user_can(Cap::Named("edit_posts")) {
            let mut forbidden = Vec::new();
            for param in ["author", "author_exclude", "author_email"] {
                if req.param(param).is_some_and(crate::text::value_as_bool) {
                    forbidden.push(param);
                }
            }
            if req.param_str("type").is_some_and(|t| t != "comment") {
                forbidden.push("type");
            }
            if req.param_str("status").is_some_and(|s| s != "approve") {
                forbidden.push("status");
            }
            if !forbidden.is_empty() {
                return Err(denied(
                    "rest_forbidden_param",
                    &format!("Query parameter not permitted: {}", forbidden.join(", ")),
                    env,
                ));
            }
        }
        Ok(())
    }

    fn get_items(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
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
        if let Some(orderby) = req.param_str("orderby") {
            args.set("orderby", json!(normalize_orderby(&orderby)));
        }

        let mut bounds = Map::new();
        for key in ["before", "after"] {
            if let Some(value) = req.param(key) {
                bounds.insert(key.to_string(), value.clone());
            }
        }
        if !bounds.is_empty() {
            args.set("date_query", json!([bounds]));
        }

        let per_page = req.param_i64("per_page").unwrap_or(10).max(1);
        let page = req.param_u64("page").unwrap_or(1).max(1);
        args.set("number", json!(per_page));
        if req.param_i64("offset").is_none_or(|o| o == 0) {
            let offset = per_page.saturating_mul(i64::try_from(page - 1).unwrap_or(i64::MAX));
            args.set("offset", json!(offset));
        }

        let result = env.store.query_comments(&args);
        let mut items = Vec::new();
        for comment in &result.items {
            if !self.check_read_permission(comment, req, env) {
                continue;
            }
            items.push(self.prepare_item_for_response(comment, req, env)?);
        }

        let mut total = result.found;
        if total < 1 {
            args.remove("number");
            args.remove("offset");
            total = env.store.query_comments(&args).found;
        }
        let per_page = u64::try_from(per_page).unwrap_or(10);
        if page > max_pages(total, per_page) && total > 0 {
            return Err(RestError::new(
                "rest_comment_invalid_page_number",
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
        let comment = self.get_comment(req.param_i64("id"), env.store())?;
        if req.context() == Context::Edit && !Self::can_moderate(env) {
            return Err(denied(
                "rest_forbidden_context",
                "Sorry, you are not allowed to edit comments.",
                env,
            ));
        }
        if !self.check_read_permission(&comment, req, env) {
            return Err(denied(
                "rest_cannot_read",
                "Sorry, you are not allowed to read this comment.",
                env,
            ));
        }
        if let Some(post) = env.store().get_post(comment.post_id) {
            if !self.check_read_post_permission(&post, req, env) {
                return Err(denied(
                    "rest_cannot_read_post",
                    "Sorry, you are not allowed to read the post for this comment.",
                    env,
                ));
            }
        }
        Ok(())
    }

    fn get_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let comment = self.get_comment(req.param_i64("id"), env.store())?;
        self.prepare_item_for_response(&comment, req, env)
    }

    fn create_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let options = self.registry.options();
        if !env.auth.is_logged_in()
            && (options.comment_registration || !options.allow_anonymous_comments)
        {
            return Err(RestError::new(
                "rest_comment_login_required",
                "Sorry, you must be logged in to comment.",
                401,
            ));
        }

        let moderator = Self::can_moderate(env);
        if let Some(author) = req.param_u64("author") {
            if author != env.auth.current_user_id() && !moderator {
                return Err(denied(
                    "rest_comment_invalid_author",
                    "Sorry, you are not allowed to edit 'author' for comments.",
                    env,
                ));
            }
        }
        if let Some(ip) = req.param_str("author_ip") {
            if !moderator && req.remote_addr() != Some(ip.as_str()) {
                return Err(denied(
                    "rest_comment_invalid_author_ip",
                    "Sorry, you are not allowed to edit 'author_ip' for comments.",
                    env,
                ));
            }
        }
        if req.has_param("status") && !moderator {
            return Err(denied(
                "rest_comment_invalid_status",
                "Sorry, you are not allowed to edit 'status' for comments.",
                env,
            ));
        }

        let no_post = || {
            RestError::new(
                "rest_comment_invalid_post_id",
                "Sorry, you are not allowed to create this comment without a post.",
                403,
            )
        };
        let post_id = req.param_u64("post").filter(|p| *p != 0).ok_or_else(no_post)?;
        let post = env.store().get_post(post_id).ok_or_else(no_post)?;
        match post.status.as_str() {
            "draft" => {
                return Err(RestError::new(
                    "rest_comment_draft_post",
                    "Sorry, you are not allowed to create a comment on this post.",
                    403,
                ));
            }
            "trash" => {
                return Err(RestError::new(
                    "rest_comment_trash_post",
                    "Sorry, you are not allowed to create a comment on this post.",
                    403,
                ));
            }
            _ => {}
        }
        if !self.check_read_post_permission(&post, req, env) {
            return Err(denied(
                "rest_cannot_read_post",
                "Sorry, you are not allowed to read the post for this comment.",
                env,
            ));
        }
        if post.comment_status != "open" {
            return Err(RestError::new(
                "rest_comment_closed",
                "Sorry, comments are closed for this item.",
                403,
            ));
        }
        Ok(())
    }

    fn create_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        if req.param_u64("id").is_some_and(|id| id != 0) {
            return Err(RestError::new(
                "rest_comment_exists",
                "Cannot create existing comment.",
                400,
            ));
        }
        if req
            .param_str("type")
            .is_some_and(|t| !t.is_empty() && t != "comment")
        {
            return Err(RestError::new(
                "rest_invalid_comment_type",
                "Cannot create a comment with that type.",
                400,
            ));
        }

        let mut prepared = self.prepare_item_for_database(req, env)?;
        prepared.comment_type = None;
        if prepared.content.as_deref().is_none_or(str::is_empty) {
            return Err(RestError::new(
                "rest_comment_content_invalid",
                "Invalid comment content.",
                400,
            ));
        }
        if prepared.date_gmt.is_none() {
            let (local, gmt) = env.written_at(self.registry.options().gmt_offset_minutes);
            prepared.date = Some(local);
            prepared.date_gmt = Some(gmt);
        }

        let missing_author = prepared.user_id.unwrap_or(0) == 0
            && prepared.author_name.as_deref().is_none_or(str::is_empty)
            && prepared.author_email.as_deref().is_none_or(str::is_empty)
            && prepared.author_url.as_deref().is_none_or(str::is_empty);
        if missing_author {
            if let Some(user) = env.store().get_user(env.auth.current_user_id()) {
                prepared.user_id = Some(user.id);
                prepared.author_name = Some(user.display_name);
                prepared.author_email = Some(user.email);
                prepared.author_url = Some(user.url);
            }
        }

        if self.registry.options().require_name_email
            && (prepared.author_name.as_deref().is_none_or(str::is_empty)
                || prepared.author_email.as_deref().is_none_or(str::is_empty))
        {
            return Err(RestError::new(
                "rest_comment_author_data_required",
                "Creating a comment requires valid author name and email values.",
                400,
            ));
        }
        Self::check_lengths(&prepared)?;
        prepared.approved = Some(self.allow_comment(&prepared, env)?);

        let status = req.param_str("status");
        if let Some(token) = &status {
            parse_status(token)?;
        }
        if let Some(meta) = req.param("meta") {
            self.meta.check_value(meta)?;
        }

        let comment_id = env.store.insert_comment(&prepared).map_err(|e| {
            if e.is_storage_failure() {
                tracing::warn!(event = "store_failure", "{e}");
                RestError::new("rest_comment_failed_create", "Creating comment failed.", 500)
            } else {
                store_failure(e)
            }
        })?;
        if let Some(token) = &status {
            self.handle_status_param(token, comment_id, env)?;
        }
        if let Some(meta) = req.param("meta") {
            self.meta.update_value(meta, comment_id, env.store)?;
        }
        update_additional_fields_for_object(&self.registry, "comment", comment_id, req, env.store)?;

        let comment = self.get_comment(i64::try_from(comment_id).ok(), env.store())?;
        tracing::debug!(event = "comment_created", id = comment_id, post = comment.post_id);
        let context = if Self::can_moderate(env) {
            Context::Edit
        } else {
            Context::View
        };
        let req = Self::edit_request(req, context);
        let mut response = self.prepare_item_for_response(&comment, &req, env)?;
        response.set_status(201);
        response.header("Location", self.item_url(comment_id), true);
        Ok(response)
    }

    fn update_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let comment = self.get_comment(req.param_i64("id"), env.store())?;
        if !self.check_edit_permission(&comment, env) {
            return Err(denied(
                "rest_cannot_edit",
                "Sorry, you are not allowed to edit this comment.",
                env,
            ));
        }
        Ok(())
    }

    fn update_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let comment = self.get_comment(req.param_i64("id"), env.store())?;
        let id = comment.id;
        if req
            .param_str("type")
            .is_some_and(|t| t != comment.type_name())
        {
            return Err(RestError::new(
                "rest_comment_invalid_type",
                "Sorry, you are not allowed to change the comment type.",
                404,
            ));
        }

        let mut prepared = self.prepare_item_for_database(req, env)?;
        if prepared.post_id.is_some_and(|p| p != 0)
            && prepared
                .post_id
                .and_then(|p| env.store().get_post(p))
                .is_none()
        {
            return Err(RestError::new(
                "rest_comment_invalid_post_id",
                "Invalid post ID.",
                403,
            ));
        }
        let status = req.param_str("status");
        if let Some(token) = &status {
            parse_status(token)?;
        }
        if let Some(meta) = req.param("meta") {
            self.meta.check_value(meta)?;
        }

        if prepared.is_empty() {
            if let Some(token) = &status {
                self.handle_status_param(token, id, env)?;
            }
        } else {
            if prepared.content.as_deref() == Some("") {
                return Err(RestError::new(
                    "rest_comment_content_invalid",
                    "Invalid comment content.",
                    400,
                ));
            }
            prepared.id = Some(id);
            Self::check_lengths(&prepared)?;
            env.store.update_comment(&prepared).map_err(|e| {
                tracing::warn!(event = "store_failure", comment = id, "{e}");
                RestError::new("rest_comment_failed_edit", "Updating comment failed.", 500)
            })?;
            if let Some(token) = &status {
                self.handle_status_param(token, id, env)?;
            }
        }

        if let Some(meta) = req.param("meta") {
            self.meta.update_value(meta, id, env.store)?;
        }
        update_additional_fields_for_object(&self.registry, "comment", id, req, env.store)?;

        let comment = self.get_comment(i64::try_from(id).ok(), env.store())?;
        let req = Self::edit_request(req, Context::Edit);
        self.prepare_item_for_response(&comment, &req, env)
    }

    fn delete_item_permissions_check(&self, req: &Request, env: &Env<'_>) -> RestResult<()> {
        let comment = self.get_comment(req.param_i64("id"), env.store())?;
        if !self.check_edit_permission(&comment, env) {
            return Err(denied(
                "rest_cannot_delete",
                "Sorry, you are not allowed to delete this comment.",
                env,
            ));
        }
        Ok(())
    }

    fn delete_item(&self, req: &Request, env: &mut Env<'_>) -> RestResult<Response> {
        let comment = self.get_comment(req.param_i64("id"), env.store())?;
        let force = req.param_bool("force");
        let supports_trash = self.registry.options().empty_trash_days > 0;
        let req = Self::edit_request(req, Context::Edit);
        let cannot_delete =
            |_| RestError::new("rest_cannot_delete", "The comment cannot be deleted.", 500);

        if force {
            let previous = self.prepare_item_for_response(&comment, &req, env)?;
            env.store.delete_comment(comment.id).map_err(cannot_delete)?;
            return Ok(Response::new(json!({
                "deleted": true,
                "previous": previous.data().clone(),
            })));
        }

        if !supports_trash {
            return Err(RestError::new(
                "rest_trash_not_supported",
                "The comment does not support trashing. Set force=true to delete.",
                501,
            ));
        }
        if comment.approved == CommentApproval::Trash {
            return Err(RestError::new(
                "rest_already_trashed",
                "The comment has already been trashed.",
                410,
            ));
        }
        env.store
            .transition_comment(comment.id, StatusTransition::Trash)
            .map_err(cannot_delete)?;
        let comment = self.get_comment(i64::try_from(comment.id).ok(), env.store())?;
        self.prepare_item_for_response(&comment, &req, env)
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

impl ItemLifecycle for CommentsController {
    type Item = Comment;
    type Prepared = PreparedComment;

    fn prepare_item_for_database(&self, req: &Request, env: &Env<'_>) -> RestResult<PreparedComment> {
        let mut prepared = PreparedComment::default();
        let creating = !req.has_param("id");

        prepared.content = match req.param("content") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(map)) => map.get("raw").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };
        if req.has_param("post") {
            prepared.post_id = req.param_u64("post");
        }
        if req.has_param("parent") {
            prepared.parent = req.param_u64("parent");
        }

        if req.has_param("author") {
            let user = req
                .param_u64("author")
                .and_then(|id| env.store().get_user(id))
                .ok_or_else(|| {
                    RestError::new("rest_comment_author_invalid", "Invalid comment author ID.", 400)
                })?;
            prepared.user_id = Some(user.id);
            prepared.author_name = Some(user.display_name);
            prepared.author_email = Some(user.email);
            prepared.author_url = Some(user.url);
        }
        if let Some(name) = req.param_str("author_name") {
            prepared.author_name = Some(name);
        }
        if let Some(email) = req.param_str("author_email") {
            if !email.is_empty() && !is_email(&email) {
                return Err(RestError::new(
                    "rest_invalid_param",
                    "Invalid parameter(s): author_email",
                    400,
                )
                .with_data("params", json!({"author_email": "Invalid email address."})));
            }
            prepared.author_email = Some(email);
        }
        if let Some(url) = req.param_str("author_url") {
            prepared.author_url = Some(url);
        }

        let requested_ip = req
            .param_str("author_ip")
            .filter(|_| Self::can_moderate(env));
        if let Some(ip) = requested_ip {
            prepared.author_ip = Some(ip);
        } else if creating {
            let remote = req
                .remote_addr()
                .filter(|addr| addr.parse::<IpAddr>().is_ok())
                .unwrap_or("127.0.0.1");
            prepared.author_ip = Some(remote.to_string());
        }

        if let Some(agent) = req.param_str("author_user_agent").filter(|a| !a.is_empty()) {
            prepared.agent = Some(agent);
        } else if creating {
            prepared.agent = req.get_header("user_agent");
        }

        let offset = self.registry.options().gmt_offset_minutes;
        let pair = match (
            req.param_str("date").filter(|d| !d.is_empty()),
            req.param_str("date_gmt").filter(|d| !d.is_empty()),
        ) {
            (Some(local), _) => dates::date_with_gmt(&local, false, offset),
            (None, Some(gmt)) => dates::date_with_gmt(&gmt, true, offset),
            (None, None) => None,
        };
        if let Some((local, gmt)) = pair {
            prepared.date = Some(local);
            prepared.date_gmt = Some(gmt);
        }
        Ok(prepared)
    }

    fn prepare_item_for_response(&self, comment: &Comment, req: &Request, env: &Env<'_>) -> RestResult<Response> {
        let Some(schema) = self.item_schema() else {
            return Ok(Response::new(json!({})));
        };
        let store = env.store();
        let mut data = Map::new();
        data.insert("id".into(), json!(comment.id));
        data.insert("post".into(), json!(comment.post_id));
        data.insert("parent".into(), json!(comment.parent));
        data.insert("author".into(), json!(comment.user_id));
        data.insert("author_name".into(), json!(comment.author_name));
        data.insert("author_email".into(), json!(comment.author_email));
        data.insert("author_url".into(), json!(comment.author_url));
        data.insert("author_ip".into(), json!(comment.author_ip));
        data.insert("author_user_agent".into(), json!(comment.agent));
        data.insert("date".into(), json!(format_date(comment.date)));
        data.insert("date_gmt".into(), json!(format_date(comment.date_gmt)));
        data.insert(
            "content".into(),
            json!({
                "rendered": self.registry.render(&comment.content),
                "raw": comment.content,
            }),
        );
        data.insert("link".into(), json!(self.comment_link(comment, store)));
        data.insert("status".into(), json!(comment.approved.as_str()));
        data.insert("type".into(), json!(comment.type_name()));
        if schema.has("author_avatar_urls") {
            data.insert(
                "author_avatar_urls".into(),
                avatar_urls(&comment.author_email, self.registry.options()),
            );
        }
        if schema.has("meta") {
            data.insert("meta".into(), Value::Object(self.meta.get_value(comment.id, store)));
        }

        add_additional_fields_to_object(&self.registry, "comment", &mut data, store);
        let data = schema.filter_by_context(data, req.context());

        let mut response = Response::new(Value::Object(data));
        for (rel, link) in self.prepare_links(comment, store) {
            response.add_link(&rel, link);
        }
        Ok(response)
    }
}

// =============================================================================
// TESTS
// =============================================================================

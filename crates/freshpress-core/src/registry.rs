//! # Registry
//!
//! Process-wide, read-mostly registration state: post types, taxonomies,
//! post statuses, registered meta keys, additional REST fields and site
//! options. Built once at startup, then shared as `Arc<Registry>` and handed
//! to each controller at construction.

use crate::schema::{JsonType, Property};
use crate::store::Store;
use crate::text::{Autop, Renderer};
use crate::types::RestResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// SITE OPTIONS
// =============================================================================

/// Site-wide settings consulted by the controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteOptions {
    pub name: String,
    pub description: String,
    /// Site root, without trailing slash.
    pub home: String,
    /// Offset of site-local time from GMT.
    pub gmt_offset_minutes: i32,
    pub comment_registration: bool,
    pub allow_anonymous_comments: bool,
    pub require_name_email: bool,
    pub comment_moderation: bool,
    pub comment_flood_seconds: i64,
    pub default_comment_status: String,
    pub default_ping_status: String,
    pub show_avatars: bool,
    pub avatar_default: String,
    pub avatar_rating: String,
    /// Zero disables trash: non-forced deletes answer 501.
    pub empty_trash_days: u32,
    /// Template file => display name.
    pub page_templates: BTreeMap<String, String>,
    pub oembed_default_width: u32,
    /// Seconds a proxied oEmbed response stays cached.
    pub oembed_cache_ttl: u64,
}

impl Default for SiteOptions {
    fn default() -> Self {
        Self {
            name: "FreshPress".to_string(),
            description: "Just another FreshPress site".to_string(),
            home: "http://localhost:8080".to_string(),
            gmt_offset_minutes: 0,
            comment_registration: false,
            allow_anonymous_comments: false,
            require_name_email: true,
            comment_moderation: false,
            comment_flood_seconds: 15,
            default_comment_status: "open".to_string(),
            default_ping_status: "open".to_string(),
            show_avatars: true,
            avatar_default: "mm".to_string(),
            avatar_rating: "g".to_string(),
            empty_trash_days: 30,
            page_templates: BTreeMap::new(),
            oembed_default_width: 600,
            oembed_cache_ttl: 86_400,
        }
    }
}

impl SiteOptions {
    /// Absolute URL of a REST path.
    #[must_use]
    pub fn rest_url(&self, path: &str) -> String {
        format!(
            "{}/wp-json/{}",
            self.home.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

// =============================================================================
// POST TYPES
// =============================================================================

/// Capability names a post type maps its operations to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTypeCaps {
    pub edit_post: String,
    pub read_post: String,
    pub delete_post: String,
    pub edit_posts: String,
    pub edit_others_posts: String,
    pub publish_posts: String,
    pub read_private_posts: String,
    pub read: String,
    pub delete_posts: String,
    pub delete_private_posts: String,
    pub delete_published_posts: String,
    pub delete_others_posts: String,
    pub edit_private_posts: String,
    pub edit_published_posts: String,
    pub create_posts: String,
}

impl PostTypeCaps {
    /// Capabilities derived from a singular capability type (`post`, `page`).
    #[must_use]
    pub fn for_capability_type(singular: &str) -> Self {
        let plural = format!("{singular}s");
        Self {
            edit_post: format!("edit_{singular}"),
            read_post: format!("read_{singular}"),
            delete_post: format!("delete_{singular}"),
            edit_posts: format!("edit_{plural}"),
            edit_others_posts: format!("edit_others_{plural}"),
            publish_posts: format!("publish_{plural}"),
            read_private_posts: format!("read_private_{plural}"),
            read: "read".to_string(),
            delete_posts: format!("delete_{plural}"),
            delete_private_posts: format!("delete_private_{plural}"),
            delete_published_posts: format!("delete_published_{plural}"),
            delete_others_posts: format!("delete_others_{plural}"),
            edit_private_posts: format!("edit_private_{plural}"),
            edit_published_posts: format!("edit_published_{plural}"),
            create_posts: format!("edit_{plural}"),
        }
    }
}

fn labels(plural: &str, singular: &str) -> BTreeMap<String, String> {
    [
        ("name", plural.to_string()),
        ("singular_name", singular.to_string()),
        ("add_new_item", format!("Add New {singular}")),
        ("edit_item", format!("Edit {singular}")),
        ("view_item", format!("View {singular}")),
        ("search_items", format!("Search {plural}")),
        ("not_found", format!("No {} found.", plural.to_lowercase())),
        ("all_items", format!("All {plural}")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTypeObject {
    pub name: String,
    pub description: String,
    pub labels: BTreeMap<String, String>,
    pub hierarchical: bool,
    pub public: bool,
    pub show_in_rest: bool,
    pub rest_base: String,
    pub features: BTreeSet<String>,
    pub caps: PostTypeCaps,
}

impl PostTypeObject {
    pub fn new(name: impl Into<String>, plural: &str, singular: &str) -> Self {
        let name = name.into();
        Self {
            rest_base: name.clone(),
            name,
            description: String::new(),
            labels: labels(plural, singular),
            hierarchical: false,
            public: true,
            show_in_rest: true,
            features: BTreeSet::new(),
            caps: PostTypeCaps::for_capability_type("post"),
        }
    }

    #[must_use]
    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }

    #[must_use]
    pub fn rest_base(mut self, base: impl Into<String>) -> Self {
        self.rest_base = base.into();
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.features.extend(features.iter().map(|f| (*f).to_string()));
        self
    }

    #[must_use]
    pub fn capability_type(mut self, singular: &str) -> Self {
        self.caps = PostTypeCaps::for_capability_type(singular);
        self
    }

    /// Not public and not exposed over REST.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.public = false;
        self.show_in_rest = false;
        self
    }

    #[must_use]
    pub fn supports(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.labels.get("name").map_or(self.name.as_str(), String::as_str)
    }

    /// Viewable types get an `alternate` link to their HTML permalink.
    #[must_use]
    pub fn is_viewable(&self) -> bool {
        self.public
    }
}

// =============================================================================
// TAXONOMIES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyCaps {
    pub manage_terms: String,
    pub edit_terms: String,
    pub delete_terms: String,
    pub assign_terms: String,
}

impl Default for TaxonomyCaps {
    fn default() -> Self {
        Self {
            manage_terms: "manage_categories".to_string(),
            edit_terms: "manage_categories".to_string(),
            delete_terms: "manage_categories".to_string(),
            assign_terms: "edit_posts".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyObject {
    pub name: String,
    pub description: String,
    pub labels: BTreeMap<String, String>,
    pub object_types: Vec<String>,
    pub hierarchical: bool,
    pub public: bool,
    pub show_in_rest: bool,
    pub show_tagcloud: bool,
    pub rest_base: String,
    pub caps: TaxonomyCaps,
}

impl TaxonomyObject {
    pub fn new(name: impl Into<String>, plural: &str, singular: &str, object_types: &[&str]) -> Self {
        let name = name.into();
        Self {
            rest_base: name.clone(),
            name,
            description: String::new(),
            labels: labels(plural, singular),
            object_types: object_types.iter().map(|t| (*t).to_string()).collect(),
            hierarchical: false,
            public: true,
            show_in_rest: true,
            show_tagcloud: true,
            caps: TaxonomyCaps::default(),
        }
    }

    #[must_use]
    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }

    #[must_use]
    pub fn rest_base(mut self, base: impl Into<String>) -> Self {
        self.rest_base = base.into();
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.show_in_rest = false;
        self.show_tagcloud = false;
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.labels.get("name").map_or(self.name.as_str(), String::as_str)
    }
}

// =============================================================================
// POST STATUSES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostStatusObject {
    pub name: String,
    pub label: String,
    pub public: bool,
    pub protected: bool,
    pub private: bool,
    /// Internal statuses are never selectable through the API.
    pub internal: bool,
}

impl PostStatusObject {
    fn new(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            public: false,
            protected: false,
            private: false,
            internal: false,
        }
    }

    #[must_use]
    pub fn public(name: &str, label: &str) -> Self {
        Self {
            public: true,
            ..Self::new(name, label)
        }
    }

    #[must_use]
    pub fn protected(name: &str, label: &str) -> Self {
        Self {
            protected: true,
            ..Self::new(name, label)
        }
    }

    #[must_use]
    pub fn private(name: &str, label: &str) -> Self {
        Self {
            private: true,
            ..Self::new(name, label)
        }
    }

    #[must_use]
    pub fn internal(name: &str, label: &str) -> Self {
        Self {
            internal: true,
            ..Self::new(name, label)
        }
    }
}

// =============================================================================
// META & ADDITIONAL FIELDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaObjectType {
    Post,
    Comment,
    Term,
    User,
}

impl MetaObjectType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Term => "term",
            Self::User => "user",
        }
    }
}

/// A registered metadata key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaKey {
    pub object_type: MetaObjectType,
    /// Restricts the key to one object subtype (post type, taxonomy).
    pub subtype: Option<String>,
    pub key: String,
    pub ty: JsonType,
    pub description: String,
    pub single: bool,
    pub show_in_rest: bool,
}

impl MetaKey {
    pub fn new(object_type: MetaObjectType, key: impl Into<String>, ty: JsonType) -> Self {
        Self {
            object_type,
            subtype: None,
            key: key.into(),
            ty,
            description: String::new(),
            single: true,
            show_in_rest: true,
        }
    }

    #[must_use]
    pub fn for_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    #[must_use]
    pub fn multiple(mut self) -> Self {
        self.single = false;
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Reads an additional field from the prepared response data.
pub type FieldGetter = Arc<dyn Fn(&Map<String, Value>, &str, &dyn Store) -> Value + Send + Sync>;

/// Writes an additional field for the object with the given id.
pub type FieldUpdater =
    Arc<dyn Fn(&Value, u64, &str, &mut dyn Store) -> RestResult<()> + Send + Sync>;

/// A field registered on an object type from outside its controller.
#[derive(Clone, Default)]
pub struct AdditionalField {
    pub get: Option<FieldGetter>,
    pub update: Option<FieldUpdater>,
    pub schema: Option<Property>,
}

impl fmt::Debug for AdditionalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdditionalField")
            .field("get", &self.get.is_some())
            .field("update", &self.update.is_some())
            .field("schema", &self.schema)
            .finish()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Formats a post can carry.
pub const POST_FORMATS: [&str; 10] = [
    "standard", "aside", "chat", "gallery", "link", "image", "quote", "status", "video", "audio",
];

pub struct Registry {
    options: SiteOptions,
    post_types: BTreeMap<String, PostTypeObject>,
    taxonomies: BTreeMap<String, TaxonomyObject>,
    statuses: BTreeMap<String, PostStatusObject>,
    meta: Vec<MetaKey>,
    fields: BTreeMap<String, BTreeMap<String, AdditionalField>>,
    renderer: Arc<dyn Renderer>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("options", &self.options)
            .field("post_types", &self.post_types.keys().collect::<Vec<_>>())
            .field("taxonomies", &self.taxonomies.keys().collect::<Vec<_>>())
            .field("statuses", &self.statuses.keys().collect::<Vec<_>>())
            .field("meta", &self.meta.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new(options: SiteOptions) -> Self {
        Self {
            options,
            post_types: BTreeMap::new(),
            taxonomies: BTreeMap::new(),
            statuses: BTreeMap::new(),
            meta: Vec::new(),
            fields: BTreeMap::new(),
            renderer: Arc::new(Autop),
        }
    }

    /// Built-in post types, taxonomies and statuses.
    #[must_use]
    pub fn with_defaults(options: SiteOptions) -> Self {
        let mut registry = Self::new(options);

        registry.register_post_type(
            PostTypeObject::new("post", "Posts", "Post")
                .rest_base("posts")
                .with_features(&[
                    "title",
                    "editor",
                    "author",
                    "thumbnail",
                    "excerpt",
                    "trackbacks",
                    "custom-fields",
                    "comments",
                    "revisions",
                    "post-formats",
                ]),
        );
        registry.register_post_type(
            PostTypeObject::new("page", "Pages", "Page")
                .rest_base("pages")
                .hierarchical()
                .capability_type("page")
                .with_features(&[
                    "title",
                    "editor",
                    "author",
                    "thumbnail",
                    "page-attributes",
                    "custom-fields",
                    "comments",
                    "revisions",
                ]),
        );
        registry.register_post_type(
            PostTypeObject::new("attachment", "Media", "Media")
                .rest_base("media")
                .with_features(&["title", "author", "comments"]),
        );
        registry.register_post_type(
            PostTypeObject::new("revision", "Revisions", "Revision")
                .hidden()
                .with_features(&["author"]),
        );

        registry.register_taxonomy(
            TaxonomyObject::new("category", "Categories", "Category", &["post"])
                .hierarchical()
                .rest_base("categories"),
        );
        registry.register_taxonomy(
            TaxonomyObject::new("post_tag", "Tags", "Tag", &["post"]).rest_base("tags"),
        );
        registry.register_taxonomy(
            TaxonomyObject::new("post_format", "Formats", "Format", &["post"]).hidden(),
        );

        for status in [
            PostStatusObject::public("publish", "Published"),
            PostStatusObject::protected("future", "Scheduled"),
            PostStatusObject::protected("draft", "Draft"),
            PostStatusObject::protected("pending", "Pending"),
            PostStatusObject::private("private", "Private"),
            PostStatusObject::internal("trash", "Trash"),
            PostStatusObject::internal("auto-draft", "auto-draft"),
            PostStatusObject::internal("inherit", "inherit"),
        ] {
            registry.register_post_status(status);
        }
        registry
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    pub fn register_post_type(&mut self, post_type: PostTypeObject) {
        self.post_types.insert(post_type.name.clone(), post_type);
    }

    pub fn register_taxonomy(&mut self, taxonomy: TaxonomyObject) {
        self.taxonomies.insert(taxonomy.name.clone(), taxonomy);
    }

    pub fn register_post_status(&mut self, status: PostStatusObject) {
        self.statuses.insert(status.name.clone(), status);
    }

    pub fn register_meta(&mut self, key: MetaKey) {
        self.meta
            .retain(|m| !(m.object_type == key.object_type && m.key == key.key && m.subtype == key.subtype));
        self.meta.push(key);
    }

    /// Attach an additional field to an object type (schema title).
    pub fn register_rest_field(
        &mut self,
        object_type: impl Into<String>,
        name: impl Into<String>,
        field: AdditionalField,
    ) {
        self.fields
            .entry(object_type.into())
            .or_default()
            .insert(name.into(), field);
    }

    pub fn set_renderer(&mut self, renderer: Arc<dyn Renderer>) {
        self.renderer = renderer;
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn options(&self) -> &SiteOptions {
        &self.options
    }

    #[must_use]
    pub fn post_type(&self, name: &str) -> Option<&PostTypeObject> {
        self.post_types.get(name)
    }

    pub fn post_types(&self) -> impl Iterator<Item = &PostTypeObject> {
        self.post_types.values()
    }

    #[must_use]
    pub fn taxonomy(&self, name: &str) -> Option<&TaxonomyObject> {
        self.taxonomies.get(name)
    }

    pub fn taxonomies(&self) -> impl Iterator<Item = &TaxonomyObject> {
        self.taxonomies.values()
    }

    /// Taxonomies attached to a post type.
    #[must_use]
    pub fn object_taxonomies(&self, post_type: &str) -> Vec<&TaxonomyObject> {
        self.taxonomies
            .values()
            .filter(|t| t.object_types.iter().any(|o| o == post_type))
            .collect()
    }

    /// Taxonomies attached to a post type and exposed over REST.
    #[must_use]
    pub fn rest_taxonomies(&self, post_type: &str) -> Vec<&TaxonomyObject> {
        self.object_taxonomies(post_type)
            .into_iter()
            .filter(|t| t.show_in_rest)
            .collect()
    }

    #[must_use]
    pub fn post_status(&self, name: &str) -> Option<&PostStatusObject> {
        self.statuses.get(name)
    }

    pub fn post_statuses(&self) -> impl Iterator<Item = &PostStatusObject> {
        self.statuses.values()
    }

    /// Registered keys for an object type, restricted to keys without a
    /// subtype or matching `subtype`.
    #[must_use]
    pub fn meta_keys(&self, object_type: MetaObjectType, subtype: Option<&str>) -> Vec<&MetaKey> {
        self.meta
            .iter()
            .filter(|m| m.object_type == object_type)
            .filter(|m| m.subtype.is_none() || m.subtype.as_deref() == subtype)
            .collect()
    }

    #[must_use]
    pub fn rest_fields(&self, object_type: &str) -> Option<&BTreeMap<String, AdditionalField>> {
        self.fields.get(object_type)
    }

    #[must_use]
    pub fn render(&self, raw: &str) -> String {
        self.renderer.render(raw)
    }

    #[must_use]
    pub fn rest_url(&self, path: &str) -> String {
        self.options.rest_url(path)
    }
}

// =============================================================================
// TESTS
// =============================================================================

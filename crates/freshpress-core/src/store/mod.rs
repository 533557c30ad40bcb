//! # Storage Collaborator
//!
//! The controllers never own content. They translate public parameters into
//! [`QueryArgs`], hand prepared payloads to the traits below, and re-fetch
//! after every write.
//!
//! ## Query argument contract
//!
//! Posts (`PostStore::query_posts`):
//! - `post_type` (string), `post_status` (list, default `publish`; `any`
//!   matches every non-internal status)
//! - `author__in`, `author__not_in`, `post__in`, `post__not_in`,
//!   `post_parent__in`, `post_parent__not_in` (id lists)
//! - `post_name__in` (slug list), `menu_order` (int), `s` (search text)
//! - `tax_query`: `[{taxonomy, field: "term_id", terms: [ids], operator}]`
//!   with `operator` one of `IN` / `NOT IN`
//! - `date_query`: `[{before, after, column}]` with response-formatted dates
//! - `orderby` (`date`, `modified`, `ID`, `author`, `title`, `name`,
//!   `parent`, `menu_order`, `post__in`, `relevance`), `order` (`ASC`/`DESC`)
//! - `posts_per_page` (-1 for all), `paged`, `offset` (wins over `paged`)
//!
//! Comments (`CommentStore::query_comments`):
//! - `post__in`, `author__in`, `author__not_in`, `comment__in`,
//!   `comment__not_in`, `parent__in`, `parent__not_in` (id lists)
//! - `author_email`, `search`, `type` (`comment` matches the empty type)
//! - `status`: `approve`, `hold`, `spam`, `trash` or `all`
//! - `date_query`, `orderby` (`comment_date_gmt`, `comment_date`,
//!   `comment_ID`, `comment__in`, `comment_post_ID`, `comment_parent`,
//!   `comment_type`), `order`
//! - `number` (page size, absent for all), `offset`
//!
//! `QueryResult::found` is always the pre-pagination total.

pub mod memory;

pub use memory::MemoryStore;

use crate::model::{
    Comment, Post, PreparedComment, PreparedPost, StatusTransition, Term, User,
};
use crate::registry::MetaObjectType;
use crate::text::{parse_id_list, parse_list, value_as_i64, value_as_string};
use crate::types::StoreError;
use chrono::NaiveDateTime;
use serde_json::{Map, Value};

// =============================================================================
// QUERY ARGUMENTS
// =============================================================================

/// Translated, storage-level query arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryArgs(Map<String, Value>);

impl QueryArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn ids(&self, key: &str) -> Option<Vec<u64>> {
        self.get(key).map(parse_id_list)
    }

    #[must_use]
    pub fn strings(&self, key: &str) -> Option<Vec<String>> {
        self.get(key)
            .map(|v| parse_list(v).iter().filter_map(value_as_string).collect())
    }

    #[must_use]
    pub fn string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(value_as_string)
    }

    #[must_use]
    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(value_as_i64)
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// One page of results plus the pre-pagination total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult<T> {
    pub items: Vec<T>,
    pub found: u64,
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

pub trait PostStore {
    fn get_post(&self, id: u64) -> Option<Post>;

    fn query_posts(&self, args: &QueryArgs) -> QueryResult<Post>;

    fn insert_post(&mut self, post: &PreparedPost) -> Result<u64, StoreError>;

    fn update_post(&mut self, post: &PreparedPost) -> Result<u64, StoreError>;

    /// Move to trash, remembering the previous status.
    fn trash_post(&mut self, id: u64) -> Result<Post, StoreError>;

    /// Remove permanently along with meta, comments and revisions.
    fn delete_post(&mut self, id: u64) -> Result<Post, StoreError>;

    fn sticky_posts(&self) -> Vec<u64>;

    fn stick_post(&mut self, id: u64);

    fn unstick_post(&mut self, id: u64);

    /// Revisions of `parent`, newest first.
    fn revisions(&self, parent: u64) -> Vec<Post>;

    /// Snapshot the current title/content/excerpt of `parent`. `None` when
    /// nothing changed since the latest revision.
    fn save_revision(
        &mut self,
        parent: u64,
        author: u64,
        written_at: (NaiveDateTime, NaiveDateTime),
    ) -> Result<Option<u64>, StoreError>;
}

pub trait CommentStore {
    fn get_comment(&self, id: u64) -> Option<Comment>;

    fn query_comments(&self, args: &QueryArgs) -> QueryResult<Comment>;

    fn insert_comment(&mut self, comment: &PreparedComment) -> Result<u64, StoreError>;

    fn update_comment(&mut self, comment: &PreparedComment) -> Result<(), StoreError>;

    /// Apply a moderation transition. `Ok(false)` when the stored status
    /// already matched.
    fn transition_comment(&mut self, id: u64, transition: StatusTransition)
    -> Result<bool, StoreError>;

    /// Remove permanently; children move up to the deleted comment's parent.
    fn delete_comment(&mut self, id: u64) -> Result<Comment, StoreError>;

    fn comment_has_children(&self, id: u64) -> bool;

    /// Id of an existing comment with the same post, parent, author and
    /// content.
    fn find_duplicate_comment(&self, comment: &PreparedComment) -> Option<u64>;

    /// GMT time of the most recent comment from an address or email.
    fn last_comment_time(&self, ip: &str, email: &str) -> Option<NaiveDateTime>;
}

pub trait TermStore {
    fn get_term(&self, id: u64) -> Option<Term>;

    fn get_term_by_slug(&self, taxonomy: &str, slug: &str) -> Option<Term>;

    fn insert_term(&mut self, taxonomy: &str, name: &str, slug: &str) -> Result<u64, StoreError>;

    fn object_terms(&self, object_id: u64, taxonomy: &str) -> Vec<Term>;

    /// Replace the object's terms in one taxonomy.
    fn set_object_terms(
        &mut self,
        object_id: u64,
        taxonomy: &str,
        term_ids: &[u64],
    ) -> Result<(), StoreError>;
}

pub trait UserStore {
    fn get_user(&self, id: u64) -> Option<User>;
}

/// Metadata rows: `(object_type, object_id, key) -> values`.
pub trait MetaStore {
    fn get_meta(&self, object_type: MetaObjectType, object_id: u64, key: &str) -> Vec<Value>;

    fn add_meta(
        &mut self,
        object_type: MetaObjectType,
        object_id: u64,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Replace every value under `key` with `value`.
    fn update_meta(
        &mut self,
        object_type: MetaObjectType,
        object_id: u64,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Delete one matching value, or every value when `value` is `None`.
    fn delete_meta(
        &mut self,
        object_type: MetaObjectType,
        object_id: u64,
        key: &str,
        value: Option<&Value>,
    ) -> Result<(), StoreError>;
}

/// The full storage collaborator.
pub trait Store: PostStore + CommentStore + TermStore + UserStore + MetaStore {}

impl<T> Store for T where T: PostStore + CommentStore + TermStore + UserStore + MetaStore + ?Sized {}

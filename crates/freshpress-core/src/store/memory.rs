//! In-memory reference store.
//!
//! Implements every collaborator trait over ordered maps and honours the
//! query argument contract documented in the parent module. Snapshots are
//! written by `formats::persistence`.

use super::{
    CommentStore, MetaStore, PostStore, QueryArgs, QueryResult, TermStore, UserStore,
};
use crate::dates;
use crate::model::{
    Comment, CommentApproval, Post, PreparedComment, PreparedPost, StatusTransition, Term, User,
};
use crate::registry::MetaObjectType;
use crate::text::{parse_id_list, sanitize_title, value_as_string};
use crate::types::StoreError;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Statuses that never carry a fixed GMT date or an automatic slug.
const FLOATING_STATUSES: [&str; 3] = ["draft", "pending", "auto-draft"];

/// Statuses excluded from `post_status = any`.
const HIDDEN_FROM_ANY: [&str; 2] = ["trash", "auto-draft"];

/// Meta key remembering a trashed post's previous status.
pub const TRASH_STATUS_META: &str = "_wp_trash_meta_status";

/// One metadata row. Values are kept as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MetaRow {
    object_type: MetaObjectType,
    object_id: u64,
    key: String,
    value: String,
}

/// Row counts reported by `freshpress status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub posts: usize,
    pub comments: usize,
    pub terms: usize,
    pub users: usize,
    pub meta: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStore {
    home: String,
    posts: BTreeMap<u64, Post>,
    comments: BTreeMap<u64, Comment>,
    /// Status to restore on unspam / untrash.
    comment_previous: BTreeMap<u64, CommentApproval>,
    terms: BTreeMap<u64, Term>,
    /// (object id, term id)
    relationships: BTreeSet<(u64, u64)>,
    users: BTreeMap<u64, User>,
    meta: Vec<MetaRow>,
    sticky: BTreeSet<u64>,
    next_post_id: u64,
    next_comment_id: u64,
    next_term_id: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

impl MemoryStore {
    /// Empty store for a site rooted at `home` (used for guids).
    pub fn new(home: impl Into<String>) -> Self {
        Self {
            home: home.into().trim_end_matches('/').to_string(),
            posts: BTreeMap::new(),
            comments: BTreeMap::new(),
            comment_previous: BTreeMap::new(),
            terms: BTreeMap::new(),
            relationships: BTreeSet::new(),
            users: BTreeMap::new(),
            meta: Vec::new(),
            sticky: BTreeSet::new(),
            next_post_id: 1,
            next_comment_id: 1,
            next_term_id: 1,
        }
    }

    /// Add or replace a user.
    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            posts: self.posts.len(),
            comments: self.comments.len(),
            terms: self.terms.len(),
            users: self.users.len(),
            meta: self.meta.len(),
        }
    }

    fn now() -> (NaiveDateTime, NaiveDateTime) {
        let now = Utc::now().naive_utc();
        (now, now)
    }

    fn guid(&self, id: u64, post_type: &str) -> String {
        if post_type == "page" {
            format!("{}/?page_id={id}", self.home)
        } else {
            format!("{}/?p={id}", self.home)
        }
    }

    /// Append `-2`, `-3`, ... until no other post of the type uses the slug.
    fn unique_slug(&self, slug: &str, post_type: &str, exclude: u64) -> String {
        let taken = |candidate: &str| {
            self.posts.values().any(|p| {
                p.id != exclude && p.post_type == post_type && p.slug == candidate
            })
        };
        if !taken(slug) {
            return slug.to_string();
        }
        let mut suffix = 2_u64;
        loop {
            let candidate = format!("{slug}-{suffix}");
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn auto_slug(&self, post: &Post) -> String {
        let base = sanitize_title(&post.title);
        let base = if base.is_empty() {
            post.id.to_string()
        } else {
            base
        };
        self.unique_slug(&base, &post.post_type, post.id)
    }

    fn remove_meta_for(&mut self, object_type: MetaObjectType, object_id: u64) {
        self.meta
            .retain(|row| !(row.object_type == object_type && row.object_id == object_id));
    }
}

// =============================================================================
// QUERY HELPERS
// =============================================================================

fn id_filter(args: &QueryArgs, key: &str) -> Option<Vec<u64>> {
    args.ids(key).filter(|ids| !ids.is_empty())
}

fn descending(args: &QueryArgs) -> bool {
    !args
        .string("order")
        .is_some_and(|o| o.eq_ignore_ascii_case("asc"))
}

/// `[{before, after, column}]` bounds, exclusive on both ends.
fn date_bounds(args: &QueryArgs) -> Vec<(String, Option<NaiveDateTime>, Option<NaiveDateTime>)> {
    let Some(Value::Array(clauses)) = args.get("date_query") else {
        return Vec::new();
    };
    clauses
        .iter()
        .map(|clause| {
            let read = |key: &str| {
                clause
                    .get(key)
                    .and_then(Value::as_str)
                    .and_then(dates::parse_date)
                    .map(|d| d.naive)
            };
            let column = clause
                .get("column")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (column, read("before"), read("after"))
        })
        .collect()
}

fn within(value: NaiveDateTime, before: Option<NaiveDateTime>, after: Option<NaiveDateTime>) -> bool {
    before.is_none_or(|b| value < b) && after.is_none_or(|a| value > a)
}

fn paginate<T>(mut items: Vec<T>, per_page: Option<i64>, offset: i64) -> (Vec<T>, u64) {
    let found = items.len() as u64;
    let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
    let items = if offset >= items.len() {
        Vec::new()
    } else {
        let rest = items.split_off(offset);
        match per_page.and_then(|n| usize::try_from(n).ok()) {
            Some(n) => rest.into_iter().take(n).collect(),
            None => rest,
        }
    };
    (items, found)
}

fn position(list: &[u64], id: u64) -> usize {
    list.iter().position(|x| *x == id).unwrap_or(usize::MAX)
}

fn lower_contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle)
}

// =============================================================================
// POSTS
// =============================================================================

impl MemoryStore {
    fn post_matches(&self, post: &Post, args: &QueryArgs) -> bool {
        let post_type = args.string("post_type").unwrap_or_else(|| "post".to_string());
        if post_type != "any" && post.post_type != post_type {
            return false;
        }

        let statuses = args
            .strings("post_status")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| vec!["publish".to_string()]);
        let status_ok = statuses.iter().any(|s| {
            if s == "any" {
                !HIDDEN_FROM_ANY.contains(&post.status.as_str())
            } else {
                *s == post.status
            }
        });
        if !status_ok {
            return false;
        }

        let checks: [(&str, u64, bool); 6] = [
            ("author__in", post.author, true),
            ("author__not_in", post.author, false),
            ("post__in", post.id, true),
            ("post__not_in", post.id, false),
            ("post_parent__in", post.parent, true),
            ("post_parent__not_in", post.parent, false),
        ];
        for (key, value, inclusive) in checks {
            if let Some(ids) = id_filter(args, key) {
                if ids.contains(&value) != inclusive {
                    return false;
                }
            }
        }

        if let Some(slugs) = args.strings("post_name__in").filter(|s| !s.is_empty()) {
            if !slugs.contains(&post.slug) {
                return false;
            }
        }
        if let Some(order) = args.int("menu_order") {
            if post.menu_order != order {
                return false;
            }
        }
        if let Some(search) = args.string("s").filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            if !(lower_contains(&post.title, &needle)
                || lower_contains(&post.content, &needle)
                || lower_contains(&post.excerpt, &needle))
            {
                return false;
            }
        }

        if let Some(Value::Array(clauses)) = args.get("tax_query") {
            for clause in clauses {
                let terms: Vec<u64> = clause
                    .get("terms")
                    .map(parse_id_list)
                    .unwrap_or_default();
                let has_any = terms
                    .iter()
                    .any(|t| self.relationships.contains(&(post.id, *t)));
                let exclude = clause
                    .get("operator")
                    .and_then(Value::as_str)
                    .is_some_and(|op| op.eq_ignore_ascii_case("NOT IN"));
                if has_any == exclude {
                    return false;
                }
            }
        }

        for (column, before, after) in date_bounds(args) {
            let value = match column.as_str() {
                "post_date_gmt" => post.date_gmt.unwrap_or(post.date),
                "post_modified" => post.modified,
                "post_modified_gmt" => post.modified_gmt,
                _ => post.date,
            };
            if !within(value, before, after) {
                return false;
            }
        }
        true
    }

    fn compare_posts(a: &Post, b: &Post, orderby: &str, args: &QueryArgs) -> Ordering {
        let primary = match orderby {
            "modified" => a.modified.cmp(&b.modified),
            "ID" | "id" => a.id.cmp(&b.id),
            "author" => a.author.cmp(&b.author),
            "title" => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            "name" | "slug" => a.slug.cmp(&b.slug),
            "parent" => a.parent.cmp(&b.parent),
            "menu_order" => a.menu_order.cmp(&b.menu_order),
            "relevance" => {
                let needle = args.string("s").unwrap_or_default().to_lowercase();
                let hit = |p: &Post| lower_contains(&p.title, &needle);
                hit(a).cmp(&hit(b)).then(a.date.cmp(&b.date))
            }
            _ => a.date.cmp(&b.date),
        };
        primary.then(a.id.cmp(&b.id))
    }
}

impl PostStore for MemoryStore {
    fn get_post(&self, id: u64) -> Option<Post> {
        self.posts.get(&id).cloned()
    }

    fn query_posts(&self, args: &QueryArgs) -> QueryResult<Post> {
        let mut matched: Vec<Post> = self
            .posts
            .values()
            .filter(|p| self.post_matches(p, args))
            .cloned()
            .collect();

        let orderby = args.string("orderby").unwrap_or_else(|| "date".to_string());
        if orderby == "post__in" {
            let order = args.ids("post__in").unwrap_or_default();
            matched.sort_by_key(|p| position(&order, p.id));
        } else {
            let desc = descending(args);
            matched.sort_by(|a, b| {
                let ord = Self::compare_posts(a, b, &orderby, args);
                if desc { ord.reverse() } else { ord }
            });
        }

        let per_page = args.int("posts_per_page").unwrap_or(10);
        let per_page = (per_page >= 0).then_some(per_page);
        let offset = match (args.int("offset"), per_page) {
            (Some(offset), _) => offset,
            (None, Some(n)) => (args.int("paged").unwrap_or(1).max(1) - 1).saturating_mul(n),
            (None, None) => 0,
        };
        let (items, found) = paginate(matched, per_page, offset);
        QueryResult { items, found }
    }

    fn insert_post(&mut self, prepared: &PreparedPost) -> Result<u64, StoreError> {
        if prepared.id.is_some() {
            return Err(StoreError::Invalid {
                code: "post_exists".to_string(),
                message: "Cannot create existing post.".to_string(),
            });
        }
        let (now_local, now_gmt) = prepared.written_at.unwrap_or_else(Self::now);
        let id = self.next_post_id;
        let post_type = prepared.post_type.clone().unwrap_or_else(|| "post".to_string());
        let status = prepared.status.clone().unwrap_or_else(|| "draft".to_string());
        let floating = FLOATING_STATUSES.contains(&status.as_str());

        let (date, date_gmt) = match (prepared.date, prepared.date_gmt) {
            (Some(date), gmt) => (date, gmt),
            (None, Some(gmt)) => (now_local, Some(gmt)),
            (None, None) if floating => (now_local, None),
            (None, None) => (now_local, Some(now_gmt)),
        };

        let mut post = Post {
            id,
            author: prepared.author.unwrap_or(0),
            date,
            date_gmt,
            content: prepared.content.clone().unwrap_or_default(),
            title: prepared.title.clone().unwrap_or_default(),
            excerpt: prepared.excerpt.clone().unwrap_or_default(),
            status,
            comment_status: prepared
                .comment_status
                .clone()
                .unwrap_or_else(|| "open".to_string()),
            ping_status: prepared
                .ping_status
                .clone()
                .unwrap_or_else(|| "open".to_string()),
            password: prepared.password.clone().unwrap_or_default(),
            slug: String::new(),
            modified: now_local,
            modified_gmt: now_gmt,
            parent: prepared.parent.unwrap_or(0),
            guid: self.guid(id, &post_type),
            menu_order: prepared.menu_order.unwrap_or(0),
            post_type,
        };
        post.slug = match prepared.slug.as_deref().filter(|s| !s.is_empty()) {
            Some(slug) => self.unique_slug(slug, &post.post_type, id),
            None if floating => String::new(),
            None => self.auto_slug(&post),
        };

        self.next_post_id += 1;
        self.posts.insert(id, post);
        Ok(id)
    }

    fn update_post(&mut self, prepared: &PreparedPost) -> Result<u64, StoreError> {
        let id = prepared
            .id
            .ok_or_else(|| StoreError::Update("post".to_string()))?;
        let mut post = self
            .posts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("post".to_string()))?;
        let (now_local, now_gmt) = prepared.written_at.unwrap_or_else(Self::now);

        if let Some(title) = &prepared.title {
            post.title.clone_from(title);
        }
        if let Some(content) = &prepared.content {
            post.content.clone_from(content);
        }
        if let Some(excerpt) = &prepared.excerpt {
            post.excerpt.clone_from(excerpt);
        }
        if let Some(status) = &prepared.status {
            post.status.clone_from(status);
        }
        if let Some(date) = prepared.date {
            post.date = date;
        }
        if let Some(gmt) = prepared.date_gmt {
            post.date_gmt = Some(gmt);
        }
        let floating = FLOATING_STATUSES.contains(&post.status.as_str());
        if !floating && post.date_gmt.is_none() {
            if prepared.date.is_none() {
                post.date = now_local;
            }
            post.date_gmt = Some(now_gmt);
        }
        if let Some(author) = prepared.author {
            post.author = author;
        }
        if let Some(password) = &prepared.password {
            post.password.clone_from(password);
        }
        if let Some(parent) = prepared.parent {
            post.parent = parent;
        }
        if let Some(order) = prepared.menu_order {
            post.menu_order = order;
        }
        if let Some(status) = &prepared.comment_status {
            post.comment_status.clone_from(status);
        }
        if let Some(status) = &prepared.ping_status {
            post.ping_status.clone_from(status);
        }
        match prepared.slug.as_deref() {
            Some(slug) if !slug.is_empty() => {
                post.slug = self.unique_slug(slug, &post.post_type, id);
            }
            _ if post.slug.is_empty() && !floating => post.slug = self.auto_slug(&post),
            _ => {}
        }
        post.modified = now_local;
        post.modified_gmt = now_gmt;

        self.posts.insert(id, post);
        Ok(id)
    }

    fn trash_post(&mut self, id: u64) -> Result<Post, StoreError> {
        let previous = self
            .posts
            .get(&id)
            .map(|p| p.status.clone())
            .ok_or_else(|| StoreError::Delete("post".to_string()))?;
        self.update_meta(MetaObjectType::Post, id, TRASH_STATUS_META, Value::String(previous))?;
        let post = self
            .posts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Delete("post".to_string()))?;
        post.status = "trash".to_string();
        Ok(post.clone())
    }

    fn delete_post(&mut self, id: u64) -> Result<Post, StoreError> {
        let post = self
            .posts
            .remove(&id)
            .ok_or_else(|| StoreError::Delete("post".to_string()))?;

        let revisions: Vec<u64> = self
            .posts
            .values()
            .filter(|p| p.post_type == "revision" && p.parent == id)
            .map(|p| p.id)
            .collect();
        for revision in revisions {
            self.posts.remove(&revision);
            self.remove_meta_for(MetaObjectType::Post, revision);
        }

        let comments: Vec<u64> = self
            .comments
            .values()
            .filter(|c| c.post_id == id)
            .map(|c| c.id)
            .collect();
        for comment in comments {
            self.comments.remove(&comment);
            self.comment_previous.remove(&comment);
            self.remove_meta_for(MetaObjectType::Comment, comment);
        }

        self.remove_meta_for(MetaObjectType::Post, id);
        self.relationships.retain(|(object, _)| *object != id);
        self.sticky.remove(&id);
        Ok(post)
    }

    fn sticky_posts(&self) -> Vec<u64> {
        self.sticky.iter().copied().collect()
    }

    fn stick_post(&mut self, id: u64) {
        self.sticky.insert(id);
    }

    fn unstick_post(&mut self, id: u64) {
        self.sticky.remove(&id);
    }

    fn revisions(&self, parent: u64) -> Vec<Post> {
        let mut out: Vec<Post> = self
            .posts
            .values()
            .filter(|p| p.post_type == "revision" && p.parent == parent)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        out
    }

    fn save_revision(
        &mut self,
        parent: u64,
        author: u64,
        written_at: (NaiveDateTime, NaiveDateTime),
    ) -> Result<Option<u64>, StoreError> {
        let source = self
            .posts
            .get(&parent)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("post".to_string()))?;
        if let Some(latest) = self.revisions(parent).first() {
            if latest.title == source.title
                && latest.content == source.content
                && latest.excerpt == source.excerpt
            {
                return Ok(None);
            }
        }

        let id = self.next_post_id;
        let (local, gmt) = written_at;
        let revision = Post {
            id,
            author,
            date: local,
            date_gmt: Some(gmt),
            content: source.content,
            title: source.title,
            excerpt: source.excerpt,
            status: "inherit".to_string(),
            comment_status: "closed".to_string(),
            ping_status: "closed".to_string(),
            password: String::new(),
            slug: format!("{parent}-revision-v1"),
            modified: local,
            modified_gmt: gmt,
            parent,
            guid: self.guid(id, "revision"),
            menu_order: 0,
            post_type: "revision".to_string(),
        };
        self.next_post_id += 1;
        self.posts.insert(id, revision);
        Ok(Some(id))
    }
}

// =============================================================================
// COMMENTS
// =============================================================================

fn approval_matches(status: &str, approved: CommentApproval) -> bool {
    match status {
        "all" => matches!(approved, CommentApproval::Approved | CommentApproval::Hold),
        "approve" | "approved" | "1" => approved == CommentApproval::Approved,
        "hold" | "0" => approved == CommentApproval::Hold,
        "spam" => approved == CommentApproval::Spam,
        "trash" => approved == CommentApproval::Trash,
        _ => false,
    }
}

impl MemoryStore {
    fn comment_matches(comment: &Comment, args: &QueryArgs) -> bool {
        let checks: [(&str, u64, bool); 7] = [
            ("post__in", comment.post_id, true),
            ("author__in", comment.user_id, true),
            ("author__not_in", comment.user_id, false),
            ("comment__in", comment.id, true),
            ("comment__not_in", comment.id, false),
            ("parent__in", comment.parent, true),
            ("parent__not_in", comment.parent, false),
        ];
        for (key, value, inclusive) in checks {
            if let Some(ids) = id_filter(args, key) {
                if ids.contains(&value) != inclusive {
                    return false;
                }
            }
        }

        if let Some(email) = args.string("author_email").filter(|e| !e.is_empty()) {
            if !comment.author_email.eq_ignore_ascii_case(&email) {
                return false;
            }
        }
        if let Some(status) = args.string("status").filter(|s| !s.is_empty()) {
            if !approval_matches(&status, comment.approved) {
                return false;
            }
        }
        if let Some(ty) = args.string("type").filter(|t| !t.is_empty()) {
            if comment.type_name() != ty {
                return false;
            }
        }
        if let Some(search) = args.string("search").filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            if ![
                &comment.content,
                &comment.author_name,
                &comment.author_email,
                &comment.author_url,
                &comment.author_ip,
            ]
            .iter()
            .any(|field| lower_contains(field, &needle))
            {
                return false;
            }
        }
        for (column, before, after) in date_bounds(args) {
            let value = if column == "comment_date" {
                comment.date
            } else {
                comment.date_gmt
            };
            if !within(value, before, after) {
                return false;
            }
        }
        true
    }
}

impl CommentStore for MemoryStore {
    fn get_comment(&self, id: u64) -> Option<Comment> {
        self.comments.get(&id).cloned()
    }

    fn query_comments(&self, args: &QueryArgs) -> QueryResult<Comment> {
        let mut matched: Vec<Comment> = self
            .comments
            .values()
            .filter(|c| Self::comment_matches(c, args))
            .cloned()
            .collect();

        let orderby = args
            .string("orderby")
            .unwrap_or_else(|| "comment_date_gmt".to_string());
        if orderby == "comment__in" {
            let order = args.ids("comment__in").unwrap_or_default();
            matched.sort_by_key(|c| position(&order, c.id));
        } else {
            let desc = descending(args);
            matched.sort_by(|a, b| {
                let primary = match orderby.as_str() {
                    "comment_date" => a.date.cmp(&b.date),
                    "comment_ID" => a.id.cmp(&b.id),
                    "comment_post_ID" => a.post_id.cmp(&b.post_id),
                    "comment_parent" => a.parent.cmp(&b.parent),
                    "comment_type" => a.type_name().cmp(b.type_name()),
                    _ => a.date_gmt.cmp(&b.date_gmt),
                };
                let ord = primary.then(a.id.cmp(&b.id));
                if desc { ord.reverse() } else { ord }
            });
        }

        let number = args.int("number").filter(|n| *n > 0);
        let offset = args.int("offset").unwrap_or(0);
        let (items, found) = paginate(matched, number, offset);
        QueryResult { items, found }
    }

    fn insert_comment(&mut self, prepared: &PreparedComment) -> Result<u64, StoreError> {
        let post_id = prepared.post_id.ok_or_else(|| StoreError::Invalid {
            code: "comment_post_required".to_string(),
            message: "A comment needs a post.".to_string(),
        })?;
        let (now_local, now_gmt) = Self::now();
        let id = self.next_comment_id;
        let comment_type = match prepared.comment_type.as_deref() {
            None | Some("comment") => String::new(),
            Some(other) => other.to_string(),
        };
        let comment = Comment {
            id,
            post_id,
            parent: prepared.parent.unwrap_or(0),
            user_id: prepared.user_id.unwrap_or(0),
            author_name: prepared.author_name.clone().unwrap_or_default(),
            author_email: prepared.author_email.clone().unwrap_or_default(),
            author_url: prepared.author_url.clone().unwrap_or_default(),
            author_ip: prepared.author_ip.clone().unwrap_or_default(),
            agent: prepared.agent.clone().unwrap_or_default(),
            date: prepared.date.unwrap_or(now_local),
            date_gmt: prepared.date_gmt.unwrap_or(now_gmt),
            content: prepared.content.clone().unwrap_or_default(),
            approved: prepared.approved.unwrap_or(CommentApproval::Approved),
            comment_type,
        };
        self.next_comment_id += 1;
        self.comments.insert(id, comment);
        Ok(id)
    }

    fn update_comment(&mut self, prepared: &PreparedComment) -> Result<(), StoreError> {
        let id = prepared
            .id
            .ok_or_else(|| StoreError::Update("comment".to_string()))?;
        let comment = self
            .comments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("comment".to_string()))?;

        if let Some(post_id) = prepared.post_id {
            comment.post_id = post_id;
        }
        if let Some(parent) = prepared.parent {
            comment.parent = parent;
        }
        if let Some(user_id) = prepared.user_id {
            comment.user_id = user_id;
        }
        if let Some(name) = &prepared.author_name {
            comment.author_name.clone_from(name);
        }
        if let Some(email) = &prepared.author_email {
            comment.author_email.clone_from(email);
        }
        if let Some(url) = &prepared.author_url {
            comment.author_url.clone_from(url);
        }
        if let Some(ip) = &prepared.author_ip {
            comment.author_ip.clone_from(ip);
        }
        if let Some(agent) = &prepared.agent {
            comment.agent.clone_from(agent);
        }
        if let Some(date) = prepared.date {
            comment.date = date;
        }
        if let Some(gmt) = prepared.date_gmt {
            comment.date_gmt = gmt;
        }
        if let Some(content) = &prepared.content {
            comment.content.clone_from(content);
        }
        if let Some(approved) = prepared.approved {
            comment.approved = approved;
        }
        Ok(())
    }

    fn transition_comment(
        &mut self,
        id: u64,
        transition: StatusTransition,
    ) -> Result<bool, StoreError> {
        let current = self
            .comments
            .get(&id)
            .map(|c| c.approved)
            .ok_or_else(|| StoreError::NotFound("comment".to_string()))?;

        let target = match transition {
            StatusTransition::Approve => CommentApproval::Approved,
            StatusTransition::Hold => CommentApproval::Hold,
            StatusTransition::Spam => CommentApproval::Spam,
            StatusTransition::Trash => CommentApproval::Trash,
            StatusTransition::Unspam | StatusTransition::Untrash => {
                let leaving = if transition == StatusTransition::Unspam {
                    CommentApproval::Spam
                } else {
                    CommentApproval::Trash
                };
                if current != leaving {
                    return Ok(false);
                }
                self.comment_previous
                    .remove(&id)
                    .unwrap_or(CommentApproval::Hold)
            }
        };
        if target == current {
            return Ok(false);
        }
        if matches!(target, CommentApproval::Spam | CommentApproval::Trash) {
            self.comment_previous.insert(id, current);
        }
        if let Some(comment) = self.comments.get_mut(&id) {
            comment.approved = target;
        }
        Ok(true)
    }

    fn delete_comment(&mut self, id: u64) -> Result<Comment, StoreError> {
        let comment = self
            .comments
            .remove(&id)
            .ok_or_else(|| StoreError::Delete("comment".to_string()))?;
        for child in self.comments.values_mut().filter(|c| c.parent == id) {
            child.parent = comment.parent;
        }
        self.comment_previous.remove(&id);
        self.remove_meta_for(MetaObjectType::Comment, id);
        Ok(comment)
    }

    fn comment_has_children(&self, id: u64) -> bool {
        self.comments.values().any(|c| c.parent == id)
    }

    fn find_duplicate_comment(&self, prepared: &PreparedComment) -> Option<u64> {
        let post_id = prepared.post_id?;
        let parent = prepared.parent.unwrap_or(0);
        let name = prepared.author_name.as_deref().unwrap_or_default();
        let email = prepared.author_email.as_deref().unwrap_or_default();
        let content = prepared.content.as_deref().unwrap_or_default();
        self.comments
            .values()
            .find(|c| {
                c.post_id == post_id
                    && c.parent == parent
                    && c.approved != CommentApproval::Trash
                    && (c.author_name == name || (!email.is_empty() && c.author_email == email))
                    && c.content == content
            })
            .map(|c| c.id)
    }

    fn last_comment_time(&self, ip: &str, email: &str) -> Option<NaiveDateTime> {
        self.comments
            .values()
            .filter(|c| {
                (!ip.is_empty() && c.author_ip == ip)
                    || (!email.is_empty() && c.author_email == email)
            })
            .map(|c| c.date_gmt)
            .max()
    }
}

// =============================================================================
// TERMS, USERS, META
// =============================================================================

impl TermStore for MemoryStore {
    fn get_term(&self, id: u64) -> Option<Term> {
        self.terms.get(&id).cloned()
    }

    fn get_term_by_slug(&self, taxonomy: &str, slug: &str) -> Option<Term> {
        self.terms
            .values()
            .find(|t| t.taxonomy == taxonomy && t.slug == slug)
            .cloned()
    }

    fn insert_term(&mut self, taxonomy: &str, name: &str, slug: &str) -> Result<u64, StoreError> {
        let slug = if slug.is_empty() {
            sanitize_title(name)
        } else {
            slug.to_string()
        };
        if self.get_term_by_slug(taxonomy, &slug).is_some() {
            return Err(StoreError::Invalid {
                code: "term_exists".to_string(),
                message: "A term with the name provided already exists in this taxonomy."
                    .to_string(),
            });
        }
        let id = self.next_term_id;
        self.terms.insert(
            id,
            Term {
                id,
                taxonomy: taxonomy.to_string(),
                name: name.to_string(),
                slug,
                description: String::new(),
                parent: 0,
            },
        );
        self.next_term_id += 1;
        Ok(id)
    }

    fn object_terms(&self, object_id: u64, taxonomy: &str) -> Vec<Term> {
        let mut out: Vec<Term> = self
            .relationships
            .iter()
            .filter(|(object, _)| *object == object_id)
            .filter_map(|(_, term)| self.terms.get(term))
            .filter(|t| t.taxonomy == taxonomy)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn set_object_terms(
        &mut self,
        object_id: u64,
        taxonomy: &str,
        term_ids: &[u64],
    ) -> Result<(), StoreError> {
        for id in term_ids {
            if !self.terms.get(id).is_some_and(|t| t.taxonomy == taxonomy) {
                return Err(StoreError::Invalid {
                    code: "invalid_term".to_string(),
                    message: format!("Term {id} does not exist in {taxonomy}."),
                });
            }
        }
        let terms = &self.terms;
        self.relationships.retain(|(object, term)| {
            *object != object_id || !terms.get(term).is_some_and(|t| t.taxonomy == taxonomy)
        });
        for id in term_ids {
            self.relationships.insert((object_id, *id));
        }
        Ok(())
    }
}

impl UserStore for MemoryStore {
    fn get_user(&self, id: u64) -> Option<User> {
        self.users.get(&id).cloned()
    }
}

fn encode(value: &Value) -> String {
    value.to_string()
}

fn decode(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

impl MetaStore for MemoryStore {
    fn get_meta(&self, object_type: MetaObjectType, object_id: u64, key: &str) -> Vec<Value> {
        self.meta
            .iter()
            .filter(|r| r.object_type == object_type && r.object_id == object_id && r.key == key)
            .map(|r| decode(&r.value))
            .collect()
    }

    fn add_meta(
        &mut self,
        object_type: MetaObjectType,
        object_id: u64,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::Invalid {
                code: "meta_key_empty".to_string(),
                message: "Meta keys cannot be empty.".to_string(),
            });
        }
        self.meta.push(MetaRow {
            object_type,
            object_id,
            key: key.to_string(),
            value: encode(&value),
        });
        Ok(())
    }

    fn update_meta(
        &mut self,
        object_type: MetaObjectType,
        object_id: u64,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        self.delete_meta(object_type, object_id, key, None)?;
        self.add_meta(object_type, object_id, key, value)
    }

    fn delete_meta(
        &mut self,
        object_type: MetaObjectType,
        object_id: u64,
        key: &str,
        value: Option<&Value>,
    ) -> Result<(), StoreError> {
        match value {
            None => self.meta.retain(|r| {
                !(r.object_type == object_type && r.object_id == object_id && r.key == key)
            }),
            Some(value) => {
                let wanted = value_as_string(value);
                if let Some(index) = self.meta.iter().position(|r| {
                    r.object_type == object_type
                        && r.object_id == object_id
                        && r.key == key
                        && (decode(&r.value) == *value || value_as_string(&decode(&r.value)) == wanted)
                }) {
                    self.meta.remove(index);
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> NaiveDateTime {
        dates::parse_date(s).unwrap().naive
    }

    fn publish(store: &mut MemoryStore, title: &str, date: &str) -> u64 {
        store
            .insert_post(&PreparedPost {
                title: Some(title.into()),
                status: Some("publish".into()),
                date: Some(at(date)),
                date_gmt: Some(at(date)),
                ..PreparedPost::default()
            })
            .unwrap()
    }

    #[test]
    fn posts_paginate_with_found_total() {
        let mut store = MemoryStore::default();
        for day in 1..=5 {
            publish(&mut store, &format!("Post {day}"), &format!("2020-01-0{day}T00:00:00"));
        }
        let args = QueryArgs::new()
            .with("posts_per_page", json!(2))
            .with("paged", json!(2));
        let result = store.query_posts(&args);
        assert_eq!(result.found, 5);
        let titles: Vec<&str> = result.items.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Post 3", "Post 2"]);
    }

    #[test]
    fn huge_page_number_yields_empty_page() {
        let mut store = MemoryStore::default();
        publish(&mut store, "Only", "2020-01-01T00:00:00");
        let args = QueryArgs::new()
            .with("posts_per_page", json!(10))
            .with("paged", json!(i64::MAX));
        let result = store.query_posts(&args);
        assert_eq!(result.found, 1);
        assert!(result.items.is_empty());
    }

    #[test]
    fn drafts_float_and_get_no_slug() {
        let mut store = MemoryStore::default();
        let id = store
            .insert_post(&PreparedPost {
                title: Some("Hello".into()),
                ..PreparedPost::default()
            })
            .unwrap();
        let post = store.get_post(id).unwrap();
        assert_eq!(post.status, "draft");
        assert!(post.date_gmt.is_none());
        assert!(post.slug.is_empty());

        store
            .update_post(&PreparedPost {
                id: Some(id),
                status: Some("publish".into()),
                ..PreparedPost::default()
            })
            .unwrap();
        let post = store.get_post(id).unwrap();
        assert!(post.date_gmt.is_some());
        assert_eq!(post.slug, "hello");
    }

    #[test]
    fn slugs_are_unique_per_type() {
        let mut store = MemoryStore::default();
        let a = publish(&mut store, "Same", "2020-01-01T00:00:00");
        let b = publish(&mut store, "Same", "2020-01-02T00:00:00");
        assert_eq!(store.get_post(a).unwrap().slug, "same");
        assert_eq!(store.get_post(b).unwrap().slug, "same-2");
    }

    #[test]
    fn tax_and_date_filters() {
        let mut store = MemoryStore::default();
        let a = publish(&mut store, "A", "2020-01-01T00:00:00");
        let b = publish(&mut store, "B", "2020-06-01T00:00:00");
        let tag = store.insert_term("post_tag", "News", "").unwrap();
        store.set_object_terms(a, "post_tag", &[tag]).unwrap();

        let tagged = store.query_posts(&QueryArgs::new().with(
            "tax_query",
            json!([{"taxonomy": "post_tag", "field": "term_id", "terms": [tag]}]),
        ));
        assert_eq!(tagged.items.iter().map(|p| p.id).collect::<Vec<_>>(), vec![a]);

        let recent = store.query_posts(
            &QueryArgs::new().with("date_query", json!([{"after": "2020-03-01T00:00:00"}])),
        );
        assert_eq!(recent.items.iter().map(|p| p.id).collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn comment_transitions_report_changes() {
        let mut store = MemoryStore::default();
        let post = publish(&mut store, "A", "2020-01-01T00:00:00");
        let id = store
            .insert_comment(&PreparedComment {
                post_id: Some(post),
                content: Some("hi".into()),
                approved: Some(CommentApproval::Hold),
                ..PreparedComment::default()
            })
            .unwrap();

        assert!(store.transition_comment(id, StatusTransition::Approve).unwrap());
        assert!(!store.transition_comment(id, StatusTransition::Approve).unwrap());
        assert!(store.transition_comment(id, StatusTransition::Spam).unwrap());
        assert!(store.transition_comment(id, StatusTransition::Unspam).unwrap());
        assert_eq!(store.get_comment(id).unwrap().approved, CommentApproval::Approved);
        assert!(!store.transition_comment(id, StatusTransition::Untrash).unwrap());
    }

    #[test]
    fn deleting_a_post_cascades() {
        let mut store = MemoryStore::default();
        let post = publish(&mut store, "A", "2020-01-01T00:00:00");
        store
            .insert_comment(&PreparedComment {
                post_id: Some(post),
                content: Some("hi".into()),
                ..PreparedComment::default()
            })
            .unwrap();
        store
            .update_meta(MetaObjectType::Post, post, "mood", json!("calm"))
            .unwrap();
        store.delete_post(post).unwrap();
        assert_eq!(store.stats().comments, 0);
        assert_eq!(store.stats().meta, 0);
        assert!(store.delete_post(post).is_err());
    }

    #[test]
    fn meta_values_keep_their_json_type() {
        let mut store = MemoryStore::default();
        store
            .add_meta(MetaObjectType::User, 1, "tags", json!(["a", 2]))
            .unwrap();
        store.add_meta(MetaObjectType::User, 1, "tags", json!(3)).unwrap();
        assert_eq!(
            store.get_meta(MetaObjectType::User, 1, "tags"),
            vec![json!(["a", 2]), json!(3)]
        );
        store
            .delete_meta(MetaObjectType::User, 1, "tags", Some(&json!(3)))
            .unwrap();
        assert_eq!(store.get_meta(MetaObjectType::User, 1, "tags").len(), 1);
    }

    #[test]
    fn revisions_skip_unchanged_content() {
        let mut store = MemoryStore::default();
        let post = publish(&mut store, "A", "2020-01-01T00:00:00");
        let when = (at("2020-01-02T00:00:00"), at("2020-01-02T00:00:00"));
        assert!(store.save_revision(post, 1, when).unwrap().is_some());
        assert!(store.save_revision(post, 1, when).unwrap().is_none());
        assert_eq!(store.revisions(post).len(), 1);
    }
}

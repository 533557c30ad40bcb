//! # Capability Oracle
//!
//! Controllers never look at roles directly. They ask an [`Authorizer`]
//! whether the current user holds a capability, either a primitive one
//! (`edit_posts`) or a meta capability bound to an object (`edit_post` on a
//! given post) that the authorizer maps onto primitives.

use crate::model::{Comment, Post, Role, Term, User};
use crate::registry::{PostTypeCaps, Registry};
use std::sync::Arc;

/// A capability question.
#[derive(Debug, Clone, Copy)]
pub enum Cap<'a> {
    /// A primitive capability by name.
    Named(&'a str),
    ReadPost(&'a Post),
    EditPost(&'a Post),
    DeletePost(&'a Post),
    /// Editing a comment maps onto editing its post.
    EditComment {
        comment: &'a Comment,
        post: Option<&'a Post>,
    },
    AssignTerm(&'a Term),
}

/// Identity and capability source for one request.
pub trait Authorizer {
    /// Zero for anonymous callers.
    fn current_user_id(&self) -> u64;

    fn is_logged_in(&self) -> bool {
        self.current_user_id() != 0
    }

    fn user_can(&self, cap: Cap<'_>) -> bool;

    /// Status for authorization failures: 403 when logged in, 401 otherwise.
    fn required_code(&self) -> u16 {
        if self.is_logged_in() { 403 } else { 401 }
    }
}

/// Logged-out caller holding no capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Authorizer for Anonymous {
    fn current_user_id(&self) -> u64 {
        0
    }

    fn user_can(&self, _cap: Cap<'_>) -> bool {
        false
    }
}

// =============================================================================
// ROLE TABLE
// =============================================================================

const EDITOR_CAPS: &[&str] = &[
    "moderate_comments",
    "manage_categories",
    "upload_files",
    "unfiltered_html",
    "read",
    "edit_posts",
    "edit_others_posts",
    "edit_published_posts",
    "edit_private_posts",
    "publish_posts",
    "read_private_posts",
    "delete_posts",
    "delete_others_posts",
    "delete_published_posts",
    "delete_private_posts",
    "edit_pages",
    "edit_others_pages",
    "edit_published_pages",
    "edit_private_pages",
    "publish_pages",
    "read_private_pages",
    "delete_pages",
    "delete_others_pages",
    "delete_published_pages",
    "delete_private_pages",
];

const AUTHOR_CAPS: &[&str] = &[
    "upload_files",
    "read",
    "edit_posts",
    "edit_published_posts",
    "publish_posts",
    "delete_posts",
    "delete_published_posts",
];

const CONTRIBUTOR_CAPS: &[&str] = &["read", "edit_posts", "delete_posts"];

const SUBSCRIBER_CAPS: &[&str] = &["read"];

impl Role {
    /// Primitive capabilities granted by the role.
    #[must_use]
    pub fn has_cap(self, cap: &str) -> bool {
        match self {
            Self::Administrator => true,
            Self::Editor => EDITOR_CAPS.contains(&cap),
            Self::Author => AUTHOR_CAPS.contains(&cap),
            Self::Contributor => CONTRIBUTOR_CAPS.contains(&cap),
            Self::Subscriber => SUBSCRIBER_CAPS.contains(&cap),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "administrator" => Some(Self::Administrator),
            "editor" => Some(Self::Editor),
            "author" => Some(Self::Author),
            "contributor" => Some(Self::Contributor),
            "subscriber" => Some(Self::Subscriber),
            _ => None,
        }
    }
}

// =============================================================================
// ROLE AUTHORIZER
// =============================================================================

/// Role-based authorizer for a resolved user, or anonymous when `None`.
#[derive(Debug, Clone)]
pub struct RoleAuthorizer {
    user: Option<User>,
    registry: Arc<Registry>,
}

impl RoleAuthorizer {
    #[must_use]
    pub fn new(user: Option<User>, registry: Arc<Registry>) -> Self {
        Self { user, registry }
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    fn has_primitive(&self, cap: &str) -> bool {
        cap != "do_not_allow"
            && self
                .user
                .as_ref()
                .is_some_and(|u| u.roles.iter().any(|r| r.has_cap(cap)))
    }

    /// Map a meta capability onto the primitives that must all be held.
    fn map_meta(&self, cap: Cap<'_>) -> Vec<String> {
        let user_id = self.current_user_id();
        match cap {
            Cap::Named(name) => vec![name.to_string()],
            Cap::ReadPost(post) => {
                let caps = self.post_caps(post);
                let status = self.registry.post_status(&post.status);
                if status.is_some_and(|s| s.public) {
                    return vec![caps.read];
                }
                if user_id != 0 && post.author == user_id {
                    return vec![caps.read];
                }
                if status.is_some_and(|s| s.private) {
                    return vec![caps.read_private_posts];
                }
                self.map_meta(Cap::EditPost(post))
            }
            Cap::EditPost(post) => {
                let caps = self.post_caps(post);
                let published = matches!(post.status.as_str(), "publish" | "future");
                if user_id != 0 && post.author == user_id {
                    if published {
                        vec![caps.edit_published_posts]
                    } else {
                        vec![caps.edit_posts]
                    }
                } else {
                    let mut out = vec![caps.edit_others_posts];
                    if published {
                        out.push(caps.edit_published_posts);
                    } else if post.status == "private" {
                        out.push(caps.edit_private_posts);
                    }
                    out
                }
            }
            Cap::DeletePost(post) => {
                let caps = self.post_caps(post);
                let published = matches!(post.status.as_str(), "publish" | "future");
                if user_id != 0 && post.author == user_id {
                    if published {
                        vec![caps.delete_published_posts]
                    } else {
                        vec![caps.delete_posts]
                    }
                } else {
                    let mut out = vec![caps.delete_others_posts];
                    if published {
                        out.push(caps.delete_published_posts);
                    } else if post.status == "private" {
                        out.push(caps.delete_private_posts);
                    }
                    out
                }
            }
            Cap::EditComment { post: Some(post), .. } => self.map_meta(Cap::EditPost(post)),
            Cap::EditComment { post: None, .. } => vec!["edit_others_posts".to_string()],
            Cap::AssignTerm(term) => match self.registry.taxonomy(&term.taxonomy) {
                Some(tax) => vec![tax.caps.assign_terms.clone()],
                None => vec!["do_not_allow".to_string()],
            },
        }
    }

    fn post_caps(&self, post: &Post) -> PostTypeCaps {
        self.registry
            .post_type(&post.post_type)
            .or_else(|| self.registry.post_type("post"))
            .map_or_else(
                || PostTypeCaps::for_capability_type("post"),
                |pt| pt.caps.clone(),
            )
    }
}

impl Authorizer for RoleAuthorizer {
    fn current_user_id(&self) -> u64 {
        self.user.as_ref().map_or(0, |u| u.id)
    }

    fn user_can(&self, cap: Cap<'_>) -> bool {
        if self.user.is_none() {
            return false;
        }
        self.map_meta(cap).iter().all(|c| self.has_primitive(c))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::SiteOptions;
    use chrono::NaiveDateTime;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::with_defaults(SiteOptions::default()))
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

    fn post(author: u64, status: &str) -> Post {
        let now = NaiveDateTime::default();
        Post {
            id: 1,
            author,
            date: now,
            date_gmt: Some(now),
            content: String::new(),
            title: String::new(),
            excerpt: String::new(),
            status: status.to_string(),
            comment_status: "open".into(),
            ping_status: "open".into(),
            password: String::new(),
            slug: String::new(),
            modified: now,
            modified_gmt: now,
            parent: 0,
            guid: String::new(),
            menu_order: 0,
            post_type: "post".into(),
        }
    }

    #[test]
    fn anonymous_gets_401_and_no_caps() {
        let auth = RoleAuthorizer::new(None, registry());
        assert_eq!(auth.required_code(), 401);
        assert!(!auth.user_can(Cap::Named("read")));
        assert!(!auth.user_can(Cap::ReadPost(&post(1, "publish"))));
    }

    #[test]
    fn authors_edit_own_posts_only() {
        let auth = RoleAuthorizer::new(Some(user(2, Role::Author)), registry());
        assert_eq!(auth.required_code(), 403);
        assert!(auth.user_can(Cap::EditPost(&post(2, "draft"))));
        assert!(auth.user_can(Cap::EditPost(&post(2, "publish"))));
        assert!(!auth.user_can(Cap::EditPost(&post(3, "draft"))));
        assert!(!auth.user_can(Cap::Named("moderate_comments")));
    }

    #[test]
    fn contributors_cannot_touch_published_posts() {
        let auth = RoleAuthorizer::new(Some(user(4, Role::Contributor)), registry());
        assert!(auth.user_can(Cap::EditPost(&post(4, "draft"))));
        assert!(!auth.user_can(Cap::EditPost(&post(4, "publish"))));
        assert!(!auth.user_can(Cap::DeletePost(&post(4, "publish"))));
    }

    #[test]
    fn private_posts_need_read_private() {
        let editor = RoleAuthorizer::new(Some(user(5, Role::Editor)), registry());
        let subscriber = RoleAuthorizer::new(Some(user(6, Role::Subscriber)), registry());
        let private = post(1, "private");
        assert!(editor.user_can(Cap::ReadPost(&private)));
        assert!(!subscriber.user_can(Cap::ReadPost(&private)));
        assert!(subscriber.user_can(Cap::ReadPost(&post(1, "publish"))));
    }

    #[test]
    fn administrators_hold_everything() {
        let admin = RoleAuthorizer::new(Some(user(1, Role::Administrator)), registry());
        assert!(admin.user_can(Cap::Named("anything_at_all")));
        assert!(admin.user_can(Cap::DeletePost(&post(9, "private"))));
    }
}

//! # Content Items
//!
//! Records owned by the storage collaborator, and the prepared payloads
//! controllers hand back to it for writes.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// =============================================================================
// POSTS
// =============================================================================

/// A post of any type, revisions and attachments included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub author: u64,
    pub date: NaiveDateTime,
    /// `None` for drafts that never had a publication date fixed.
    pub date_gmt: Option<NaiveDateTime>,
    pub content: String,
    pub title: String,
    pub excerpt: String,
    pub status: String,
    pub comment_status: String,
    pub ping_status: String,
    pub password: String,
    pub slug: String,
    pub modified: NaiveDateTime,
    pub modified_gmt: NaiveDateTime,
    pub parent: u64,
    pub guid: String,
    pub menu_order: i64,
    pub post_type: String,
}

/// Mutation payload for a post. `None` fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedPost {
    pub id: Option<u64>,
    pub post_type: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub status: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub date_gmt: Option<NaiveDateTime>,
    pub slug: Option<String>,
    pub author: Option<u64>,
    pub password: Option<String>,
    pub parent: Option<u64>,
    pub menu_order: Option<i64>,
    pub comment_status: Option<String>,
    pub ping_status: Option<String>,
    /// Wall-clock time of the write as (local, gmt).
    pub written_at: Option<(NaiveDateTime, NaiveDateTime)>,
}

// =============================================================================
// COMMENTS
// =============================================================================

/// Stored moderation state of a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommentApproval {
    Approved,
    Hold,
    Spam,
    Trash,
}

impl CommentApproval {
    /// Public status token used in responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Hold => "hold",
            Self::Spam => "spam",
            Self::Trash => "trash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub post_id: u64,
    pub parent: u64,
    pub user_id: u64,
    pub author_name: String,
    pub author_email: String,
    pub author_url: String,
    pub author_ip: String,
    pub agent: String,
    pub date: NaiveDateTime,
    pub date_gmt: NaiveDateTime,
    pub content: String,
    pub approved: CommentApproval,
    /// Empty string for regular comments.
    pub comment_type: String,
}

impl Comment {
    /// Public type token: stored `""` reads as `comment`.
    #[must_use]
    pub fn type_name(&self) -> &str {
        if self.comment_type.is_empty() {
            "comment"
        } else {
            &self.comment_type
        }
    }
}

/// Mutation payload for a comment. `None` fields are left as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedComment {
    pub id: Option<u64>,
    pub post_id: Option<u64>,
    pub parent: Option<u64>,
    pub user_id: Option<u64>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_url: Option<String>,
    pub author_ip: Option<String>,
    pub agent: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub date_gmt: Option<NaiveDateTime>,
    pub content: Option<String>,
    pub comment_type: Option<String>,
    pub approved: Option<CommentApproval>,
}

impl PreparedComment {
    /// True when nothing but the id is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self
            == Self {
                id: self.id,
                ..Self::default()
            }
    }
}

/// Moderation transitions reachable through the public status tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTransition {
    Approve,
    Hold,
    Spam,
    Unspam,
    Trash,
    Untrash,
}

impl StatusTransition {
    /// `approved`/`approve`/`1`, `hold`/`0`, `spam`, `unspam`, `trash`,
    /// `untrash`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "approved" | "approve" | "1" => Some(Self::Approve),
            "hold" | "0" => Some(Self::Hold),
            "spam" => Some(Self::Spam),
            "unspam" => Some(Self::Unspam),
            "trash" => Some(Self::Trash),
            "untrash" => Some(Self::Untrash),
            _ => None,
        }
    }
}

// =============================================================================
// TERMS & USERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: u64,
    pub taxonomy: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Editor,
    Author,
    Contributor,
    Subscriber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
    pub display_name: String,
    pub slug: String,
    pub email: String,
    pub url: String,
    pub roles: Vec<Role>,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_tokens_parse_to_transitions() {
        assert_eq!(StatusTransition::parse("approved"), Some(StatusTransition::Approve));
        assert_eq!(StatusTransition::parse("1"), Some(StatusTransition::Approve));
        assert_eq!(StatusTransition::parse("0"), Some(StatusTransition::Hold));
        assert_eq!(StatusTransition::parse("untrash"), Some(StatusTransition::Untrash));
        assert_eq!(StatusTransition::parse("published"), None);
    }

    #[test]
    fn prepared_comment_emptiness_ignores_id() {
        let only_id = PreparedComment {
            id: Some(3),
            ..PreparedComment::default()
        };
        assert!(only_id.is_empty());
        let with_content = PreparedComment {
            content: Some("hi".into()),
            ..only_id
        };
        assert!(!with_content.is_empty());
    }
}

//! Posts, comments and interactions.

use serde::{Deserialize, Serialize};

use crate::ids::{CircleId, CommentId, PostId};

/// Longest accepted post title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Longest accepted post or comment body, in characters.
pub const MAX_CONTENT_LEN: usize = 10_000;

/// Reaction to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Like,
    Dislike,
    Share,
}

impl InteractionKind {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
            Self::Share => "share",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            "share" => Some(Self::Share),
            _ => None,
        }
    }
}

/// A post in a circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: PostId,
    pub circle_id: CircleId,
    pub author: String,
    pub title: Option<String>,
    pub content: String,
    /// Pinned posts list before all others.
    pub pinned: bool,
    pub like_count: i64,
    pub dislike_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub created_at: i64,
}

/// Parameters for a new post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
}

impl NewPost {
    /// Creates an untitled post.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: content.into(),
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A comment on a post, optionally replying to another comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub circle_id: CircleId,
    pub author: String,
    pub content: String,
    pub parent_comment_id: Option<CommentId>,
    pub created_at: i64,
}

/// Result of an interaction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    /// The interaction was recorded and the counter moved.
    Recorded,
    /// The interaction already existed (or was already absent); nothing changed.
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_kind_parse() {
        assert_eq!(InteractionKind::parse("like"), Some(InteractionKind::Like));
        assert_eq!(
            InteractionKind::parse("dislike"),
            Some(InteractionKind::Dislike)
        );
        assert_eq!(InteractionKind::parse("share"), Some(InteractionKind::Share));
        assert_eq!(InteractionKind::parse("love"), None);
    }

    #[test]
    fn new_post_builder() {
        let post = NewPost::new("gm").with_title("hello");
        assert_eq!(post.title.as_deref(), Some("hello"));
        assert_eq!(post.content, "gm");
    }
}

//! Post, comment and interaction tracking.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};

use super::types::{
    Comment, InteractionKind, InteractionOutcome, NewPost, Post, MAX_CONTENT_LEN, MAX_TITLE_LEN,
};
use crate::activity::{self, ActivityKind};
use crate::circle::roles::{ensure_readable, require_on};
use crate::circle::{Capability, CircleError, Page, Result};
use crate::clock::Clock;
use crate::config::ScoringWeights;
use crate::ids::{CircleId, CommentId, PostId};
use crate::leaderboard::recompute_on;
use crate::storage::{self, CircleStorage};

fn validate_body(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(CircleError::InvalidData("content cannot be empty".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(CircleError::InvalidData(format!(
            "content exceeds {MAX_CONTENT_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_post(post: &NewPost) -> Result<()> {
    validate_body(&post.content)?;
    if let Some(title) = &post.title {
        if title.trim().is_empty() {
            return Err(CircleError::InvalidData("title cannot be blank".to_string()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(CircleError::InvalidData(format!(
                "title exceeds {MAX_TITLE_LEN} characters"
            )));
        }
    }
    Ok(())
}

fn load_post(conn: &Connection, post_id: &PostId) -> Result<Post> {
    storage::content::get_post(conn, post_id)?
        .ok_or_else(|| CircleError::NotFound(format!("post {post_id}")))
}

/// Records posts, comments and reactions and keeps leaderboard entries in
/// step with them.
pub struct ContentInteractionTracker {
    storage: Arc<CircleStorage>,
    clock: Arc<dyn Clock>,
    weights: ScoringWeights,
    max_page_size: u32,
}

impl ContentInteractionTracker {
    /// Creates a tracker.
    #[must_use]
    pub fn new(
        storage: Arc<CircleStorage>,
        clock: Arc<dyn Clock>,
        weights: ScoringWeights,
        max_page_size: u32,
    ) -> Self {
        Self {
            storage,
            clock,
            weights,
            max_page_size,
        }
    }

    // ==================== Posts ====================

    /// Publishes a post.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] for empty or oversized input
    /// and [`CircleError::Forbidden`] unless `author` can post.
    pub fn create_post(&self, circle_id: &CircleId, author: &str, new_post: NewPost) -> Result<Post> {
        validate_post(&new_post)?;
        let now = self.clock.now();
        let post = Post {
            id: PostId::generate(),
            circle_id: circle_id.clone(),
            author: author.to_string(),
            title: new_post.title,
            content: new_post.content,
            pinned: false,
            like_count: 0,
            dislike_count: 0,
            comment_count: 0,
            share_count: 0,
            created_at: now,
        };

        self.storage.write(|tx| {
            require_on(tx, circle_id, author, Capability::Post)?;
            storage::content::insert_post(tx, &post)?;
            activity::record(tx, circle_id, author, ActivityKind::Posted, Some(post.id.as_str()), now)?;
            recompute_on(tx, &self.weights, circle_id, author, now)?;
            Ok(())
        })?;

        info!(circle_id = %circle_id, post_id = %post.id, author, "post created");
        Ok(post)
    }

    /// Pins or unpins a post.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown post and
    /// [`CircleError::Forbidden`] unless `acting` can moderate.
    pub fn pin_post(&self, acting: &str, post_id: &PostId, pinned: bool) -> Result<Post> {
        let now = self.clock.now();
        self.storage.write(|tx| {
            let mut post = load_post(tx, post_id)?;
            require_on(tx, &post.circle_id, acting, Capability::Moderate)?;
            storage::content::set_pinned(tx, post_id, pinned)?;
            if post.pinned != pinned {
                activity::record(
                    tx,
                    &post.circle_id,
                    acting,
                    ActivityKind::PostPinned,
                    Some(post_id.as_str()),
                    now,
                )?;
            }
            post.pinned = pinned;
            Ok(post)
        })
    }

    /// Deletes a post with its comments and interactions.
    ///
    /// Authors who are still active members may delete their own posts;
    /// anyone else needs `can_moderate`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown post and
    /// [`CircleError::Forbidden`] for authors who left and for other
    /// callers without moderation rights.
    pub fn delete_post(&self, acting: &str, post_id: &PostId) -> Result<()> {
        let now = self.clock.now();
        let post = self.storage.write(|tx| {
            let post = load_post(tx, post_id)?;
            if post.author != acting {
                require_on(tx, &post.circle_id, acting, Capability::Moderate)?;
            } else if storage::memberships::get_active(tx, &post.circle_id, acting)?.is_none() {
                return Err(CircleError::Forbidden(format!(
                    "{acting} is not a member of circle {}",
                    post.circle_id
                )));
            }
            let commenters = storage::content::comment_authors(tx, post_id)?;
            storage::content::delete_post(tx, post_id)?;
            activity::record(
                tx,
                &post.circle_id,
                acting,
                ActivityKind::PostDeleted,
                Some(post_id.as_str()),
                now,
            )?;

            recompute_on(tx, &self.weights, &post.circle_id, &post.author, now)?;
            for commenter in commenters.iter().filter(|c| **c != post.author) {
                recompute_on(tx, &self.weights, &post.circle_id, commenter, now)?;
            }
            Ok(post)
        })?;

        info!(circle_id = %post.circle_id, post_id = %post_id, acting, "post deleted");
        Ok(())
    }

    /// Fetches a post visible to `viewer`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown post and
    /// [`CircleError::Forbidden`] for non-members of a private circle.
    pub fn get_post(&self, viewer: &str, post_id: &PostId) -> Result<Post> {
        self.storage.read(|conn| {
            let post = load_post(conn, post_id)?;
            ensure_readable(conn, &post.circle_id, viewer)?;
            Ok(post)
        })
    }

    /// Posts of a circle, pinned first, then newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle and
    /// [`CircleError::Forbidden`] for non-members of a private circle.
    pub fn list_posts(&self, viewer: &str, circle_id: &CircleId, page: Page) -> Result<Vec<Post>> {
        let page = page.clamped(self.max_page_size);
        self.storage.read(|conn| {
            ensure_readable(conn, circle_id, viewer)?;
            storage::content::list_posts(conn, circle_id, page)
        })
    }

    // ==================== Comments ====================

    /// Comments on a post.
    ///
    /// `parent`, when given, must be a comment on the same post.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown post or parent,
    /// [`CircleError::InvalidData`] for bad content or a parent on another
    /// post, and [`CircleError::Forbidden`] unless `author` can comment.
    pub fn add_comment(
        &self,
        post_id: &PostId,
        author: &str,
        content: &str,
        parent: Option<&CommentId>,
    ) -> Result<Comment> {
        validate_body(content)?;
        let now = self.clock.now();

        let comment = self.storage.write(|tx| {
            let post = load_post(tx, post_id)?;
            require_on(tx, &post.circle_id, author, Capability::Comment)?;

            if let Some(parent_id) = parent {
                let parent_comment = storage::content::get_comment(tx, parent_id)?
                    .ok_or_else(|| CircleError::NotFound(format!("comment {parent_id}")))?;
                if parent_comment.post_id != *post_id {
                    return Err(CircleError::InvalidData(format!(
                        "comment {parent_id} belongs to another post"
                    )));
                }
            }

            let comment = Comment {
                id: CommentId::generate(),
                post_id: post_id.clone(),
                circle_id: post.circle_id.clone(),
                author: author.to_string(),
                content: content.to_string(),
                parent_comment_id: parent.cloned(),
                created_at: now,
            };
            storage::content::insert_comment(tx, &comment)?;
            activity::record(
                tx,
                &post.circle_id,
                author,
                ActivityKind::Commented,
                Some(post_id.as_str()),
                now,
            )?;
            recompute_on(tx, &self.weights, &post.circle_id, author, now)?;
            Ok(comment)
        })?;

        debug!(post_id = %post_id, comment_id = %comment.id, author, "comment added");
        Ok(comment)
    }

    /// Comments on a post, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown post and
    /// [`CircleError::Forbidden`] for non-members of a private circle.
    pub fn list_comments(&self, viewer: &str, post_id: &PostId, page: Page) -> Result<Vec<Comment>> {
        let page = page.clamped(self.max_page_size);
        self.storage.read(|conn| {
            let post = load_post(conn, post_id)?;
            ensure_readable(conn, &post.circle_id, viewer)?;
            storage::content::list_comments(conn, post_id, page)
        })
    }

    // ==================== Interactions ====================

    /// Records a like, dislike or share.
    ///
    /// Repeating the same interaction changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown post and
    /// [`CircleError::Forbidden`] unless `identity` can comment.
    pub fn interact(
        &self,
        post_id: &PostId,
        identity: &str,
        kind: InteractionKind,
    ) -> Result<InteractionOutcome> {
        let now = self.clock.now();
        self.storage.write(|tx| {
            let post = load_post(tx, post_id)?;
            require_on(tx, &post.circle_id, identity, Capability::Comment)?;
            if !storage::content::insert_interaction(tx, post_id, identity, kind, now)? {
                return Ok(InteractionOutcome::Unchanged);
            }
            activity::record(
                tx,
                &post.circle_id,
                identity,
                ActivityKind::Interacted,
                Some(post_id.as_str()),
                now,
            )?;
            self.recompute_pair(tx, &post, identity, now)?;
            Ok(InteractionOutcome::Recorded)
        })
    }

    /// Withdraws an interaction.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown post and
    /// [`CircleError::Forbidden`] unless `identity` can comment.
    pub fn remove_interaction(
        &self,
        post_id: &PostId,
        identity: &str,
        kind: InteractionKind,
    ) -> Result<InteractionOutcome> {
        let now = self.clock.now();
        self.storage.write(|tx| {
            let post = load_post(tx, post_id)?;
            require_on(tx, &post.circle_id, identity, Capability::Comment)?;
            if !storage::content::delete_interaction(tx, post_id, identity, kind)? {
                return Ok(InteractionOutcome::Unchanged);
            }
            self.recompute_pair(tx, &post, identity, now)?;
            Ok(InteractionOutcome::Recorded)
        })
    }

    /// Whether `identity` has an interaction of `kind` on a post.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn has_interacted(&self, post_id: &PostId, identity: &str, kind: InteractionKind) -> Result<bool> {
        self.storage
            .read(|conn| storage::content::has_interaction(conn, post_id, identity, kind))
    }

    fn recompute_pair(&self, conn: &Connection, post: &Post, actor: &str, now: i64) -> Result<()> {
        recompute_on(conn, &self.weights, &post.circle_id, &post.author, now)?;
        if actor != post.author {
            recompute_on(conn, &self.weights, &post.circle_id, actor, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circle::{roles, Role};
    use crate::clock::ManualClock;
    use crate::storage::{leaderboard, memberships};

    fn setup(visibility: &str) -> (Arc<CircleStorage>, ContentInteractionTracker, CircleId) {
        let storage = Arc::new(CircleStorage::in_memory().unwrap());
        let circle = CircleId::new("c1");
        storage
            .write(|tx| {
                tx.execute(
                    "INSERT INTO circles (id, name, slug, creator, visibility, created_at, updated_at) VALUES ('c1', 'C', 'c', 'alice', ?1, 0, 0)",
                    [visibility],
                )?;
                roles::seed_defaults(tx, &circle)?;
                memberships::activate(tx, &circle, "alice", Role::Admin, 0)?;
                memberships::activate(tx, &circle, "bob", Role::Member, 0)?;
                memberships::activate(tx, &circle, "vic", Role::Viewer, 0)?;
                memberships::activate(tx, &circle, "mod", Role::Moderator, 0)?;
                Ok(())
            })
            .unwrap();
        let tracker = ContentInteractionTracker::new(
            Arc::clone(&storage),
            Arc::new(ManualClock::new(1_000)),
            ScoringWeights::default(),
            100,
        );
        (storage, tracker, circle)
    }

    fn points(storage: &CircleStorage, circle: &CircleId, member: &str) -> i64 {
        storage
            .read(|conn| leaderboard::get_entry(conn, circle, member))
            .unwrap()
            .map_or(0, |entry| entry.points)
    }

    #[test]
    fn viewer_cannot_post() {
        let (_storage, tracker, circle) = setup("public");
        let err = tracker
            .create_post(&circle, "vic", NewPost::new("hello"))
            .unwrap_err();
        assert!(matches!(err, CircleError::Forbidden(_)));
    }

    #[test]
    fn post_validation() {
        let (_storage, tracker, circle) = setup("public");
        assert!(matches!(
            tracker.create_post(&circle, "bob", NewPost::new("   ")),
            Err(CircleError::InvalidData(_))
        ));
        let long_title = "t".repeat(MAX_TITLE_LEN + 1);
        assert!(matches!(
            tracker.create_post(&circle, "bob", NewPost::new("ok").with_title(long_title)),
            Err(CircleError::InvalidData(_))
        ));
        let long_body = "b".repeat(MAX_CONTENT_LEN + 1);
        assert!(matches!(
            tracker.create_post(&circle, "bob", NewPost::new(long_body)),
            Err(CircleError::InvalidData(_))
        ));
    }

    #[test]
    fn posting_awards_points() {
        let (storage, tracker, circle) = setup("public");
        tracker
            .create_post(&circle, "bob", NewPost::new("gm"))
            .unwrap();
        assert_eq!(points(&storage, &circle, "bob"), 10);
    }

    #[test]
    fn comments_count_and_nest() {
        let (storage, tracker, circle) = setup("public");
        let post = tracker
            .create_post(&circle, "alice", NewPost::new("gm"))
            .unwrap();
        let top = tracker.add_comment(&post.id, "bob", "first", None).unwrap();
        let reply = tracker
            .add_comment(&post.id, "alice", "reply", Some(&top.id))
            .unwrap();
        assert_eq!(reply.parent_comment_id, Some(top.id.clone()));

        let stored = tracker.get_post("bob", &post.id).unwrap();
        assert_eq!(stored.comment_count, 2);
        assert_eq!(points(&storage, &circle, "bob"), 5);
        assert_eq!(points(&storage, &circle, "alice"), 15);

        let comments = tracker
            .list_comments("bob", &post.id, Page::default())
            .unwrap();
        assert_eq!(comments.len(), 2);
    }

    #[test]
    fn parent_must_share_the_post() {
        let (_storage, tracker, circle) = setup("public");
        let first = tracker
            .create_post(&circle, "alice", NewPost::new("one"))
            .unwrap();
        let second = tracker
            .create_post(&circle, "alice", NewPost::new("two"))
            .unwrap();
        let comment = tracker.add_comment(&first.id, "bob", "hi", None).unwrap();

        let err = tracker
            .add_comment(&second.id, "bob", "hi", Some(&comment.id))
            .unwrap_err();
        assert!(matches!(err, CircleError::InvalidData(_)));
    }

    #[test]
    fn likes_are_idempotent_and_credit_the_author() {
        let (storage, tracker, circle) = setup("public");
        let post = tracker
            .create_post(&circle, "alice", NewPost::new("gm"))
            .unwrap();

        assert_eq!(
            tracker
                .interact(&post.id, "bob", InteractionKind::Like)
                .unwrap(),
            InteractionOutcome::Recorded
        );
        assert_eq!(
            tracker
                .interact(&post.id, "bob", InteractionKind::Like)
                .unwrap(),
            InteractionOutcome::Unchanged
        );
        assert_eq!(tracker.get_post("bob", &post.id).unwrap().like_count, 1);
        assert_eq!(points(&storage, &circle, "alice"), 12);

        tracker
            .remove_interaction(&post.id, "bob", InteractionKind::Like)
            .unwrap();
        assert_eq!(tracker.get_post("bob", &post.id).unwrap().like_count, 0);
        assert_eq!(points(&storage, &circle, "alice"), 10);
        assert!(!tracker
            .has_interacted(&post.id, "bob", InteractionKind::Like)
            .unwrap());
    }

    #[test]
    fn viewer_cannot_interact() {
        let (_storage, tracker, circle) = setup("public");
        let post = tracker
            .create_post(&circle, "alice", NewPost::new("gm"))
            .unwrap();
        let err = tracker
            .interact(&post.id, "vic", InteractionKind::Share)
            .unwrap_err();
        assert!(matches!(err, CircleError::Forbidden(_)));
    }

    #[test]
    fn pinned_posts_list_first() {
        let (_storage, tracker, circle) = setup("public");
        let old = tracker
            .create_post(&circle, "bob", NewPost::new("old"))
            .unwrap();
        tracker
            .create_post(&circle, "bob", NewPost::new("new"))
            .unwrap();

        assert!(matches!(
            tracker.pin_post("bob", &old.id, true),
            Err(CircleError::Forbidden(_))
        ));
        tracker.pin_post("mod", &old.id, true).unwrap();

        let posts = tracker.list_posts("zed", &circle, Page::default()).unwrap();
        assert_eq!(posts[0].id, old.id);
        assert!(posts[0].pinned);
    }

    #[test]
    fn delete_post_rules() {
        let (storage, tracker, circle) = setup("public");
        let post = tracker
            .create_post(&circle, "bob", NewPost::new("gm"))
            .unwrap();
        tracker.add_comment(&post.id, "alice", "nice", None).unwrap();

        assert!(matches!(
            tracker.delete_post("vic", &post.id),
            Err(CircleError::Forbidden(_))
        ));
        tracker.delete_post("bob", &post.id).unwrap();

        assert!(matches!(
            tracker.get_post("bob", &post.id),
            Err(CircleError::NotFound(_))
        ));
        assert_eq!(points(&storage, &circle, "bob"), 0);
        assert_eq!(points(&storage, &circle, "alice"), 0);
    }

    #[test]
    fn former_author_cannot_delete_after_leaving() {
        let (storage, tracker, circle) = setup("public");
        let post = tracker
            .create_post(&circle, "bob", NewPost::new("gm"))
            .unwrap();
        storage
            .write(|tx| memberships::deactivate(tx, &circle, "bob"))
            .unwrap();

        assert!(matches!(
            tracker.delete_post("bob", &post.id),
            Err(CircleError::Forbidden(_))
        ));
        tracker.delete_post("mod", &post.id).unwrap();
    }

    #[test]
    fn private_posts_hidden_from_outsiders() {
        let (_storage, tracker, circle) = setup("private");
        let post = tracker
            .create_post(&circle, "bob", NewPost::new("secret"))
            .unwrap();
        assert!(matches!(
            tracker.get_post("zed", &post.id),
            Err(CircleError::Forbidden(_))
        ));
        assert!(matches!(
            tracker.list_posts("zed", &circle, Page::default()),
            Err(CircleError::Forbidden(_))
        ));
        assert_eq!(
            tracker
                .list_posts("vic", &circle, Page::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn unknown_post_is_not_found() {
        let (_storage, tracker, _) = setup("public");
        let err = tracker
            .interact(&PostId::new("nope"), "bob", InteractionKind::Like)
            .unwrap_err();
        assert!(matches!(err, CircleError::NotFound(_)));
    }
}

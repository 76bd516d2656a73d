//! Points-based leaderboard.
//!
//! Points are never incremented in place. Every recomputation derives them
//! from the content tables through [`ScoringWeights`], so recomputing twice
//! with unchanged content yields the same entry.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::circle::roles::{ensure_readable, require_on};
use crate::circle::{Capability, CircleError, Result};
use crate::clock::Clock;
use crate::config::ScoringWeights;
use crate::ids::CircleId;
use crate::storage::{self, CircleStorage};

/// Derived score of one member in one circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub circle_id: CircleId,
    pub member: String,
    pub points: i64,
    pub post_count: i64,
    pub comment_count: i64,
    pub likes_received: i64,
    /// Unix timestamp of the last recomputation.
    pub last_updated: i64,
}

/// A leaderboard entry with its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
    /// 1-based rank among active members.
    pub rank: u64,
    /// Join time used as the first tiebreak.
    pub joined_at: i64,
}

/// Recomputes and stores the entry of `member` on an open transaction.
pub(crate) fn recompute_on(
    conn: &Connection,
    weights: &ScoringWeights,
    circle_id: &CircleId,
    member: &str,
    now: i64,
) -> Result<LeaderboardEntry> {
    let counts = storage::content::author_counts(conn, circle_id, member)?;
    let entry = LeaderboardEntry {
        circle_id: circle_id.clone(),
        member: member.to_string(),
        points: weights.score(counts.posts, counts.comments, counts.likes_received),
        post_count: counts.posts,
        comment_count: counts.comments,
        likes_received: counts.likes_received,
        last_updated: now,
    };
    storage::leaderboard::upsert_entry(conn, &entry)?;
    Ok(entry)
}

/// Computes, stores and ranks leaderboard entries.
pub struct LeaderboardEngine {
    storage: Arc<CircleStorage>,
    clock: Arc<dyn Clock>,
    weights: ScoringWeights,
    max_page_size: u32,
}

impl LeaderboardEngine {
    /// Creates an engine scoring with `weights`.
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

    /// Scoring weights in use.
    #[must_use]
    pub const fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Recomputes the points of `identity` from current content counts.
    ///
    /// Members may recompute their own entry. Recomputing someone else's
    /// needs `can_moderate`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle or an
    /// identity that never joined it, and [`CircleError::Forbidden`] when
    /// `acting` may not recompute `identity`.
    pub fn recompute_points(
        &self,
        acting: &str,
        circle_id: &CircleId,
        identity: &str,
    ) -> Result<LeaderboardEntry> {
        let now = self.clock.now();
        let entry = self.storage.write(|tx| {
            if storage::circles::get_circle(tx, circle_id)?.is_none() {
                return Err(CircleError::NotFound(format!("circle {circle_id}")));
            }
            if acting != identity {
                require_on(tx, circle_id, acting, Capability::Moderate)?;
            }
            if storage::memberships::get(tx, circle_id, identity)?.is_none() {
                return Err(CircleError::NotFound(format!(
                    "{identity} has never joined circle {circle_id}"
                )));
            }
            recompute_on(tx, &self.weights, circle_id, identity, now)
        })?;
        debug!(circle_id = %circle_id, identity, points = entry.points, "recomputed points");
        Ok(entry)
    }

    /// Top `limit` active members, as seen by `viewer`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle and
    /// [`CircleError::Forbidden`] for non-members of a private circle.
    pub fn leaderboard(
        &self,
        viewer: &str,
        circle_id: &CircleId,
        limit: u32,
    ) -> Result<Vec<RankedEntry>> {
        let limit = limit.clamp(1, self.max_page_size);
        self.storage.read(|conn| {
            ensure_readable(conn, circle_id, viewer)?;
            storage::leaderboard::top_entries(conn, circle_id, limit)
        })
    }

    /// Entry and rank of one member.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] if `identity` is not an active
    /// member of the circle, and [`CircleError::Forbidden`] for non-member
    /// viewers of a private circle.
    pub fn rank(&self, viewer: &str, circle_id: &CircleId, identity: &str) -> Result<RankedEntry> {
        self.storage
            .read(|conn| {
                ensure_readable(conn, circle_id, viewer)?;
                storage::leaderboard::rank_of(conn, circle_id, identity)
            })?
            .ok_or_else(|| {
                CircleError::NotFound(format!("{identity} is not ranked in circle {circle_id}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circle::Role;
    use crate::clock::ManualClock;
    use crate::content::{InteractionKind, Post};
    use crate::ids::PostId;
    use crate::storage::memberships;

    fn create_test_post(id: &str, author: &str) -> Post {
        Post {
            id: PostId::new(id),
            circle_id: CircleId::new("c1"),
            author: author.to_string(),
            title: None,
            content: "hello".to_string(),
            pinned: false,
            like_count: 0,
            dislike_count: 0,
            comment_count: 0,
            share_count: 0,
            created_at: 1,
        }
    }

    fn setup() -> (Arc<CircleStorage>, LeaderboardEngine, CircleId) {
        let storage = Arc::new(CircleStorage::in_memory().unwrap());
        let circle = CircleId::new("c1");
        storage
            .write(|tx| {
                tx.execute(
                    "INSERT INTO circles (id, name, slug, creator, created_at, updated_at) VALUES ('c1', 'C', 'c', 'alice', 0, 0)",
                    [],
                )?;
                crate::circle::roles::seed_defaults(tx, &circle)?;
                memberships::activate(tx, &circle, "alice", Role::Admin, 1)?;
                memberships::activate(tx, &circle, "bob", Role::Member, 2)?;
                storage::content::insert_post(tx, &create_test_post("p1", "alice"))?;
                storage::content::insert_post(tx, &create_test_post("p2", "alice"))?;
                storage::content::insert_interaction(tx, &PostId::new("p1"), "bob", InteractionKind::Like, 3)?;
                Ok(())
            })
            .unwrap();
        let engine = LeaderboardEngine::new(
            Arc::clone(&storage),
            Arc::new(ManualClock::new(10)),
            ScoringWeights::default(),
            100,
        );
        (storage, engine, circle)
    }

    #[test]
    fn recompute_uses_weights() {
        let (_storage, engine, circle) = setup();
        let entry = engine.recompute_points("alice", &circle, "alice").unwrap();
        assert_eq!(entry.post_count, 2);
        assert_eq!(entry.likes_received, 1);
        assert_eq!(entry.points, 2 * 10 + 2);
    }

    #[test]
    fn recompute_is_idempotent() {
        let (_storage, engine, circle) = setup();
        let first = engine.recompute_points("alice", &circle, "alice").unwrap();
        let second = engine.recompute_points("alice", &circle, "alice").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn custom_weights_change_points() {
        let (storage, _, circle) = setup();
        let weights = ScoringWeights {
            post: 1,
            comment: 1,
            like: 100,
        };
        let engine = LeaderboardEngine::new(storage, Arc::new(ManualClock::new(10)), weights, 100);
        let entry = engine.recompute_points("alice", &circle, "alice").unwrap();
        assert_eq!(entry.points, 102);
    }

    #[test]
    fn leaderboard_orders_by_points() {
        let (_storage, engine, circle) = setup();
        engine.recompute_points("alice", &circle, "alice").unwrap();
        engine.recompute_points("bob", &circle, "bob").unwrap();

        let board = engine.leaderboard("alice", &circle, 10).unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].entry.member, "alice");
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].entry.member, "bob");
        assert_eq!(board[1].entry.points, 0);
    }

    #[test]
    fn rank_of_non_member_is_not_found() {
        let (_storage, engine, circle) = setup();
        let err = engine.rank("alice", &circle, "mallory").unwrap_err();
        assert!(matches!(err, CircleError::NotFound(_)));
    }

    #[test]
    fn unknown_circle_is_not_found() {
        let (_storage, engine, _) = setup();
        let err = engine
            .recompute_points("alice", &CircleId::new("nope"), "alice")
            .unwrap_err();
        assert!(matches!(err, CircleError::NotFound(_)));
    }

    #[test]
    fn recompute_requires_a_membership_row() {
        let (storage, engine, circle) = setup();
        let err = engine
            .recompute_points("alice", &circle, "ghost")
            .unwrap_err();
        assert!(matches!(err, CircleError::NotFound(_)));
        let row = storage
            .read(|conn| storage::leaderboard::get_entry(conn, &circle, "ghost"))
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn recompute_for_others_needs_moderation() {
        let (_storage, engine, circle) = setup();
        let err = engine
            .recompute_points("bob", &circle, "alice")
            .unwrap_err();
        assert!(matches!(err, CircleError::Forbidden(_)));
        assert_eq!(
            engine.recompute_points("alice", &circle, "bob").unwrap().member,
            "bob"
        );
    }

    #[test]
    fn recompute_keeps_working_for_former_members() {
        let (storage, engine, circle) = setup();
        storage
            .write(|tx| memberships::deactivate(tx, &circle, "bob"))
            .unwrap();
        assert!(engine.recompute_points("bob", &circle, "bob").is_ok());
    }

    #[test]
    fn private_board_hidden_from_outsiders() {
        let (storage, engine, circle) = setup();
        storage
            .write(|tx| {
                tx.execute("UPDATE circles SET visibility = 'private' WHERE id = 'c1'", [])?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            engine.leaderboard("mallory", &circle, 10),
            Err(CircleError::Forbidden(_))
        ));
        assert!(matches!(
            engine.rank("mallory", &circle, "alice"),
            Err(CircleError::Forbidden(_))
        ));
        assert_eq!(engine.leaderboard("bob", &circle, 10).unwrap().len(), 2);
    }
}

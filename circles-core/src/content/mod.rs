//! Posts, comments and reactions inside circles.
//!
//! Every successful mutation recomputes the leaderboard entries it
//! affects in the same transaction.

mod tracker;
mod types;

pub use tracker::ContentInteractionTracker;
pub use types::{
    Comment, InteractionKind, InteractionOutcome, NewPost, Post, MAX_CONTENT_LEN, MAX_TITLE_LEN,
};

//! Circles Core Library
//!
//! Community access and engagement engine: circles with role-based
//! permissions, gated joins, single-use invites, posts and reactions, and
//! a points leaderboard driven by member activity.
//!
//! ```text
//! CommunityEngine::handle(caller, Request)
//!     ├── CircleRegistry / RoleCapabilityTable
//!     ├── MembershipManager ── GatingEngine ── FactProvider
//!     ├── InviteService
//!     ├── ContentInteractionTracker ── LeaderboardEngine
//!     └── ActivityLog
//!             all backed by CircleStorage (SQLite)
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod activity;
mod api;
pub mod circle;
pub mod clock;
pub mod config;
pub mod content;
pub mod gating;
pub mod ids;
pub mod leaderboard;
pub mod storage;

pub use api::{CommunityEngine, ErrorBody, Request, Response};
pub use circle::{CircleError, ErrorKind, Result};
pub use clock::{Clock, SystemClock};
pub use config::{EngineConfig, ScoringWeights};
pub use storage::CircleStorage;

//! Append-only audit log of membership and content events.
//!
//! Entries are appended inside the same transaction as the mutation that
//! causes them, so their ids follow commit order.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;

use crate::circle::roles::ensure_readable;
use crate::circle::{CircleError, Result};
use crate::ids::CircleId;
use crate::storage::{self, CircleStorage};

/// Kind of an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    CircleCreated,
    CircleUpdated,
    Joined,
    Left,
    RoleChanged,
    MemberRemoved,
    RuleAdded,
    RuleRemoved,
    InviteCreated,
    InviteRedeemed,
    InviteRevoked,
    Posted,
    Commented,
    Interacted,
    PostPinned,
    PostDeleted,
}

impl ActivityKind {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CircleCreated => "circle_created",
            Self::CircleUpdated => "circle_updated",
            Self::Joined => "joined",
            Self::Left => "left",
            Self::RoleChanged => "role_changed",
            Self::MemberRemoved => "member_removed",
            Self::RuleAdded => "rule_added",
            Self::RuleRemoved => "rule_removed",
            Self::InviteCreated => "invite_created",
            Self::InviteRedeemed => "invite_redeemed",
            Self::InviteRevoked => "invite_revoked",
            Self::Posted => "posted",
            Self::Commented => "commented",
            Self::Interacted => "interacted",
            Self::PostPinned => "post_pinned",
            Self::PostDeleted => "post_deleted",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "circle_created" => Self::CircleCreated,
            "circle_updated" => Self::CircleUpdated,
            "joined" => Self::Joined,
            "left" => Self::Left,
            "role_changed" => Self::RoleChanged,
            "member_removed" => Self::MemberRemoved,
            "rule_added" => Self::RuleAdded,
            "rule_removed" => Self::RuleRemoved,
            "invite_created" => Self::InviteCreated,
            "invite_redeemed" => Self::InviteRedeemed,
            "invite_revoked" => Self::InviteRevoked,
            "posted" => Self::Posted,
            "commented" => Self::Commented,
            "interacted" => Self::Interacted,
            "post_pinned" => Self::PostPinned,
            "post_deleted" => Self::PostDeleted,
            _ => return None,
        })
    }
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    /// Monotonic sequence number.
    pub id: i64,
    pub circle_id: CircleId,
    /// Identity whose request caused the entry.
    pub actor: String,
    pub kind: ActivityKind,
    /// Target of the action: an identity, post id, rule id or invite id.
    pub subject: Option<String>,
    pub created_at: i64,
}

/// Appends an entry on an open transaction.
pub(crate) fn record(
    conn: &Connection,
    circle_id: &CircleId,
    actor: &str,
    kind: ActivityKind,
    subject: Option<&str>,
    now: i64,
) -> Result<i64> {
    storage::activity::append(conn, circle_id, actor, kind, subject, now)
}

/// Read side of the activity log.
pub struct ActivityLog {
    storage: Arc<CircleStorage>,
    max_page_size: u32,
}

impl ActivityLog {
    /// Creates a reader over `storage`.
    #[must_use]
    pub const fn new(storage: Arc<CircleStorage>, max_page_size: u32) -> Self {
        Self {
            storage,
            max_page_size,
        }
    }

    /// Most recent entries of a circle, newest first.
    ///
    /// Pass the smallest id already seen as `before` to page backwards.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle and
    /// [`CircleError::Forbidden`] for non-members of a private circle.
    pub fn recent(
        &self,
        viewer: &str,
        circle_id: &CircleId,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ActivityEntry>> {
        let limit = limit.clamp(1, self.max_page_size);
        self.storage.read(|conn| {
            ensure_readable(conn, circle_id, viewer)?;
            storage::activity::recent(conn, circle_id, limit, before)
        })
    }

    /// Entries caused by one identity in a circle, in commit order.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle and
    /// [`CircleError::Forbidden`] for non-members of a private circle.
    pub fn for_member(
        &self,
        viewer: &str,
        circle_id: &CircleId,
        identity: &str,
        limit: u32,
    ) -> Result<Vec<ActivityEntry>> {
        if identity.trim().is_empty() {
            return Err(CircleError::InvalidData("identity is required".to_string()));
        }
        let limit = limit.clamp(1, self.max_page_size);
        self.storage.read(|conn| {
            ensure_readable(conn, circle_id, viewer)?;
            storage::activity::for_member(conn, circle_id, identity, limit)
        })
    }
}

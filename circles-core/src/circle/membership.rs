//! Membership lifecycle: join, leave, role changes and removal.
//!
//! Leaving is a soft deactivation. The row and the member's leaderboard
//! entry stay behind, so rejoining restores the same points with role
//! `member` and a fresh join time.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};

use super::error::{CircleError, Result};
use super::roles::{ensure_readable, require_on};
use super::types::{Capability, Circle, JoinOutcome, Membership, Page, Role};
use crate::activity::{self, ActivityKind};
use crate::clock::Clock;
use crate::gating::{AccessDecision, GatingEngine};
use crate::ids::CircleId;
use crate::storage::{self, run_blocking, CircleStorage};

/// Activates `identity` as a `member` on an open transaction.
///
/// Returns `None` when the identity is already active. Only a caller that
/// actually flipped the row bumps the member count and logs the join.
pub(crate) fn activate_on(
    conn: &Connection,
    circle_id: &CircleId,
    identity: &str,
    now: i64,
) -> Result<Option<Membership>> {
    if !storage::memberships::activate(conn, circle_id, identity, Role::Member, now)? {
        return Ok(None);
    }
    storage::circles::adjust_member_count(conn, circle_id, 1)?;
    storage::leaderboard::seed_entry(conn, circle_id, identity, now)?;
    activity::record(conn, circle_id, identity, ActivityKind::Joined, None, now)?;
    Ok(Some(Membership {
        circle_id: circle_id.clone(),
        member: identity.to_string(),
        role: Role::Member,
        joined_at: now,
        active: true,
    }))
}

fn ensure_circle(conn: &Connection, circle_id: &CircleId) -> Result<()> {
    if storage::circles::get_circle(conn, circle_id)?.is_none() {
        return Err(CircleError::NotFound(format!("circle {circle_id}")));
    }
    Ok(())
}

fn active_member(conn: &Connection, circle_id: &CircleId, identity: &str) -> Result<Membership> {
    storage::memberships::get_active(conn, circle_id, identity)?.ok_or_else(|| {
        CircleError::NotFound(format!("{identity} is not a member of circle {circle_id}"))
    })
}

/// Fails if `membership` is the only active admin left.
fn ensure_not_last_admin(conn: &Connection, membership: &Membership, action: &str) -> Result<()> {
    if membership.role == Role::Admin
        && storage::memberships::count_active_with_role(conn, &membership.circle_id, Role::Admin)?
            <= 1
    {
        return Err(CircleError::Conflict(format!(
            "cannot {action} the last admin of circle {}",
            membership.circle_id
        )));
    }
    Ok(())
}

/// Deactivates a membership and lowers the member count.
fn deactivate_on(
    conn: &Connection,
    membership: &Membership,
    actor: &str,
    kind: ActivityKind,
    now: i64,
) -> Result<()> {
    if !storage::memberships::deactivate(conn, &membership.circle_id, &membership.member)? {
        return Err(CircleError::NotFound(format!(
            "{} is not a member of circle {}",
            membership.member, membership.circle_id
        )));
    }
    storage::circles::adjust_member_count(conn, &membership.circle_id, -1)?;
    let subject = (actor != membership.member).then_some(membership.member.as_str());
    activity::record(conn, &membership.circle_id, actor, kind, subject, now)?;
    Ok(())
}

/// Manages who belongs to which circle and in what role.
pub struct MembershipManager {
    storage: Arc<CircleStorage>,
    gating: Arc<GatingEngine>,
    clock: Arc<dyn Clock>,
    max_page_size: u32,
}

impl MembershipManager {
    /// Creates a membership manager.
    #[must_use]
    pub fn new(
        storage: Arc<CircleStorage>,
        gating: Arc<GatingEngine>,
        clock: Arc<dyn Clock>,
        max_page_size: u32,
    ) -> Self {
        Self {
            storage,
            gating,
            clock,
            max_page_size,
        }
    }

    // ==================== Join / Leave ====================

    /// Joins a circle after passing its gating rules.
    ///
    /// Joining twice is harmless: an active member gets
    /// [`JoinOutcome::AlreadyMember`], and of several concurrent joins by
    /// the same identity exactly one returns [`JoinOutcome::Joined`].
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle,
    /// [`CircleError::Forbidden`] with the denial reasons when gating fails,
    /// and an `Unavailable`-kind error when facts cannot be fetched.
    pub async fn join(&self, identity: &str, circle_id: &CircleId) -> Result<JoinOutcome> {
        if identity.trim().is_empty() {
            return Err(CircleError::InvalidData("identity is required".to_string()));
        }

        let existing = run_blocking(|| {
            self.storage.read(|conn| {
                ensure_circle(conn, circle_id)?;
                storage::memberships::get_active(conn, circle_id, identity)
            })
        })?;
        if let Some(membership) = existing {
            return Ok(JoinOutcome::AlreadyMember(membership));
        }

        if let AccessDecision::Denied(reasons) = self.gating.evaluate(identity, circle_id).await? {
            info!(circle_id = %circle_id, identity, ?reasons, "join denied");
            return Err(CircleError::Forbidden(reasons.join("; ")));
        }

        let now = self.clock.now();
        let outcome = run_blocking(|| {
            self.storage.write(|tx| {
                ensure_circle(tx, circle_id)?;
                match activate_on(tx, circle_id, identity, now)? {
                    Some(membership) => Ok(JoinOutcome::Joined(membership)),
                    None => Ok(JoinOutcome::AlreadyMember(active_member(tx, circle_id, identity)?)),
                }
            })
        })?;

        if outcome.is_new() {
            info!(circle_id = %circle_id, identity, "member joined");
        } else {
            debug!(circle_id = %circle_id, identity, "concurrent join already applied");
        }
        Ok(outcome)
    }

    /// Leaves a circle.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] if `identity` is not an active
    /// member and [`CircleError::Conflict`] for the last admin.
    pub fn leave(&self, identity: &str, circle_id: &CircleId) -> Result<()> {
        let now = self.clock.now();
        self.storage.write(|tx| {
            ensure_circle(tx, circle_id)?;
            let membership = active_member(tx, circle_id, identity)?;
            ensure_not_last_admin(tx, &membership, "leave as")?;
            deactivate_on(tx, &membership, identity, ActivityKind::Left, now)
        })?;
        info!(circle_id = %circle_id, identity, "member left");
        Ok(())
    }

    // ==================== Roles ====================

    /// Changes the role of an active member.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::Forbidden`] unless `acting` can manage roles,
    /// [`CircleError::NotFound`] if `target` is not an active member and
    /// [`CircleError::Conflict`] when demoting the last admin.
    pub fn assign_role(
        &self,
        acting: &str,
        target: &str,
        circle_id: &CircleId,
        role: Role,
    ) -> Result<Membership> {
        let now = self.clock.now();
        let membership = self.storage.write(|tx| {
            require_on(tx, circle_id, acting, Capability::ManageRoles)?;
            let mut membership = active_member(tx, circle_id, target)?;
            if membership.role == role {
                return Ok(membership);
            }
            if role != Role::Admin {
                ensure_not_last_admin(tx, &membership, "demote")?;
            }
            storage::memberships::set_role(tx, circle_id, target, role)?;
            activity::record(tx, circle_id, acting, ActivityKind::RoleChanged, Some(target), now)?;
            membership.role = role;
            Ok(membership)
        })?;
        info!(
            circle_id = %circle_id,
            acting,
            target,
            role = membership.role.as_str(),
            "role assigned"
        );
        Ok(membership)
    }

    /// Removes another member from a circle.
    ///
    /// Needs `can_moderate`; removing an admin also needs
    /// `can_manage_roles`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] when `acting` targets itself,
    /// [`CircleError::Forbidden`] for missing capabilities and
    /// [`CircleError::NotFound`] if `target` is not an active member.
    pub fn remove_member(&self, acting: &str, target: &str, circle_id: &CircleId) -> Result<()> {
        if acting == target {
            return Err(CircleError::InvalidData(
                "use leave to remove yourself".to_string(),
            ));
        }
        let now = self.clock.now();
        self.storage.write(|tx| {
            require_on(tx, circle_id, acting, Capability::Moderate)?;
            let membership = active_member(tx, circle_id, target)?;
            if membership.role == Role::Admin {
                require_on(tx, circle_id, acting, Capability::ManageRoles)?;
                ensure_not_last_admin(tx, &membership, "remove")?;
            }
            deactivate_on(tx, &membership, acting, ActivityKind::MemberRemoved, now)
        })?;
        info!(circle_id = %circle_id, acting, target, "member removed");
        Ok(())
    }

    // ==================== Queries ====================

    /// Membership row of `identity`, active or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn membership(&self, circle_id: &CircleId, identity: &str) -> Result<Option<Membership>> {
        self.storage
            .read(|conn| storage::memberships::get(conn, circle_id, identity))
    }

    /// Active members, earliest join first, as seen by `viewer`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle and
    /// [`CircleError::Forbidden`] for non-members of a private circle.
    pub fn list_members(
        &self,
        viewer: &str,
        circle_id: &CircleId,
        page: Page,
    ) -> Result<Vec<Membership>> {
        let page = page.clamped(self.max_page_size);
        self.storage.read(|conn| {
            ensure_readable(conn, circle_id, viewer)?;
            storage::memberships::list_active(conn, circle_id, page)
        })
    }

    /// Circles in which `identity` is an active member.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn circles_for(&self, identity: &str) -> Result<Vec<Circle>> {
        self.storage
            .read(|conn| storage::circles::circles_for_member(conn, identity))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::circle::{CircleRegistry, NewCircle, Visibility};
    use crate::clock::ManualClock;
    use crate::gating::{FactProvider, RuleParams, StaticFacts};

    struct Fixture {
        storage: Arc<CircleStorage>,
        clock: Arc<ManualClock>,
        facts: Arc<StaticFacts>,
        gating: Arc<GatingEngine>,
        members: MembershipManager,
        circle: Circle,
    }

    fn fixture(visibility: Visibility) -> Fixture {
        let storage = Arc::new(CircleStorage::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(1_000));
        let facts = Arc::new(StaticFacts::new());
        let gating = Arc::new(GatingEngine::new(
            Arc::clone(&storage),
            Arc::clone(&facts) as Arc<dyn FactProvider>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Duration::from_secs(1),
        ));
        let registry = CircleRegistry::new(Arc::clone(&storage), Arc::clone(&clock) as Arc<dyn Clock>, 100);
        let circle = registry
            .create_circle("alice", NewCircle::new("Test Circle").with_visibility(visibility))
            .unwrap();
        let members = MembershipManager::new(
            Arc::clone(&storage),
            Arc::clone(&gating),
            Arc::clone(&clock) as Arc<dyn Clock>,
            100,
        );
        Fixture {
            storage,
            clock,
            facts,
            gating,
            members,
            circle,
        }
    }

    fn member_count(f: &Fixture) -> i64 {
        f.storage
            .read(|conn| storage::circles::get_circle(conn, &f.circle.id))
            .unwrap()
            .unwrap()
            .member_count
    }

    #[tokio::test]
    async fn join_and_join_again() {
        let f = fixture(Visibility::Public);
        let first = f.members.join("bob", &f.circle.id).await.unwrap();
        assert!(first.is_new());
        assert_eq!(first.membership().role, Role::Member);

        let second = f.members.join("bob", &f.circle.id).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(member_count(&f), 2);
    }

    #[tokio::test]
    async fn join_private_circle_is_forbidden() {
        let f = fixture(Visibility::Private);
        let err = f.members.join("bob", &f.circle.id).await.unwrap_err();
        assert!(matches!(err, CircleError::Forbidden(_)));
        assert_eq!(member_count(&f), 1);
    }

    #[tokio::test]
    async fn join_denial_lists_reasons() {
        let f = fixture(Visibility::Public);
        f.gating
            .add_rule("alice", &f.circle.id, RuleParams::FollowerCount { min_followers: 500 })
            .unwrap();
        f.facts.set_followers("bob", 120);

        let err = f.members.join("bob", &f.circle.id).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Forbidden: requires 500+ followers, you have 120"
        );
    }

    #[tokio::test]
    async fn join_unknown_circle() {
        let f = fixture(Visibility::Public);
        let err = f
            .members
            .join("bob", &CircleId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CircleError::NotFound(_)));
    }

    #[tokio::test]
    async fn leave_and_rejoin_resets_role_and_join_time() {
        let f = fixture(Visibility::Public);
        f.members.join("bob", &f.circle.id).await.unwrap();
        f.members
            .assign_role("alice", "bob", &f.circle.id, Role::Moderator)
            .unwrap();

        f.members.leave("bob", &f.circle.id).unwrap();
        assert_eq!(member_count(&f), 1);
        assert!(!f.members.membership(&f.circle.id, "bob").unwrap().unwrap().active);
        assert!(matches!(
            f.members.leave("bob", &f.circle.id),
            Err(CircleError::NotFound(_))
        ));

        f.clock.advance(60);
        let rejoined = f.members.join("bob", &f.circle.id).await.unwrap();
        assert!(rejoined.is_new());
        assert_eq!(rejoined.membership().role, Role::Member);
        assert_eq!(rejoined.membership().joined_at, 1_060);
    }

    #[tokio::test]
    async fn last_admin_is_protected() {
        let f = fixture(Visibility::Public);
        f.members.join("bob", &f.circle.id).await.unwrap();

        let err = f.members.leave("alice", &f.circle.id).unwrap_err();
        assert!(matches!(err, CircleError::Conflict(ref msg) if msg.contains("cannot leave as the last admin")));
        assert!(matches!(
            f.members
                .assign_role("alice", "alice", &f.circle.id, Role::Member),
            Err(CircleError::Conflict(_))
        ));

        f.members
            .assign_role("alice", "bob", &f.circle.id, Role::Admin)
            .unwrap();
        f.members.leave("alice", &f.circle.id).unwrap();
    }

    #[tokio::test]
    async fn assign_role_requires_capability() {
        let f = fixture(Visibility::Public);
        f.members.join("bob", &f.circle.id).await.unwrap();
        f.members.join("carol", &f.circle.id).await.unwrap();

        assert!(matches!(
            f.members
                .assign_role("bob", "carol", &f.circle.id, Role::Admin),
            Err(CircleError::Forbidden(_))
        ));
        assert!(matches!(
            f.members
                .assign_role("alice", "zed", &f.circle.id, Role::Moderator),
            Err(CircleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn moderator_removes_members_but_not_admins() {
        let f = fixture(Visibility::Public);
        for who in ["bob", "carol"] {
            f.members.join(who, &f.circle.id).await.unwrap();
        }
        f.members
            .assign_role("alice", "bob", &f.circle.id, Role::Moderator)
            .unwrap();

        assert!(matches!(
            f.members.remove_member("bob", "alice", &f.circle.id),
            Err(CircleError::Forbidden(_))
        ));
        assert!(matches!(
            f.members.remove_member("bob", "bob", &f.circle.id),
            Err(CircleError::InvalidData(_))
        ));

        f.members
            .remove_member("bob", "carol", &f.circle.id)
            .unwrap();
        assert_eq!(member_count(&f), 2);

        let members = f
            .members
            .list_members("zed", &f.circle.id, Page::default())
            .unwrap();
        let names: Vec<_> = members.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn circles_for_lists_active_memberships() {
        let f = fixture(Visibility::Public);
        f.members.join("bob", &f.circle.id).await.unwrap();
        assert_eq!(f.members.circles_for("bob").unwrap().len(), 1);
        f.members.leave("bob", &f.circle.id).unwrap();
        assert!(f.members.circles_for("bob").unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_member_list_hidden_from_outsiders() {
        let f = fixture(Visibility::Private);
        assert!(matches!(
            f.members.list_members("zed", &f.circle.id, Page::default()),
            Err(CircleError::Forbidden(_))
        ));
        let members = f
            .members
            .list_members("alice", &f.circle.id, Page::default())
            .unwrap();
        assert_eq!(members.len(), 1);
    }
}

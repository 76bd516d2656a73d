//! Role capability lookups.
//!
//! Each circle owns exactly four permission rows, one per [`Role`], written
//! in the same transaction that creates the circle. Checks are flat table
//! lookups keyed by `(circle_id, role)`.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::debug;

use super::error::{CircleError, Result};
use super::types::{Capabilities, Capability, Membership, Role, Visibility};
use crate::ids::CircleId;
use crate::storage::{self, CircleStorage};

/// Writes the default permission rows for a new circle.
pub(crate) fn seed_defaults(conn: &Connection, circle_id: &CircleId) -> Result<()> {
    for role in Role::ALL {
        storage::circles::insert_role_permissions(
            conn,
            circle_id,
            role,
            &Capabilities::defaults_for(role),
        )?;
    }
    Ok(())
}

/// Checks that `identity` is an active member whose role grants `capability`.
///
/// Returns the membership on success. Usable inside a transaction so the
/// check and the mutation it guards see the same snapshot.
pub(crate) fn require_on(
    conn: &Connection,
    circle_id: &CircleId,
    identity: &str,
    capability: Capability,
) -> Result<Membership> {
    if storage::circles::get_circle(conn, circle_id)?.is_none() {
        return Err(CircleError::NotFound(format!("circle {circle_id}")));
    }

    let membership = storage::memberships::get_active(conn, circle_id, identity)?
        .ok_or_else(|| {
            CircleError::Forbidden(format!("{identity} is not a member of circle {circle_id}"))
        })?;

    let caps = storage::circles::get_role_permissions(conn, circle_id, membership.role)?
        .ok_or_else(|| {
            CircleError::Storage(format!(
                "missing {} permissions for circle {circle_id}",
                membership.role.as_str()
            ))
        })?;

    if !caps.allows(capability) {
        debug!(
            circle_id = %circle_id,
            identity,
            role = membership.role.as_str(),
            capability = capability.as_str(),
            "capability denied"
        );
        return Err(CircleError::Forbidden(format!(
            "role {} lacks {} in circle {circle_id}",
            membership.role.as_str(),
            capability.as_str()
        )));
    }

    Ok(membership)
}

/// Checks that `viewer` may read a circle's content and member data.
///
/// Public circles are readable by anyone. Private circles are readable by
/// active members only.
pub(crate) fn ensure_readable(conn: &Connection, circle_id: &CircleId, viewer: &str) -> Result<()> {
    let circle = storage::circles::get_circle(conn, circle_id)?
        .ok_or_else(|| CircleError::NotFound(format!("circle {circle_id}")))?;
    if circle.visibility == Visibility::Private
        && storage::memberships::get_active(conn, circle_id, viewer)?.is_none()
    {
        return Err(CircleError::Forbidden(format!(
            "circle {circle_id} is private"
        )));
    }
    Ok(())
}

/// Read access to per-circle role capabilities.
pub struct RoleCapabilityTable {
    storage: Arc<CircleStorage>,
}

impl RoleCapabilityTable {
    /// Creates a table over `storage`.
    #[must_use]
    pub const fn new(storage: Arc<CircleStorage>) -> Self {
        Self { storage }
    }

    /// Capabilities of `role` in a circle.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] if the circle has no permission rows.
    pub fn capabilities(&self, circle_id: &CircleId, role: Role) -> Result<Capabilities> {
        self.storage
            .read(|conn| storage::circles::get_role_permissions(conn, circle_id, role))?
            .ok_or_else(|| CircleError::NotFound(format!("circle {circle_id}")))
    }

    /// All four role rows of a circle, admin first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn table(&self, circle_id: &CircleId) -> Result<Vec<(Role, Capabilities)>> {
        self.storage
            .read(|conn| storage::circles::list_role_permissions(conn, circle_id))
    }

    /// Role and capabilities of an active member, or `None` for non-members.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn capabilities_of(
        &self,
        circle_id: &CircleId,
        identity: &str,
    ) -> Result<Option<(Role, Capabilities)>> {
        self.storage.read(|conn| {
            let Some(membership) = storage::memberships::get_active(conn, circle_id, identity)?
            else {
                return Ok(None);
            };
            Ok(
                storage::circles::get_role_permissions(conn, circle_id, membership.role)?
                    .map(|caps| (membership.role, caps)),
            )
        })
    }

    /// Checks that `identity` may exercise `capability` in a circle.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle and
    /// [`CircleError::Forbidden`] for non-members or missing capabilities.
    pub fn require(
        &self,
        circle_id: &CircleId,
        identity: &str,
        capability: Capability,
    ) -> Result<Membership> {
        self.storage
            .read(|conn| require_on(conn, circle_id, identity, capability))
    }
}

//! Single-use, time-limited invites.
//!
//! Redeeming an invite bypasses gating. Marking the invite used and
//! activating the membership happen in one transaction, so an invite is
//! never consumed without the redeemer joining.

use std::sync::Arc;

use tracing::{info, warn};

use super::error::{CircleError, Result};
use super::membership::activate_on;
use super::roles::require_on;
use super::types::{Capability, Invite};
use crate::activity::{self, ActivityKind};
use crate::clock::Clock;
use crate::ids::{random_hex, CircleId, InviteId};
use crate::storage::{self, CircleStorage};

/// Random bytes in an invite code (128 bits).
pub const INVITE_CODE_BYTES: usize = 16;

/// Issues, lists, revokes and redeems invites.
pub struct InviteService {
    storage: Arc<CircleStorage>,
    clock: Arc<dyn Clock>,
    invite_ttl: i64,
}

impl InviteService {
    /// Creates an invite service. `invite_ttl` is in seconds.
    #[must_use]
    pub fn new(storage: Arc<CircleStorage>, clock: Arc<dyn Clock>, invite_ttl: i64) -> Self {
        Self {
            storage,
            clock,
            invite_ttl,
        }
    }

    /// Issues an invite, optionally bound to one address.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::Forbidden`] unless `invited_by` can invite
    /// and [`CircleError::NotFound`] for an unknown circle.
    pub fn create_invite(
        &self,
        circle_id: &CircleId,
        invited_by: &str,
        invited_address: Option<&str>,
    ) -> Result<Invite> {
        let invited_address = invited_address.map(str::trim);
        if invited_address.is_some_and(str::is_empty) {
            return Err(CircleError::InvalidData("invited address is blank".to_string()));
        }

        let now = self.clock.now();
        let invite = Invite {
            id: InviteId::generate(),
            circle_id: circle_id.clone(),
            invited_by: invited_by.to_string(),
            code: random_hex(INVITE_CODE_BYTES),
            invited_address: invited_address.map(str::to_string),
            used: false,
            used_by: None,
            used_at: None,
            expires_at: now.saturating_add(self.invite_ttl),
            created_at: now,
        };

        self.storage.write(|tx| {
            require_on(tx, circle_id, invited_by, Capability::Invite)?;
            if !storage::invites::insert_invite(tx, &invite)? {
                return Err(CircleError::Conflict("invite code collision".to_string()));
            }
            activity::record(
                tx,
                circle_id,
                invited_by,
                ActivityKind::InviteCreated,
                Some(invite.id.as_str()),
                now,
            )?;
            Ok(())
        })?;

        info!(
            circle_id = %circle_id,
            invite_id = %invite.id,
            invited_by,
            bound = invite.invited_address.is_some(),
            expires_at = invite.expires_at,
            "invite created"
        );
        Ok(invite)
    }

    /// Redeems an invite code and returns the circle joined.
    ///
    /// An identity that is already an active member gets the circle id
    /// back and the invite stays unused. Of several concurrent redemptions
    /// of one code exactly one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InviteNotFound`], [`CircleError::InviteAlreadyUsed`],
    /// [`CircleError::InviteExpired`] or [`CircleError::InviteAddressMismatch`].
    pub fn redeem_invite(&self, code: &str, identity: &str) -> Result<CircleId> {
        if identity.trim().is_empty() {
            return Err(CircleError::InvalidData("identity is required".to_string()));
        }
        let now = self.clock.now();

        let result = self.storage.write(|tx| {
            let invite =
                storage::invites::get_by_code(tx, code)?.ok_or(CircleError::InviteNotFound)?;
            if invite.used {
                return Err(CircleError::InviteAlreadyUsed);
            }
            if invite.is_expired(now) {
                return Err(CircleError::InviteExpired {
                    expired_at: invite.expires_at,
                });
            }
            if invite
                .invited_address
                .as_deref()
                .is_some_and(|address| address != identity)
            {
                return Err(CircleError::InviteAddressMismatch);
            }

            if storage::memberships::get_active(tx, &invite.circle_id, identity)?.is_some() {
                return Ok((invite, false));
            }

            if !storage::invites::mark_used(tx, code, identity, now)? {
                return Err(CircleError::InviteAlreadyUsed);
            }
            activate_on(tx, &invite.circle_id, identity, now)?;
            activity::record(
                tx,
                &invite.circle_id,
                identity,
                ActivityKind::InviteRedeemed,
                Some(invite.id.as_str()),
                now,
            )?;
            Ok((invite, true))
        });

        match result {
            Ok((invite, redeemed)) => {
                if redeemed {
                    info!(circle_id = %invite.circle_id, invite_id = %invite.id, identity, "invite redeemed");
                }
                Ok(invite.circle_id)
            }
            Err(e) => {
                warn!(identity, error = %e, "invite redemption failed");
                Err(e)
            }
        }
    }

    /// Invites of a circle, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::Forbidden`] unless `acting` can invite.
    pub fn list_invites(&self, acting: &str, circle_id: &CircleId) -> Result<Vec<Invite>> {
        self.storage.read(|conn| {
            require_on(conn, circle_id, acting, Capability::Invite)?;
            storage::invites::list_for_circle(conn, circle_id)
        })
    }

    /// Withdraws an unused invite.
    ///
    /// The issuer may always revoke; anyone else needs `can_moderate`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InviteNotFound`], [`CircleError::InviteAlreadyUsed`]
    /// or [`CircleError::Forbidden`].
    pub fn revoke_invite(&self, acting: &str, code: &str) -> Result<()> {
        let now = self.clock.now();
        let invite = self.storage.write(|tx| {
            let invite =
                storage::invites::get_by_code(tx, code)?.ok_or(CircleError::InviteNotFound)?;
            if invite.used {
                return Err(CircleError::InviteAlreadyUsed);
            }
            if invite.invited_by != acting {
                require_on(tx, &invite.circle_id, acting, Capability::Moderate)?;
            }
            if !storage::invites::delete_unused(tx, &invite.id)? {
                return Err(CircleError::InviteAlreadyUsed);
            }
            activity::record(
                tx,
                &invite.circle_id,
                acting,
                ActivityKind::InviteRevoked,
                Some(invite.id.as_str()),
                now,
            )?;
            Ok(invite)
        })?;
        info!(circle_id = %invite.circle_id, invite_id = %invite.id, acting, "invite revoked");
        Ok(())
    }
}

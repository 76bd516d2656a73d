//! Circles and their membership.
//!
//! A circle is a community with a unique slug, a visibility, a role table
//! and a set of members. This module owns the circle lifecycle:
//!
//! ```text
//! CircleRegistry       create / look up / list / update circles
//! RoleCapabilityTable  (circle, role) -> capability bits
//! MembershipManager    join (gated) / leave / assign role / remove
//! InviteService        create / list / revoke / redeem invites
//! ```
//!
//! Every mutation runs in one storage transaction together with its
//! activity entry.

mod error;
mod invite;
mod membership;
mod registry;
pub(crate) mod roles;
pub mod types;

pub use error::{CircleError, ErrorKind, Result};
pub use invite::{InviteService, INVITE_CODE_BYTES};
pub use membership::MembershipManager;
pub use registry::{slugify, CircleRegistry, MAX_DESCRIPTION_LEN, MAX_NAME_LEN};
pub use roles::RoleCapabilityTable;
pub use types::{
    Capabilities, Capability, Category, Circle, CircleFilter, CircleUpdate, Invite, JoinOutcome,
    Membership, NewCircle, Page, Role, Visibility,
};

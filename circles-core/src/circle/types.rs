//! Core types for circle management.
//!
//! This module defines circles, memberships, roles and their capability
//! bits, and invites.

use serde::{Deserialize, Serialize};

use crate::ids::{CircleId, InviteId};

/// Category of a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Decentralized autonomous organization.
    Dao,
    /// General-interest community.
    Community,
    /// Project team.
    Project,
    /// Social group.
    Social,
    /// Professional network.
    Professional,
    /// Gaming group.
    Gaming,
    /// Uncategorized.
    #[default]
    General,
}

impl Category {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Dao => "dao",
            Self::Community => "community",
            Self::Project => "project",
            Self::Social => "social",
            Self::Professional => "professional",
            Self::Gaming => "gaming",
            Self::General => "general",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dao" => Some(Self::Dao),
            "community" => Some(Self::Community),
            "project" => Some(Self::Project),
            "social" => Some(Self::Social),
            "professional" => Some(Self::Professional),
            "gaming" => Some(Self::Gaming),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Whether a circle is listed and open by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Listed; open to anyone when no gating rule applies.
    #[default]
    Public,
    /// Unlisted; closed unless gating rules are satisfied or an invite is redeemed.
    Private,
}

impl Visibility {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// Role of a member within a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full control, assigned to the creator.
    Admin,
    /// Moderation without treasury or role management.
    Moderator,
    /// Regular participant.
    Member,
    /// Read-only participant.
    Viewer,
}

impl Role {
    /// Every role, in descending order of authority.
    pub const ALL: [Self; 4] = [Self::Admin, Self::Moderator, Self::Member, Self::Viewer];

    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Moderator => "moderator",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "moderator" => Some(Self::Moderator),
            "member" => Some(Self::Member),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }
}

/// A single permission bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Create posts.
    Post,
    /// Comment and react.
    Comment,
    /// Issue invites.
    Invite,
    /// Pin, delete and remove members.
    Moderate,
    /// Manage the circle treasury.
    ManageTreasury,
    /// Create governance proposals.
    CreateProposal,
    /// Vote on proposals.
    Vote,
    /// Assign roles, manage gating rules and circle metadata.
    ManageRoles,
}

impl Capability {
    /// Name of the capability as it appears in the permissions table.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "can_post",
            Self::Comment => "can_comment",
            Self::Invite => "can_invite",
            Self::Moderate => "can_moderate",
            Self::ManageTreasury => "can_manage_treasury",
            Self::CreateProposal => "can_create_proposal",
            Self::Vote => "can_vote",
            Self::ManageRoles => "can_manage_roles",
        }
    }
}

/// Capability bits of one role in one circle.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_post: bool,
    pub can_comment: bool,
    pub can_invite: bool,
    pub can_moderate: bool,
    pub can_manage_treasury: bool,
    pub can_create_proposal: bool,
    pub can_vote: bool,
    pub can_manage_roles: bool,
}

impl Capabilities {
    /// Default capability bits seeded for `role` when a circle is created.
    #[must_use]
    pub const fn defaults_for(role: Role) -> Self {
        match role {
            Role::Admin => Self {
                can_post: true,
                can_comment: true,
                can_invite: true,
                can_moderate: true,
                can_manage_treasury: true,
                can_create_proposal: true,
                can_vote: true,
                can_manage_roles: true,
            },
            Role::Moderator => Self {
                can_post: true,
                can_comment: true,
                can_invite: true,
                can_moderate: true,
                can_manage_treasury: false,
                can_create_proposal: false,
                can_vote: true,
                can_manage_roles: false,
            },
            Role::Member => Self {
                can_post: true,
                can_comment: true,
                can_invite: false,
                can_moderate: false,
                can_manage_treasury: false,
                can_create_proposal: false,
                can_vote: true,
                can_manage_roles: false,
            },
            Role::Viewer => Self {
                can_post: false,
                can_comment: false,
                can_invite: false,
                can_moderate: false,
                can_manage_treasury: false,
                can_create_proposal: false,
                can_vote: false,
                can_manage_roles: false,
            },
        }
    }

    /// Returns whether `capability` is granted.
    #[must_use]
    pub const fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Post => self.can_post,
            Capability::Comment => self.can_comment,
            Capability::Invite => self.can_invite,
            Capability::Moderate => self.can_moderate,
            Capability::ManageTreasury => self.can_manage_treasury,
            Capability::CreateProposal => self.can_create_proposal,
            Capability::Vote => self.can_vote,
            Capability::ManageRoles => self.can_manage_roles,
        }
    }
}

/// A circle (community).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Circle {
    /// Opaque unique identifier.
    pub id: CircleId,
    /// Display name.
    pub name: String,
    /// Unique lower-kebab handle derived from the name at creation.
    pub slug: String,
    /// Optional description.
    pub description: Option<String>,
    /// Avatar image reference.
    pub image_url: Option<String>,
    /// Banner image reference.
    pub banner_url: Option<String>,
    /// Identity that created the circle.
    pub creator: String,
    pub category: Category,
    pub visibility: Visibility,
    /// Cached count of active memberships.
    pub member_count: i64,
    /// When the circle was created (Unix timestamp).
    pub created_at: i64,
    /// When the circle metadata last changed (Unix timestamp).
    pub updated_at: i64,
}

/// Parameters for creating a new circle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCircle {
    /// Circle name.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub visibility: Visibility,
}

impl NewCircle {
    /// Creates parameters for a public, general circle.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the category.
    #[must_use]
    pub const fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Sets the visibility.
    #[must_use]
    pub const fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Sets the avatar image reference.
    #[must_use]
    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    /// Sets the banner image reference.
    #[must_use]
    pub fn with_banner(mut self, banner_url: impl Into<String>) -> Self {
        self.banner_url = Some(banner_url.into());
        self
    }
}

/// Metadata changes applied by [`CircleRegistry::update_circle`].
///
/// `None` leaves a field unchanged. The slug never changes.
///
/// [`CircleRegistry::update_circle`]: super::CircleRegistry::update_circle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    /// Creates a page with the given limit starting at offset zero.
    #[must_use]
    pub const fn first(limit: u32) -> Self {
        Self { limit, offset: 0 }
    }

    /// Caps the limit at `max`.
    #[must_use]
    pub fn clamped(self, max: u32) -> Self {
        Self {
            limit: self.limit.clamp(1, max.max(1)),
            offset: self.offset,
        }
    }
}

/// Filter for listing public circles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleFilter {
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub page: Page,
}

/// A member's relationship with a circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Membership {
    pub circle_id: CircleId,
    /// Member identity (address).
    pub member: String,
    pub role: Role,
    /// When the member (re)joined (Unix timestamp).
    pub joined_at: i64,
    /// Inactive rows are kept after leaving.
    pub active: bool,
}

/// Result of a join attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "membership", rename_all = "snake_case")]
pub enum JoinOutcome {
    /// A new active membership was created.
    Joined(Membership),
    /// The identity was already an active member; nothing changed.
    AlreadyMember(Membership),
}

impl JoinOutcome {
    /// Returns the resulting membership.
    #[must_use]
    pub const fn membership(&self) -> &Membership {
        match self {
            Self::Joined(m) | Self::AlreadyMember(m) => m,
        }
    }

    /// Returns whether this call created the membership.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::Joined(_))
    }
}

/// A single-use, time-limited invite.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Invite {
    pub id: InviteId,
    pub circle_id: CircleId,
    /// Identity that issued the invite.
    pub invited_by: String,
    /// Redeemable code.
    pub code: String,
    /// If set, only this identity may redeem.
    pub invited_address: Option<String>,
    pub used: bool,
    pub used_by: Option<String>,
    pub used_at: Option<i64>,
    /// Expiry (Unix timestamp). Redemption at or after this instant fails.
    pub expires_at: i64,
    pub created_at: i64,
}

impl Invite {
    /// Returns whether the invite has expired at `now`.
    #[must_use]
    pub const fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for Invite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invite")
            .field("id", &self.id)
            .field("circle_id", &self.circle_id)
            .field("invited_by", &self.invited_by)
            .field("code", &"<redacted>")
            .field("invited_address", &self.invited_address)
            .field("used", &self.used)
            .field("used_by", &self.used_by)
            .field("used_at", &self.used_at)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_default() {
        assert_eq!(Category::default(), Category::General);
    }

    #[test]
    fn category_parse_roundtrips_as_str() {
        for category in [
            Category::Dao,
            Category::Community,
            Category::Project,
            Category::Social,
            Category::Professional,
            Category::Gaming,
            Category::General,
        ] {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::parse("invalid"), None);
    }

    #[test]
    fn visibility_parse() {
        assert_eq!(Visibility::parse("public"), Some(Visibility::Public));
        assert_eq!(Visibility::parse("private"), Some(Visibility::Private));
        assert_eq!(Visibility::parse("secret"), None);
    }

    #[test]
    fn role_parse() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn admin_has_every_capability() {
        let caps = Capabilities::defaults_for(Role::Admin);
        for cap in [
            Capability::Post,
            Capability::Comment,
            Capability::Invite,
            Capability::Moderate,
            Capability::ManageTreasury,
            Capability::CreateProposal,
            Capability::Vote,
            Capability::ManageRoles,
        ] {
            assert!(caps.allows(cap), "admin should have {}", cap.as_str());
        }
    }

    #[test]
    fn moderator_defaults() {
        let caps = Capabilities::defaults_for(Role::Moderator);
        assert!(caps.can_post && caps.can_comment && caps.can_invite);
        assert!(caps.can_moderate && caps.can_vote);
        assert!(!caps.can_manage_treasury);
        assert!(!caps.can_create_proposal);
        assert!(!caps.can_manage_roles);
    }

    #[test]
    fn member_defaults() {
        let caps = Capabilities::defaults_for(Role::Member);
        assert!(caps.can_post && caps.can_comment && caps.can_vote);
        assert!(!caps.can_invite);
        assert!(!caps.can_moderate);
        assert!(!caps.can_manage_roles);
    }

    #[test]
    fn viewer_has_nothing() {
        assert_eq!(
            Capabilities::defaults_for(Role::Viewer),
            Capabilities::default()
        );
    }

    #[test]
    fn new_circle_builder() {
        let config = NewCircle::new("DAO Founders")
            .with_description("Builders")
            .with_category(Category::Dao)
            .with_visibility(Visibility::Private);
        assert_eq!(config.name, "DAO Founders");
        assert_eq!(config.description.as_deref(), Some("Builders"));
        assert_eq!(config.category, Category::Dao);
        assert_eq!(config.visibility, Visibility::Private);
    }

    #[test]
    fn page_clamped() {
        assert_eq!(Page::first(500).clamped(100).limit, 100);
        assert_eq!(Page::first(0).clamped(100).limit, 1);
    }

    #[test]
    fn invite_debug_redacts_code() {
        let invite = Invite {
            id: InviteId::new("i1"),
            circle_id: CircleId::new("c1"),
            invited_by: "alice".to_string(),
            code: "supersecret".to_string(),
            invited_address: None,
            used: false,
            used_by: None,
            used_at: None,
            expires_at: 100,
            created_at: 0,
        };
        let debug = format!("{invite:?}");
        assert!(!debug.contains("supersecret"));
        assert!(invite.is_expired(100));
        assert!(!invite.is_expired(99));
    }
}

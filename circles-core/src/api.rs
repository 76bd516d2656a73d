//! Typed request surface over all components.
//!
//! [`CommunityEngine`] wires the components to one storage, fact provider,
//! clock and configuration. Transports decode a [`Request`] (a closed,
//! `op`-tagged enum), pass it to [`CommunityEngine::handle`] with the
//! authenticated caller, and encode the [`Response`] or the [`ErrorBody`].

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::activity::{ActivityEntry, ActivityLog};
use crate::circle::{
    Capabilities, Circle, CircleError, CircleFilter, CircleRegistry, CircleUpdate, ErrorKind,
    Invite, InviteService, JoinOutcome, Membership, MembershipManager, NewCircle, Page, Result,
    Role, RoleCapabilityTable,
};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::content::{Comment, ContentInteractionTracker, InteractionKind, InteractionOutcome, NewPost, Post};
use crate::gating::{AccessDecision, FactProvider, GatingEngine, GatingRule, RuleParams};
use crate::ids::{CircleId, CommentId, PostId, RuleId};
use crate::leaderboard::{LeaderboardEngine, LeaderboardEntry, RankedEntry};
use crate::storage::{run_blocking, CircleStorage};

const fn default_limit() -> u32 {
    20
}

const fn default_true() -> bool {
    true
}

/// An operation requested by an authenticated caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    // Circles
    CreateCircle {
        circle: NewCircle,
    },
    GetCircle {
        circle_id: CircleId,
    },
    GetCircleBySlug {
        slug: String,
    },
    ListCircles {
        #[serde(default)]
        filter: CircleFilter,
    },
    SearchCircles {
        query: String,
        #[serde(default = "default_limit")]
        limit: u32,
    },
    UpdateCircle {
        circle_id: CircleId,
        update: CircleUpdate,
    },
    GetRoleTable {
        circle_id: CircleId,
    },

    // Membership
    Join {
        circle_id: CircleId,
    },
    Leave {
        circle_id: CircleId,
    },
    AssignRole {
        circle_id: CircleId,
        target: String,
        role: Role,
    },
    RemoveMember {
        circle_id: CircleId,
        target: String,
    },
    GetMembership {
        circle_id: CircleId,
        #[serde(default)]
        identity: Option<String>,
    },
    ListMembers {
        circle_id: CircleId,
        #[serde(default)]
        page: Page,
    },
    MyCircles,

    // Gating
    AddRule {
        circle_id: CircleId,
        rule_type: String,
        #[serde(default)]
        params: Value,
    },
    ListRules {
        circle_id: CircleId,
        #[serde(default)]
        include_inactive: bool,
    },
    RemoveRule {
        circle_id: CircleId,
        rule_id: RuleId,
    },
    CheckAccess {
        circle_id: CircleId,
    },

    // Invites
    CreateInvite {
        circle_id: CircleId,
        #[serde(default)]
        invited_address: Option<String>,
    },
    ListInvites {
        circle_id: CircleId,
    },
    RevokeInvite {
        code: String,
    },
    RedeemInvite {
        code: String,
    },

    // Content
    CreatePost {
        circle_id: CircleId,
        post: NewPost,
    },
    AddComment {
        post_id: PostId,
        content: String,
        #[serde(default)]
        parent_comment_id: Option<CommentId>,
    },
    Interact {
        post_id: PostId,
        kind: InteractionKind,
    },
    RemoveInteraction {
        post_id: PostId,
        kind: InteractionKind,
    },
    PinPost {
        post_id: PostId,
        #[serde(default = "default_true")]
        pinned: bool,
    },
    DeletePost {
        post_id: PostId,
    },
    GetPost {
        post_id: PostId,
    },
    ListPosts {
        circle_id: CircleId,
        #[serde(default)]
        page: Page,
    },
    ListComments {
        post_id: PostId,
        #[serde(default)]
        page: Page,
    },

    // Leaderboard
    GetLeaderboard {
        circle_id: CircleId,
        #[serde(default = "default_limit")]
        limit: u32,
    },
    GetRank {
        circle_id: CircleId,
        #[serde(default)]
        identity: Option<String>,
    },
    Recompute {
        circle_id: CircleId,
        #[serde(default)]
        identity: Option<String>,
    },

    // Activity
    GetActivity {
        circle_id: CircleId,
        #[serde(default = "default_limit")]
        limit: u32,
        #[serde(default)]
        before: Option<i64>,
    },
}

impl Request {
    /// Operation name, as it appears in the `op` tag.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::CreateCircle { .. } => "create_circle",
            Self::GetCircle { .. } => "get_circle",
            Self::GetCircleBySlug { .. } => "get_circle_by_slug",
            Self::ListCircles { .. } => "list_circles",
            Self::SearchCircles { .. } => "search_circles",
            Self::UpdateCircle { .. } => "update_circle",
            Self::GetRoleTable { .. } => "get_role_table",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::AssignRole { .. } => "assign_role",
            Self::RemoveMember { .. } => "remove_member",
            Self::GetMembership { .. } => "get_membership",
            Self::ListMembers { .. } => "list_members",
            Self::MyCircles => "my_circles",
            Self::AddRule { .. } => "add_rule",
            Self::ListRules { .. } => "list_rules",
            Self::RemoveRule { .. } => "remove_rule",
            Self::CheckAccess { .. } => "check_access",
            Self::CreateInvite { .. } => "create_invite",
            Self::ListInvites { .. } => "list_invites",
            Self::RevokeInvite { .. } => "revoke_invite",
            Self::RedeemInvite { .. } => "redeem_invite",
            Self::CreatePost { .. } => "create_post",
            Self::AddComment { .. } => "add_comment",
            Self::Interact { .. } => "interact",
            Self::RemoveInteraction { .. } => "remove_interaction",
            Self::PinPost { .. } => "pin_post",
            Self::DeletePost { .. } => "delete_post",
            Self::GetPost { .. } => "get_post",
            Self::ListPosts { .. } => "list_posts",
            Self::ListComments { .. } => "list_comments",
            Self::GetLeaderboard { .. } => "get_leaderboard",
            Self::GetRank { .. } => "get_rank",
            Self::Recompute { .. } => "recompute",
            Self::GetActivity { .. } => "get_activity",
        }
    }
}

/// Result payload of a successful [`Request`].
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Response {
    Circle(Circle),
    Circles(Vec<Circle>),
    RoleTable(Vec<(Role, Capabilities)>),
    Join(JoinOutcome),
    Membership(Option<Membership>),
    Members(Vec<Membership>),
    Rule(GatingRule),
    Rules(Vec<GatingRule>),
    Access(AccessDecision),
    Invite(Invite),
    Invites(Vec<Invite>),
    /// Circle joined through an invite.
    Redeemed(CircleId),
    Post(Post),
    Posts(Vec<Post>),
    Comment(Comment),
    Comments(Vec<Comment>),
    Interaction(InteractionOutcome),
    Leaderboard(Vec<RankedEntry>),
    Rank(RankedEntry),
    Entry(LeaderboardEntry),
    Activity(Vec<ActivityEntry>),
    /// The mutation succeeded and has nothing to return.
    Done,
}

/// Wire form of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&CircleError> for ErrorBody {
    fn from(error: &CircleError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// The community engine: every component over one storage.
pub struct CommunityEngine {
    config: EngineConfig,
    registry: CircleRegistry,
    roles: RoleCapabilityTable,
    gating: Arc<GatingEngine>,
    members: MembershipManager,
    invites: InviteService,
    content: ContentInteractionTracker,
    leaderboard: LeaderboardEngine,
    activity: ActivityLog,
}

impl CommunityEngine {
    /// Assembles an engine from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] if `config` is invalid.
    pub fn new(
        storage: Arc<CircleStorage>,
        facts: Arc<dyn FactProvider>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let max_page = config.max_page_size;

        let gating = Arc::new(GatingEngine::new(
            Arc::clone(&storage),
            facts,
            Arc::clone(&clock),
            config.fact_timeout(),
        ));

        Ok(Self {
            registry: CircleRegistry::new(Arc::clone(&storage), Arc::clone(&clock), max_page),
            roles: RoleCapabilityTable::new(Arc::clone(&storage)),
            members: MembershipManager::new(
                Arc::clone(&storage),
                Arc::clone(&gating),
                Arc::clone(&clock),
                max_page,
            ),
            invites: InviteService::new(Arc::clone(&storage), Arc::clone(&clock), config.invite_ttl()),
            content: ContentInteractionTracker::new(
                Arc::clone(&storage),
                Arc::clone(&clock),
                config.scoring,
                max_page,
            ),
            leaderboard: LeaderboardEngine::new(
                Arc::clone(&storage),
                Arc::clone(&clock),
                config.scoring,
                max_page,
            ),
            activity: ActivityLog::new(storage, max_page),
            gating,
            config,
        })
    }

    /// Opens an engine on a database file with the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn open(path: &Path, facts: Arc<dyn FactProvider>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(CircleStorage::open(path, config.store_timeout())?);
        Self::new(storage, facts, Arc::new(SystemClock), config)
    }

    // ==================== Components ====================

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &CircleRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn roles(&self) -> &RoleCapabilityTable {
        &self.roles
    }

    #[must_use]
    pub fn gating(&self) -> &GatingEngine {
        &self.gating
    }

    #[must_use]
    pub const fn members(&self) -> &MembershipManager {
        &self.members
    }

    #[must_use]
    pub const fn invites(&self) -> &InviteService {
        &self.invites
    }

    #[must_use]
    pub const fn content(&self) -> &ContentInteractionTracker {
        &self.content
    }

    #[must_use]
    pub const fn leaderboard(&self) -> &LeaderboardEngine {
        &self.leaderboard
    }

    #[must_use]
    pub const fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    // ==================== Dispatch ====================

    /// Executes `request` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying component returns; see
    /// [`CircleError::kind`] for the stable classification.
    pub async fn handle(&self, caller: &str, request: Request) -> Result<Response> {
        if caller.trim().is_empty() {
            return Err(CircleError::InvalidData("caller identity is required".to_string()));
        }
        debug!(caller, op = request.op(), "handling request");

        match request {
            Request::Join { circle_id } => {
                Ok(Response::Join(self.members.join(caller, &circle_id).await?))
            }
            Request::CheckAccess { circle_id } => {
                Ok(Response::Access(self.gating.evaluate(caller, &circle_id).await?))
            }
            request => run_blocking(|| self.dispatch(caller, request)),
        }
    }

    /// Executes a request that only touches storage.
    #[allow(clippy::too_many_lines)]
    fn dispatch(&self, caller: &str, request: Request) -> Result<Response> {
        let response = match request {
            Request::CreateCircle { circle } => {
                Response::Circle(self.registry.create_circle(caller, circle)?)
            }
            Request::GetCircle { circle_id } => Response::Circle(self.registry.get(&circle_id)?),
            Request::GetCircleBySlug { slug } => {
                Response::Circle(self.registry.get_by_slug(&slug)?)
            }
            Request::ListCircles { filter } => Response::Circles(self.registry.list(&filter)?),
            Request::SearchCircles { query, limit } => {
                Response::Circles(self.registry.search(&query, limit)?)
            }
            Request::UpdateCircle { circle_id, update } => {
                Response::Circle(self.registry.update_circle(caller, &circle_id, update)?)
            }
            Request::GetRoleTable { circle_id } => {
                Response::RoleTable(self.roles.table(&circle_id)?)
            }

            Request::Leave { circle_id } => {
                self.members.leave(caller, &circle_id)?;
                Response::Done
            }
            Request::AssignRole {
                circle_id,
                target,
                role,
            } => Response::Membership(Some(
                self.members.assign_role(caller, &target, &circle_id, role)?,
            )),
            Request::RemoveMember { circle_id, target } => {
                self.members.remove_member(caller, &target, &circle_id)?;
                Response::Done
            }
            Request::GetMembership {
                circle_id,
                identity,
            } => Response::Membership(
                self.members
                    .membership(&circle_id, identity.as_deref().unwrap_or(caller))?,
            ),
            Request::ListMembers { circle_id, page } => {
                Response::Members(self.members.list_members(caller, &circle_id, page)?)
            }
            Request::MyCircles => Response::Circles(self.members.circles_for(caller)?),

            Request::AddRule {
                circle_id,
                rule_type,
                params,
            } => {
                let params = RuleParams::from_parts(&rule_type, &params)?;
                Response::Rule(self.gating.add_rule(caller, &circle_id, params)?)
            }
            Request::ListRules {
                circle_id,
                include_inactive,
            } => Response::Rules(self.gating.list_rules(&circle_id, include_inactive)?),
            Request::RemoveRule { circle_id, rule_id } => {
                self.gating.remove_rule(caller, &circle_id, &rule_id)?;
                Response::Done
            }
            Request::Join { .. } | Request::CheckAccess { .. } => {
                return Err(CircleError::InvalidData(format!(
                    "{} runs asynchronously through handle",
                    request.op()
                )));
            }

            Request::CreateInvite {
                circle_id,
                invited_address,
            } => Response::Invite(self.invites.create_invite(
                &circle_id,
                caller,
                invited_address.as_deref(),
            )?),
            Request::ListInvites { circle_id } => {
                Response::Invites(self.invites.list_invites(caller, &circle_id)?)
            }
            Request::RevokeInvite { code } => {
                self.invites.revoke_invite(caller, &code)?;
                Response::Done
            }
            Request::RedeemInvite { code } => {
                Response::Redeemed(self.invites.redeem_invite(&code, caller)?)
            }

            Request::CreatePost { circle_id, post } => {
                Response::Post(self.content.create_post(&circle_id, caller, post)?)
            }
            Request::AddComment {
                post_id,
                content,
                parent_comment_id,
            } => Response::Comment(self.content.add_comment(
                &post_id,
                caller,
                &content,
                parent_comment_id.as_ref(),
            )?),
            Request::Interact { post_id, kind } => {
                Response::Interaction(self.content.interact(&post_id, caller, kind)?)
            }
            Request::RemoveInteraction { post_id, kind } => {
                Response::Interaction(self.content.remove_interaction(&post_id, caller, kind)?)
            }
            Request::PinPost { post_id, pinned } => {
                Response::Post(self.content.pin_post(caller, &post_id, pinned)?)
            }
            Request::DeletePost { post_id } => {
                self.content.delete_post(caller, &post_id)?;
                Response::Done
            }
            Request::GetPost { post_id } => Response::Post(self.content.get_post(caller, &post_id)?),
            Request::ListPosts { circle_id, page } => {
                Response::Posts(self.content.list_posts(caller, &circle_id, page)?)
            }
            Request::ListComments { post_id, page } => {
                Response::Comments(self.content.list_comments(caller, &post_id, page)?)
            }

            Request::GetLeaderboard { circle_id, limit } => {
                Response::Leaderboard(self.leaderboard.leaderboard(caller, &circle_id, limit)?)
            }
            Request::GetRank {
                circle_id,
                identity,
            } => Response::Rank(
                self.leaderboard
                    .rank(caller, &circle_id, identity.as_deref().unwrap_or(caller))?,
            ),
            Request::Recompute {
                circle_id,
                identity,
            } => Response::Entry(
                self.leaderboard.recompute_points(
                    caller,
                    &circle_id,
                    identity.as_deref().unwrap_or(caller),
                )?,
            ),

            Request::GetActivity {
                circle_id,
                limit,
                before,
            } => Response::Activity(self.activity.recent(caller, &circle_id, limit, before)?),
        };
        Ok(response)
    }

    /// Decodes a JSON request, executes it and encodes the outcome.
    ///
    /// Success renders as `{"ok": <response>}` and failure as
    /// `{"error": {"kind", "message", "retryable"}}`.
    pub async fn handle_json(&self, caller: &str, body: &str) -> Value {
        let outcome = match serde_json::from_str::<Request>(body) {
            Ok(request) => self.handle(caller, request).await,
            Err(e) => Err(CircleError::InvalidData(format!("Malformed request: {e}"))),
        };
        match outcome {
            Ok(response) => serde_json::to_value(&response).map_or_else(
                |e| {
                    error_value(&CircleError::Storage(format!(
                        "Failed to encode response: {e}"
                    )))
                },
                |data| serde_json::json!({ "ok": data }),
            ),
            Err(e) => error_value(&e),
        }
    }
}

fn error_value(error: &CircleError) -> Value {
    serde_json::json!({ "error": ErrorBody::from(error) })
}

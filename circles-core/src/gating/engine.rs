//! Join gating evaluation and rule management.
//!
//! A circle's policy is the conjunction of its active rules. Facts are
//! fetched concurrently from the injected [`FactProvider`], each lookup
//! bounded by the configured timeout. Provider faults are returned as
//! errors and are never read as a failed rule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::facts::{FactError, FactProvider, FactResult};
use super::types::{AccessDecision, GatingRule, RuleParams, RuleType};
use crate::activity::{self, ActivityKind};
use crate::circle::roles::require_on;
use crate::circle::{Capability, CircleError, Result, Visibility};
use crate::clock::Clock;
use crate::ids::{CircleId, RuleId};
use crate::storage::{self, run_blocking, CircleStorage};

/// Reason given to non-members of invite-only circles.
pub const INVITE_ONLY_REASON: &str = "circle is invite only, redeem an invite to join";

/// Reason given to non-members of private circles without rules.
pub const PRIVATE_REASON: &str = "circle is private";

/// Evaluates join policies and manages gating rules.
pub struct GatingEngine {
    storage: Arc<CircleStorage>,
    facts: Arc<dyn FactProvider>,
    clock: Arc<dyn Clock>,
    fact_timeout: Duration,
}

impl GatingEngine {
    /// Creates a gating engine.
    #[must_use]
    pub fn new(
        storage: Arc<CircleStorage>,
        facts: Arc<dyn FactProvider>,
        clock: Arc<dyn Clock>,
        fact_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            facts,
            clock,
            fact_timeout,
        }
    }

    // ==================== Evaluation ====================

    /// Decides whether `identity` may join the circle.
    ///
    /// Active members are always granted. Denials carry one reason per
    /// failed rule.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle,
    /// [`CircleError::Timeout`] or [`CircleError::Provider`] when a fact
    /// lookup fails, and [`CircleError::Unverifiable`] when an NFT
    /// ownership lookup fails.
    pub async fn evaluate(&self, identity: &str, circle_id: &CircleId) -> Result<AccessDecision> {
        let (circle, is_member, rules) = run_blocking(|| {
            self.storage.read(|conn| {
                let circle = storage::circles::get_circle(conn, circle_id)?
                    .ok_or_else(|| CircleError::NotFound(format!("circle {circle_id}")))?;
                let is_member =
                    storage::memberships::get_active(conn, circle_id, identity)?.is_some();
                let rules = if is_member {
                    Vec::new()
                } else {
                    storage::gating::list_rules(conn, circle_id, true)?
                };
                Ok((circle, is_member, rules))
            })
        })?;

        if is_member {
            return Ok(AccessDecision::Granted);
        }

        if rules
            .iter()
            .any(|rule| rule.params.rule_type() == RuleType::InviteOnly)
        {
            debug!(circle_id = %circle_id, identity, "invite-only circle");
            return Ok(AccessDecision::Denied(vec![INVITE_ONLY_REASON.to_string()]));
        }

        if rules.is_empty() {
            return Ok(match circle.visibility {
                Visibility::Public => AccessDecision::Granted,
                Visibility::Private => AccessDecision::Denied(vec![PRIVATE_REASON.to_string()]),
            });
        }

        let outcomes = join_all(
            rules
                .iter()
                .map(|rule| self.check_rule(identity, &rule.params)),
        )
        .await;

        let mut reasons = Vec::new();
        for outcome in outcomes {
            if let Some(reason) = outcome? {
                reasons.push(reason);
            }
        }

        if reasons.is_empty() {
            Ok(AccessDecision::Granted)
        } else {
            debug!(
                circle_id = %circle_id,
                identity,
                failed = reasons.len(),
                "access denied"
            );
            Ok(AccessDecision::Denied(reasons))
        }
    }

    /// Boolean form of [`GatingEngine::evaluate`].
    ///
    /// # Errors
    ///
    /// Same as [`GatingEngine::evaluate`]; a lookup failure is an error,
    /// never `false`.
    pub async fn can_access(&self, identity: &str, circle_id: &CircleId) -> Result<bool> {
        Ok(self.evaluate(identity, circle_id).await?.is_granted())
    }

    /// Checks one rule. `None` means it passed.
    async fn check_rule(&self, identity: &str, params: &RuleParams) -> Result<Option<String>> {
        let rule = params.rule_type();
        let facts = &self.facts;
        let reason = match params {
            RuleParams::Badge { badge_id } => {
                let held = self.lookup(rule, facts.has_badge(identity, badge_id)).await?;
                (!held).then(|| format!("requires badge {badge_id}"))
            }
            RuleParams::Nft { contract_address } => {
                let owned = self
                    .lookup(rule, facts.owns_nft(identity, contract_address))
                    .await?;
                (!owned).then(|| format!("requires an NFT from {contract_address}"))
            }
            RuleParams::FollowerCount { min_followers } => {
                let count = self.lookup(rule, facts.follower_count(identity)).await?;
                (count < *min_followers)
                    .then(|| format!("requires {min_followers}+ followers, you have {count}"))
            }
            RuleParams::BadgePoints { min_points } => {
                let points = self.lookup(rule, facts.badge_points(identity)).await?;
                (points < *min_points)
                    .then(|| format!("requires {min_points}+ badge points, you have {points}"))
            }
            RuleParams::TokenBalance {
                token_address,
                min_balance,
            } => {
                let balance = self
                    .lookup(rule, facts.token_balance(identity, token_address))
                    .await?;
                (balance < *min_balance).then(|| {
                    format!("requires {min_balance}+ of token {token_address}, you have {balance}")
                })
            }
            RuleParams::Verification => {
                let verified = self.lookup(rule, facts.is_verified(identity)).await?;
                (!verified).then(|| "requires a verified account".to_string())
            }
            RuleParams::InviteOnly => Some(INVITE_ONLY_REASON.to_string()),
        };
        Ok(reason)
    }

    /// Runs one fact lookup under the timeout and classifies failures.
    async fn lookup<T>(
        &self,
        rule: RuleType,
        query: impl Future<Output = FactResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.fact_timeout, query).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(FactError::Unavailable(reason))) => {
                warn!(rule = rule.as_str(), %reason, "fact lookup failed");
                if rule == RuleType::Nft {
                    Err(CircleError::Unverifiable {
                        rule: rule.as_str(),
                        reason,
                    })
                } else {
                    Err(CircleError::Provider(format!("{} lookup: {reason}", rule.as_str())))
                }
            }
            Err(_) => {
                warn!(
                    rule = rule.as_str(),
                    timeout_ms = self.fact_timeout.as_millis(),
                    "fact lookup timed out"
                );
                Err(CircleError::Timeout(format!(
                    "{} lookup exceeded {}ms",
                    rule.as_str(),
                    self.fact_timeout.as_millis()
                )))
            }
        }
    }

    // ==================== Rule Management ====================

    /// Attaches a rule to a circle.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] for invalid parameters and
    /// [`CircleError::Forbidden`] unless `acting` can manage roles.
    pub fn add_rule(
        &self,
        acting: &str,
        circle_id: &CircleId,
        params: RuleParams,
    ) -> Result<GatingRule> {
        params.validate()?;
        let rule = GatingRule {
            id: RuleId::generate(),
            circle_id: circle_id.clone(),
            params,
            active: true,
            created_by: acting.to_string(),
            created_at: self.clock.now(),
        };

        self.storage.write(|tx| {
            require_on(tx, circle_id, acting, Capability::ManageRoles)?;
            storage::gating::insert_rule(tx, &rule)?;
            activity::record(
                tx,
                circle_id,
                acting,
                ActivityKind::RuleAdded,
                Some(rule.id.as_str()),
                rule.created_at,
            )?;
            Ok(())
        })?;

        info!(
            circle_id = %circle_id,
            rule_id = %rule.id,
            rule_type = rule.params.rule_type().as_str(),
            "gating rule added"
        );
        Ok(rule)
    }

    /// Rules of a circle in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle.
    pub fn list_rules(&self, circle_id: &CircleId, include_inactive: bool) -> Result<Vec<GatingRule>> {
        self.storage.read(|conn| {
            if storage::circles::get_circle(conn, circle_id)?.is_none() {
                return Err(CircleError::NotFound(format!("circle {circle_id}")));
            }
            storage::gating::list_rules(conn, circle_id, !include_inactive)
        })
    }

    /// Deactivates a rule.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::Forbidden`] unless `acting` can manage roles
    /// and [`CircleError::NotFound`] if no such active rule exists.
    pub fn remove_rule(&self, acting: &str, circle_id: &CircleId, rule_id: &RuleId) -> Result<()> {
        let now = self.clock.now();
        self.storage.write(|tx| {
            require_on(tx, circle_id, acting, Capability::ManageRoles)?;
            if !storage::gating::deactivate_rule(tx, circle_id, rule_id)? {
                return Err(CircleError::NotFound(format!("active rule {rule_id}")));
            }
            activity::record(
                tx,
                circle_id,
                acting,
                ActivityKind::RuleRemoved,
                Some(rule_id.as_str()),
                now,
            )?;
            Ok(())
        })?;
        info!(circle_id = %circle_id, rule_id = %rule_id, "gating rule removed");
        Ok(())
    }
}

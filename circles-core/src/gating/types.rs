//! Gating rule types and access decisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::circle::{CircleError, Result};
use crate::ids::{CircleId, RuleId};

/// Kind of a gating rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Badge,
    Nft,
    FollowerCount,
    BadgePoints,
    TokenBalance,
    Verification,
    InviteOnly,
}

impl RuleType {
    /// Converts to string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Badge => "badge",
            Self::Nft => "nft",
            Self::FollowerCount => "follower_count",
            Self::BadgePoints => "badge_points",
            Self::TokenBalance => "token_balance",
            Self::Verification => "verification",
            Self::InviteOnly => "invite_only",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "badge" => Some(Self::Badge),
            "nft" => Some(Self::Nft),
            "follower_count" => Some(Self::FollowerCount),
            "badge_points" => Some(Self::BadgePoints),
            "token_balance" => Some(Self::TokenBalance),
            "verification" => Some(Self::Verification),
            "invite_only" => Some(Self::InviteOnly),
            _ => None,
        }
    }
}

/// Typed parameters of a gating rule.
///
/// The serialized form is `{"rule_type": "...", ...params}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum RuleParams {
    /// Holder of a specific badge.
    Badge { badge_id: String },
    /// Owner of at least one token of an NFT contract.
    Nft { contract_address: String },
    /// At least `min_followers` followers.
    FollowerCount { min_followers: u64 },
    /// At least `min_points` badge points.
    BadgePoints { min_points: u64 },
    /// Balance of `token_address` of at least `min_balance` base units.
    TokenBalance {
        token_address: String,
        #[serde(with = "decimal_u128")]
        min_balance: u128,
    },
    /// Verified identity.
    Verification,
    /// Only reachable through invite redemption.
    InviteOnly,
}

impl RuleParams {
    /// Returns the rule kind.
    #[must_use]
    pub const fn rule_type(&self) -> RuleType {
        match self {
            Self::Badge { .. } => RuleType::Badge,
            Self::Nft { .. } => RuleType::Nft,
            Self::FollowerCount { .. } => RuleType::FollowerCount,
            Self::BadgePoints { .. } => RuleType::BadgePoints,
            Self::TokenBalance { .. } => RuleType::TokenBalance,
            Self::Verification => RuleType::Verification,
            Self::InviteOnly => RuleType::InviteOnly,
        }
    }

    /// Builds typed parameters from an untyped rule type and JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] if the type is unknown or the
    /// parameters do not match it.
    pub fn from_parts(rule_type: &str, params: &Value) -> Result<Self> {
        let kind = RuleType::parse(rule_type)
            .ok_or_else(|| CircleError::InvalidData(format!("Unknown rule type: {rule_type}")))?;

        let mut object = match params {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(CircleError::InvalidData(format!(
                    "Parameters for {rule_type} must be an object"
                )))
            }
        };
        object.insert("rule_type".to_string(), Value::String(kind.as_str().to_string()));

        let parsed: Self = serde_json::from_value(Value::Object(object)).map_err(|e| {
            CircleError::InvalidData(format!("Invalid parameters for {rule_type}: {e}"))
        })?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Checks type-specific constraints.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] for empty identifiers or zero
    /// thresholds.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CircleError::InvalidData(msg.to_string()));
        match self {
            Self::Badge { badge_id } if badge_id.trim().is_empty() => {
                invalid("badge rule requires a badge_id")
            }
            Self::Nft { contract_address } if contract_address.trim().is_empty() => {
                invalid("nft rule requires a contract_address")
            }
            Self::FollowerCount { min_followers: 0 } => {
                invalid("follower_count rule requires a threshold above zero")
            }
            Self::BadgePoints { min_points: 0 } => {
                invalid("badge_points rule requires a threshold above zero")
            }
            Self::TokenBalance { token_address, .. } if token_address.trim().is_empty() => {
                invalid("token_balance rule requires a token_address")
            }
            Self::TokenBalance { min_balance: 0, .. } => {
                invalid("token_balance rule requires a threshold above zero")
            }
            _ => Ok(()),
        }
    }
}

/// Serializes `u128` balances as decimal strings.
///
/// Internally tagged enums buffer their content, and that buffer has no
/// 128-bit integer support, so balances travel as strings. Plain JSON
/// numbers are still accepted on input.
mod decimal_u128 {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct DecimalVisitor;

        impl Visitor<'_> for DecimalVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(u128::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                u128::try_from(v).map_err(|_| E::custom("balance must not be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.trim().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DecimalVisitor)
    }
}

/// A gating rule attached to a circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatingRule {
    pub id: RuleId,
    pub circle_id: CircleId,
    #[serde(flatten)]
    pub params: RuleParams,
    pub active: bool,
    /// Identity that added the rule.
    pub created_by: String,
    pub created_at: i64,
}

/// Outcome of evaluating a circle's access policy for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reasons", rename_all = "snake_case")]
pub enum AccessDecision {
    /// Every active rule passed.
    Granted,
    /// At least one rule failed; one human-readable reason per failure.
    Denied(Vec<String>),
}

impl AccessDecision {
    /// Returns whether access is granted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// Returns the denial reasons (empty when granted).
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Granted => &[],
            Self::Denied(reasons) => reasons,
        }
    }
}

//! Join gating.
//!
//! Circles restrict who may join with a set of rules (badges, NFTs,
//! follower counts, badge points, token balances, verification, invite
//! only). All active rules must pass. Facts about identities come from an
//! external [`FactProvider`].

mod engine;
mod facts;
mod types;

pub use engine::{GatingEngine, INVITE_ONLY_REASON, PRIVATE_REASON};
#[cfg(any(test, feature = "test-utils"))]
pub use facts::StaticFacts;
pub use facts::{FactError, FactProvider, FactResult};
pub use types::{AccessDecision, GatingRule, RuleParams, RuleType};

//! Engine configuration.
//!
//! All fields have defaults, so an empty JSON object is a valid
//! configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circle::{CircleError, Result};

/// Thirty days, in seconds.
pub const DEFAULT_INVITE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Default bound on a single fact provider or storage call.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Largest weight a single activity may carry.
pub const MAX_WEIGHT: i64 = 1_000_000;

/// Points awarded per counted activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Points per authored post.
    pub post: i64,
    /// Points per authored comment.
    pub comment: i64,
    /// Points per like received on own posts.
    pub like: i64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            post: 10,
            comment: 5,
            like: 2,
        }
    }
}

impl ScoringWeights {
    /// Computes a point total from raw counts, saturating at the `i64` bounds.
    #[must_use]
    pub const fn score(&self, posts: i64, comments: i64, likes_received: i64) -> i64 {
        posts
            .saturating_mul(self.post)
            .saturating_add(comments.saturating_mul(self.comment))
            .saturating_add(likes_received.saturating_mul(self.like))
    }

    /// Checks that every weight lies in `0..=MAX_WEIGHT`.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] naming the first weight out of range.
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in [("post", self.post), ("comment", self.comment), ("like", self.like)] {
            if !(0..=MAX_WEIGHT).contains(&weight) {
                return Err(CircleError::InvalidData(format!(
                    "scoring weight {name} must be between 0 and {MAX_WEIGHT}, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on each fact provider call, in milliseconds.
    pub fact_timeout_ms: u64,
    /// How long storage waits on a locked database, in milliseconds.
    pub store_timeout_ms: u64,
    /// Default invite lifetime, in seconds.
    pub invite_ttl_secs: u64,
    /// Largest page any list operation returns.
    pub max_page_size: u32,
    /// Leaderboard point weights.
    pub scoring: ScoringWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fact_timeout_ms: DEFAULT_TIMEOUT_MS,
            store_timeout_ms: DEFAULT_TIMEOUT_MS,
            invite_ttl_secs: DEFAULT_INVITE_TTL_SECS,
            max_page_size: 100,
            scoring: ScoringWeights::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON, filling in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] if the JSON is malformed or a
    /// value is out of range.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CircleError::InvalidData(format!("Invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] for zero timeouts, TTL or page
    /// size, and for scoring weights out of range.
    pub fn validate(&self) -> Result<()> {
        if self.fact_timeout_ms == 0 || self.store_timeout_ms == 0 {
            return Err(CircleError::InvalidData(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.invite_ttl_secs == 0 {
            return Err(CircleError::InvalidData(
                "invite_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_page_size == 0 {
            return Err(CircleError::InvalidData(
                "max_page_size must be greater than zero".to_string(),
            ));
        }
        self.scoring.validate()
    }

    /// Fact provider timeout.
    #[must_use]
    pub const fn fact_timeout(&self) -> Duration {
        Duration::from_millis(self.fact_timeout_ms)
    }

    /// Storage busy timeout.
    #[must_use]
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Invite lifetime in seconds, saturated to `i64`.
    #[must_use]
    pub fn invite_ttl(&self) -> i64 {
        i64::try_from(self.invite_ttl_secs).unwrap_or(i64::MAX)
    }

    /// Sets the fact provider timeout.
    #[must_use]
    pub fn with_fact_timeout(mut self, timeout: Duration) -> Self {
        self.fact_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the invite lifetime.
    #[must_use]
    pub const fn with_invite_ttl_secs(mut self, secs: u64) -> Self {
        self.invite_ttl_secs = secs;
        self
    }

    /// Sets the scoring weights.
    #[must_use]
    pub const fn with_scoring(mut self, scoring: ScoringWeights) -> Self {
        self.scoring = scoring;
        self
    }
}

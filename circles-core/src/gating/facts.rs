//! Read-only access to external identity facts.
//!
//! The gating engine never computes badges, balances or follower counts
//! itself; it asks a [`FactProvider`] injected at construction time.

use async_trait::async_trait;
use thiserror::Error;

/// Failure of a fact lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactError {
    /// The backing service could not answer (network, RPC, rate limit).
    #[error("fact source unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for fact lookups.
pub type FactResult<T> = std::result::Result<T, FactError>;

/// Answers questions about an identity held by external systems.
///
/// Implementations must be cheap to share across tasks; the engine holds
/// them behind an `Arc` and may issue several queries concurrently.
#[async_trait]
pub trait FactProvider: Send + Sync {
    /// Whether `address` holds badge `badge_id`.
    async fn has_badge(&self, address: &str, badge_id: &str) -> FactResult<bool>;

    /// Whether `address` owns at least one token of NFT `contract_address`.
    async fn owns_nft(&self, address: &str, contract_address: &str) -> FactResult<bool>;

    /// Number of followers of `address`.
    async fn follower_count(&self, address: &str) -> FactResult<u64>;

    /// Total badge points of `address`.
    async fn badge_points(&self, address: &str) -> FactResult<u64>;

    /// Balance of `token_address` held by `address`, in base units.
    async fn token_balance(&self, address: &str, token_address: &str) -> FactResult<u128>;

    /// Whether `address` is verified.
    async fn is_verified(&self, address: &str) -> FactResult<bool>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use static_facts::StaticFacts;

#[cfg(any(test, feature = "test-utils"))]
mod static_facts {
    use std::collections::{HashMap, HashSet};
    use std::sync::RwLock;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{FactError, FactProvider, FactResult};

    #[derive(Default)]
    struct Facts {
        badges: HashSet<(String, String)>,
        nfts: HashSet<(String, String)>,
        followers: HashMap<String, u64>,
        badge_points: HashMap<String, u64>,
        balances: HashMap<(String, String), u128>,
        verified: HashSet<String>,
        nft_outage: Option<String>,
        outage: Option<String>,
        delay: Option<Duration>,
    }

    /// In-memory [`FactProvider`] for tests.
    ///
    /// Unknown facts default to "absent" (no badge, zero followers).
    #[derive(Default)]
    pub struct StaticFacts {
        inner: RwLock<Facts>,
    }

    impl StaticFacts {
        /// Creates an empty fact set.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn update(&self, f: impl FnOnce(&mut Facts)) {
            let mut facts = self
                .inner
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&mut facts);
        }

        fn read<T>(&self, f: impl FnOnce(&Facts) -> T) -> T {
            let facts = self
                .inner
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&facts)
        }

        /// Grants a badge.
        pub fn grant_badge(&self, address: &str, badge_id: &str) {
            self.update(|f| {
                f.badges.insert((address.to_string(), badge_id.to_string()));
            });
        }

        /// Grants ownership of an NFT.
        pub fn grant_nft(&self, address: &str, contract_address: &str) {
            self.update(|f| {
                f.nfts
                    .insert((address.to_string(), contract_address.to_string()));
            });
        }

        /// Sets the follower count.
        pub fn set_followers(&self, address: &str, count: u64) {
            self.update(|f| {
                f.followers.insert(address.to_string(), count);
            });
        }

        /// Sets the badge points.
        pub fn set_badge_points(&self, address: &str, points: u64) {
            self.update(|f| {
                f.badge_points.insert(address.to_string(), points);
            });
        }

        /// Sets a token balance.
        pub fn set_balance(&self, address: &str, token_address: &str, balance: u128) {
            self.update(|f| {
                f.balances
                    .insert((address.to_string(), token_address.to_string()), balance);
            });
        }

        /// Marks an address as verified.
        pub fn verify(&self, address: &str) {
            self.update(|f| {
                f.verified.insert(address.to_string());
            });
        }

        /// Makes NFT lookups fail with the given reason.
        pub fn fail_nft_lookups(&self, reason: &str) {
            self.update(|f| f.nft_outage = Some(reason.to_string()));
        }

        /// Makes every lookup fail with the given reason.
        pub fn fail_all(&self, reason: &str) {
            self.update(|f| f.outage = Some(reason.to_string()));
        }

        /// Delays every lookup.
        pub fn set_delay(&self, delay: Duration) {
            self.update(|f| f.delay = Some(delay));
        }

        async fn gate(&self) -> FactResult<()> {
            let (delay, outage) = self.read(|f| (f.delay, f.outage.clone()));
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outage.map_or(Ok(()), |reason| Err(FactError::Unavailable(reason)))
        }
    }

    #[async_trait]
    impl FactProvider for StaticFacts {
        async fn has_badge(&self, address: &str, badge_id: &str) -> FactResult<bool> {
            self.gate().await?;
            Ok(self.read(|f| {
                f.badges
                    .contains(&(address.to_string(), badge_id.to_string()))
            }))
        }

        async fn owns_nft(&self, address: &str, contract_address: &str) -> FactResult<bool> {
            self.gate().await?;
            self.read(|f| match &f.nft_outage {
                Some(reason) => Err(FactError::Unavailable(reason.clone())),
                None => Ok(f
                    .nfts
                    .contains(&(address.to_string(), contract_address.to_string()))),
            })
        }

        async fn follower_count(&self, address: &str) -> FactResult<u64> {
            self.gate().await?;
            Ok(self.read(|f| f.followers.get(address).copied().unwrap_or(0)))
        }

        async fn badge_points(&self, address: &str) -> FactResult<u64> {
            self.gate().await?;
            Ok(self.read(|f| f.badge_points.get(address).copied().unwrap_or(0)))
        }

        async fn token_balance(&self, address: &str, token_address: &str) -> FactResult<u128> {
            self.gate().await?;
            Ok(self.read(|f| {
                f.balances
                    .get(&(address.to_string(), token_address.to_string()))
                    .copied()
                    .unwrap_or(0)
            }))
        }

        async fn is_verified(&self, address: &str) -> FactResult<bool> {
            self.gate().await?;
            Ok(self.read(|f| f.verified.contains(address)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_facts_default_to_absent() {
        let facts = StaticFacts::new();
        assert!(!facts.has_badge("alice", "og").await.unwrap());
        assert_eq!(facts.follower_count("alice").await.unwrap(), 0);
        assert_eq!(facts.token_balance("alice", "0xt").await.unwrap(), 0);
        assert!(!facts.is_verified("alice").await.unwrap());
    }

    #[tokio::test]
    async fn static_facts_return_configured_values() {
        let facts = StaticFacts::new();
        facts.grant_badge("alice", "og");
        facts.set_followers("alice", 42);
        facts.set_balance("alice", "0xt", 7);
        facts.verify("alice");

        assert!(facts.has_badge("alice", "og").await.unwrap());
        assert!(!facts.has_badge("bob", "og").await.unwrap());
        assert_eq!(facts.follower_count("alice").await.unwrap(), 42);
        assert_eq!(facts.token_balance("alice", "0xt").await.unwrap(), 7);
        assert!(facts.is_verified("alice").await.unwrap());
    }

    #[tokio::test]
    async fn nft_outage_only_affects_nft_lookups() {
        let facts = StaticFacts::new();
        facts.fail_nft_lookups("rpc down");
        assert_eq!(
            facts.owns_nft("alice", "0xnft").await,
            Err(FactError::Unavailable("rpc down".to_string()))
        );
        assert!(facts.follower_count("alice").await.is_ok());
    }
}

//! Reusable test helpers for engine integration tests.
//!
//! Every [`TestEnv`] owns its own in-memory database, a [`StaticFacts`]
//! provider that tests configure directly, and a [`ManualClock`] starting
//! at [`START`].

#![allow(dead_code)]

use std::sync::Arc;

use circles_core::circle::{Circle, NewCircle};
use circles_core::clock::ManualClock;
use circles_core::gating::StaticFacts;
use circles_core::{CircleStorage, CommunityEngine, EngineConfig};

/// Initial clock value for every environment.
pub const START: i64 = 1_700_000_000;

/// One day in seconds.
pub const DAY: i64 = 24 * 60 * 60;

/// An engine plus handles to its test doubles.
pub struct TestEnv {
    pub engine: Arc<CommunityEngine>,
    pub facts: Arc<StaticFacts>,
    pub clock: Arc<ManualClock>,
}

/// Creates an environment with the default configuration.
pub fn test_env() -> TestEnv {
    test_env_with_config(EngineConfig::default())
}

/// Creates an environment with a custom configuration.
pub fn test_env_with_config(config: EngineConfig) -> TestEnv {
    let storage = Arc::new(CircleStorage::in_memory().expect("in-memory storage"));
    test_env_on(storage, config)
}

/// Creates an environment over existing storage.
pub fn test_env_on(storage: Arc<CircleStorage>, config: EngineConfig) -> TestEnv {
    let facts = Arc::new(StaticFacts::new());
    let clock = Arc::new(ManualClock::new(START));
    let engine = CommunityEngine::new(storage, facts.clone(), clock.clone(), config)
        .expect("valid engine config");
    TestEnv {
        engine: Arc::new(engine),
        facts,
        clock,
    }
}

impl TestEnv {
    /// Creates a circle owned by `creator`.
    pub fn create_circle(&self, creator: &str, new_circle: NewCircle) -> Circle {
        self.engine
            .registry()
            .create_circle(creator, new_circle)
            .expect("circle creation should succeed")
    }

    /// Current member count of a circle.
    pub fn member_count(&self, circle: &Circle) -> i64 {
        self.engine
            .registry()
            .get(&circle.id)
            .expect("circle exists")
            .member_count
    }
}

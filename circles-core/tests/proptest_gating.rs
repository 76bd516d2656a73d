//! Property-based tests for gating and slug generation.

mod helpers;

use circles_core::circle::{slugify, NewCircle};
use circles_core::gating::RuleParams;
use helpers::test_env;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Access is granted exactly when every active rule passes.
    #[test]
    fn access_is_conjunction_of_rules(
        followers in 0u64..1_000,
        thresholds in prop::collection::vec(1u64..1_000, 0..5),
        needs_badge in any::<bool>(),
        has_badge in any::<bool>(),
    ) {
        let env = test_env();
        let circle = env.create_circle("alice", NewCircle::new("Prop Circle"));
        env.facts.set_followers("bob", followers);
        if has_badge {
            env.facts.grant_badge("bob", "og");
        }

        let mut expected = true;
        for min_followers in &thresholds {
            env.engine
                .gating()
                .add_rule("alice", &circle.id, RuleParams::FollowerCount { min_followers: *min_followers })
                .unwrap();
            expected &= followers >= *min_followers;
        }
        if needs_badge {
            env.engine
                .gating()
                .add_rule("alice", &circle.id, RuleParams::Badge { badge_id: "og".to_string() })
                .unwrap();
            expected &= has_badge;
        }

        let decision = runtime()
            .block_on(env.engine.gating().evaluate("bob", &circle.id))
            .unwrap();
        prop_assert_eq!(decision.is_granted(), expected);
        prop_assert_eq!(decision.reasons().is_empty(), expected);

        // The creator is an active member and always passes.
        let creator = runtime()
            .block_on(env.engine.gating().can_access("alice", &circle.id))
            .unwrap();
        prop_assert!(creator);
    }

    #[test]
    fn slugs_are_url_safe(name in "\\PC{0,60}") {
        let slug = slugify(&name);
        prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert!(!slug.starts_with('-'));
        prop_assert!(!slug.ends_with('-'));
        prop_assert!(!slug.contains("--"));
        prop_assert_eq!(slugify(&slug), slug);
    }
}

//! Shared fixtures for tagkeep integration tests
//!
//! Provides a scriptable persistence backend, a seeded random classifier,
//! and helpers for wiring a session around them.

#![allow(dead_code)]

pub mod classifier;
pub mod scripted;

pub use classifier::RandomClassifier;
pub use scripted::ScriptedPersistence;

use std::sync::Arc;
use tagkeep::{
    ClassifierGateway, MockClassifier, Persistence, TagkeepApi, TagkeepConfig, UserId,
};

pub fn alice() -> UserId {
    UserId::from_string("alice")
}

/// Config with no automatic classification and no resync after commits,
/// so tests observe exactly the deltas they cause
pub fn quiet_config() -> TagkeepConfig {
    let mut config = TagkeepConfig::default();
    config.engine.classify_on_create = false;
    config.engine.resync_after_commit = false;
    config
}

pub async fn session(
    persistence: Arc<dyn Persistence>,
    classifier: Arc<dyn ClassifierGateway>,
    config: &TagkeepConfig,
) -> TagkeepApi {
    TagkeepApi::open(alice(), persistence, classifier, config)
        .await
        .expect("session opens")
}

pub async fn quiet_session(persistence: Arc<dyn Persistence>) -> TagkeepApi {
    session(
        persistence,
        Arc::new(MockClassifier::returning(vec![])),
        &quiet_config(),
    )
    .await
}

/// Yield until `done` holds. Spawned tasks on the current-thread runtime
/// only make progress while the test task is yielding.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Let spawned tasks run until they block
pub async fn drain() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

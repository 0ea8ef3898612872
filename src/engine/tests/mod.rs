use super::*;
use crate::storage::MemoryStore;
use yare::parameterized;

mod update;

fn ctx(s: &str) -> ContextSet {
    s.parse().unwrap()
}

fn subject(s: &str) -> SubjectIdentity {
    s.parse().unwrap()
}

fn global() -> ContextSet {
    ContextSet::global()
}

fn engine_with<I>(cache_enabled: bool, subjects: I) -> PermissionEngine
where
    I: IntoIterator<Item = (SubjectIdentity, SubjectData)>,
{
    let config = EngineConfig::default().with_cache_enabled(cache_enabled);
    PermissionEngine::with_config(Arc::new(MemoryStore::with_subjects(subjects)), config)
}

/// `player:alice` has no `build` entry. In the nether the player inherits
/// from `group:vip` (allow), everywhere from `group:default` (deny).
fn alice_fixture() -> Vec<(SubjectIdentity, SubjectData)> {
    vec![
        (
            subject("player:alice"),
            SubjectData::empty()
                .add_parent(&ctx("world=nether"), &subject("group:vip"))
                .add_parent(&global(), &subject("group:default"))
                .set_option(&global(), "prefix", Some("[A]")),
        ),
        (
            subject("group:vip"),
            SubjectData::empty()
                .set_permission(&global(), "build", 1)
                .set_option(&global(), "suffix", Some("*"))
                .add_parent(&global(), &subject("group:default")),
        ),
        (
            subject("group:default"),
            SubjectData::empty()
                .set_permission(&global(), "build", -1)
                .set_permission(&global(), "chat", 1),
        ),
    ]
}

#[parameterized(cached = { true }, uncached = { false })]
#[test_macro(tokio::test)]
async fn test_engine_config_controls_cache(cache_enabled: bool) {
    let engine = engine_with(cache_enabled, alice_fixture());
    assert_eq!(engine.config().cache_enabled, cache_enabled);

    engine
        .resolve(&subject("player:alice"), "build", &global())
        .await
        .unwrap();
    assert_eq!(engine.cache_len() > 0, cache_enabled);

    engine.invalidate_all();
    assert_eq!(engine.cache_len(), 0);
}

#[tokio::test]
async fn test_engine_is_shared_between_clones() {
    let engine = engine_with(true, alice_fixture());
    let clone = engine.clone();

    clone
        .update(&subject("player:bob"), |data| {
            data.set_permission(&global(), "fly", 2)
        })
        .await
        .unwrap();
    assert_eq!(
        engine.resolve(&subject("player:bob"), "fly", &global()).await.unwrap(),
        2
    );
}

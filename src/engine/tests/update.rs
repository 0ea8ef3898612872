use super::*;
use crate::reference::UpdatePolicy;

const WRITERS: usize = 32;

fn counter(data: &SubjectData) -> Weight {
    data.segment(&ContextSet::global())
        .map_or(0, |segment| segment.permission("counter"))
}

async fn run_concurrent_increments(cache_enabled: bool) {
    let config = EngineConfig::default()
        .with_cache_enabled(cache_enabled)
        .with_max_update_retries(10_000);
    let engine = PermissionEngine::with_config(Arc::new(MemoryStore::new()), config);
    let target = subject("group:counter");

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let engine = engine.clone();
            let target = target.clone();
            tokio::spawn(async move {
                engine
                    .update(&target, |data| {
                        data.set_permission(&ContextSet::global(), "counter", counter(data) + 1)
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        engine.resolve(&target, "counter", &global()).await.unwrap(),
        WRITERS as Weight
    );
    assert_eq!(counter(&engine.data(&target).await.unwrap()), WRITERS as Weight);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_lose_nothing_cached() {
    run_concurrent_increments(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_lose_nothing_uncached() {
    run_concurrent_increments(false).await;
}

#[tokio::test]
async fn test_engine_applies_retry_policy() {
    let engine = PermissionEngine::with_config(
        Arc::new(MemoryStore::new()),
        EngineConfig::default().with_max_update_retries(3),
    );
    let reference = engine.subject(subject("player:alice"));
    assert_eq!(
        format!("{reference:?}"),
        format!(
            "SubjectRef {{ identity: {:?}, cached: true, policy: {:?} }}",
            subject("player:alice"),
            UpdatePolicy { max_retries: 3 }
        )
    );
}

#[parameterized(cached = { true }, uncached = { false })]
#[test_macro(tokio::test)]
async fn test_rejected_transform_leaves_resolution_unchanged(cache_enabled: bool) {
    let engine = engine_with(cache_enabled, alice_fixture());
    let alice = subject("player:alice");

    let result = engine
        .try_update(&alice, |data| {
            if data.parents(&global()).is_empty() {
                Ok(data.clone())
            } else {
                Err("subject still has parents")
            }
        })
        .await;

    assert_eq!(
        result,
        Err(PermissionsError::InvalidTransform(
            "subject still has parents".to_string()
        ))
    );
    assert_eq!(engine.resolve(&alice, "build", &global()).await.unwrap(), -1);
}

#[tokio::test]
async fn test_continuation_observes_committed_data() {
    let engine = engine_with(true, alice_fixture());
    let alice = subject("player:alice");

    let message = engine
        .update(&alice, |data| data.set_permission(&global(), "fly", 1))
        .await
        .map(|data| format!("fly is now {}", data.permissions(&global()).map_or(0, |p| p["fly"])))
        .unwrap();

    assert_eq!(message, "fly is now 1");
    assert!(engine.has_permission(&alice, "fly", &global()).await.unwrap());
}

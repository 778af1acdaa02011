//! Tests against a live Redis-compatible server at 127.0.0.1:6379
//!
//! Run with `cargo test -p keylatch-core -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use keylatch_core::{
    ExecutionMode, Keylatch, KvStore, LockError, ModePreference, RedisStore, StoreConfig,
};

fn unique_key(prefix: &str) -> String {
    format!("keylatch:test:{}:{}", prefix, rand::random::<u32>())
}

fn keylatch(preference: ModePreference) -> (Arc<RedisStore>, Keylatch) {
    let store = Arc::new(RedisStore::new(StoreConfig::default()));
    let keylatch = Keylatch::builder()
        .store(store.clone())
        .execution_mode(preference)
        .build();
    (store, keylatch)
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_negotiates_against_server() -> anyhow::Result<()> {
    let (store, keylatch) = keylatch(ModePreference::Auto);
    store.ping().await?;
    let mode = keylatch.negotiate().await;
    assert_ne!(mode, ExecutionMode::Uninitialized);
    Ok(())
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_compare_primitives_each_mode() -> anyhow::Result<()> {
    for preference in [
        ModePreference::Function,
        ModePreference::Script,
        ModePreference::Eval,
    ] {
        let (store, keylatch) = keylatch(preference);
        let key = unique_key("cas");

        store.set(&key, "a", None).await?;
        assert!(keylatch.compare_and_swap(&key, "a", "b").await?);
        assert!(!keylatch.compare_and_swap(&key, "a", "c").await?);
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("b"));

        assert!(
            keylatch
                .compare_and_expire(&key, "b", Duration::from_secs(30))
                .await?
        );
        assert!(store.time_to_live(&key).await.unwrap().remaining().is_some());

        assert!(keylatch.compare_and_delete(&key, "b").await?);
        assert!(keylatch.compare_and_delete(&key, "b").await?);
        assert!(!store.exists(&key).await?);
    }
    Ok(())
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_lock_lifecycle() -> anyhow::Result<()> {
    let (store, keylatch) = keylatch(ModePreference::Auto);
    let key = unique_key("lock");

    let guard = keylatch
        .acquire_auto_lock(&key, Duration::from_secs(10))
        .await?;
    assert_eq!(
        keylatch
            .acquire_auto_lock(&key, Duration::from_secs(10))
            .await
            .unwrap_err(),
        LockError::held_by_another(key.clone())
    );

    guard.renew(Duration::from_secs(20)).await?;
    guard.verify().await?;
    guard.release().await?;
    guard.release().await?;
    assert!(!store.exists(&key).await?);
    Ok(())
}

#[tokio::test]
#[ignore = "requires running redis"]
async fn test_ownership_loss() -> anyhow::Result<()> {
    let (_store, keylatch) = keylatch(ModePreference::Auto);
    let key = unique_key("expiry");

    let original = keylatch
        .acquire_auto_lock(&key, Duration::from_secs(1))
        .await?;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let usurper = keylatch
        .acquire_auto_lock(&key, Duration::from_secs(10))
        .await?;

    assert!(original.release().await.unwrap_err().is_held_by_another());
    usurper.release().await?;
    Ok(())
}

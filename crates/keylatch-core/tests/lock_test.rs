//! Distributed lock lifecycle under every execution mode

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MODES, keylatch_in};
use keylatch_core::{
    Keylatch, KvStore, LockError, MemoryStore, ModePreference, cancellable,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_mutual_exclusion_all_modes() {
    for (preference, mode) in MODES {
        let (_store, keylatch) = keylatch_in(preference).await;
        let ttl = Duration::from_secs(10);

        let (first, second) = tokio::join!(
            keylatch.acquire_auto_lock("L", ttl),
            keylatch.acquire_auto_lock("L", ttl)
        );

        let results = [first, second];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "{}", mode);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert_eq!(loser, &LockError::held_by_another("L"));
    }
}

#[tokio::test]
async fn test_mutual_exclusion_across_tasks() {
    let (_store, keylatch) = keylatch_in(ModePreference::Auto).await;

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let keylatch = keylatch.clone();
            tokio::spawn(async move {
                keylatch
                    .acquire_auto_lock("contended", Duration::from_secs(10))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_held_by_another()),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_lifecycle_all_modes() {
    for (preference, mode) in MODES {
        let (store, keylatch) = keylatch_in(preference).await;

        let guard = keylatch
            .acquire_auto_lock("L", Duration::from_secs(5))
            .await
            .unwrap();
        guard.verify().await.unwrap();

        guard.renew(Duration::from_secs(60)).await.unwrap();
        let ttl = store.time_to_live("L").await.unwrap().remaining().unwrap();
        assert!(ttl > Duration::from_secs(5), "{}", mode);

        guard.release().await.unwrap();
        guard.release().await.unwrap();
        assert!(!store.exists("L").await.unwrap());

        let again = keylatch
            .acquire_auto_lock("L", Duration::from_secs(5))
            .await
            .unwrap();
        assert_ne!(again.token(), guard.token());
        again.release().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_ownership_loss_all_modes() {
    for (preference, mode) in MODES {
        let (_store, keylatch) = keylatch_in(preference).await;

        let original = keylatch
            .acquire_auto_lock("L", Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(1100)).await;

        let usurper = keylatch
            .acquire_auto_lock("L", Duration::from_secs(30))
            .await
            .unwrap();

        let err = original.renew(Duration::from_secs(30)).await.unwrap_err();
        assert!(err.is_held_by_another(), "{}", mode);
        assert!(original.verify().await.unwrap_err().is_held_by_another());
        let err = original.release().await.unwrap_err();
        assert!(err.is_held_by_another(), "{}", mode);

        // the new holder is untouched
        usurper.verify().await.unwrap();
        usurper.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_token_level_protocol() {
    let (store, keylatch) = keylatch_in(ModePreference::Auto).await;

    let token = keylatch.lock("jobs", Duration::from_secs(10)).await.unwrap();
    assert_eq!(
        keylatch.lock("jobs", Duration::from_secs(10)).await,
        Err(LockError::held_by_another("jobs"))
    );

    // a second instance over the same store resumes with the saved token
    let resumed = Keylatch::new(store.clone());
    resumed.verify_lock("jobs", &token).await.unwrap();
    resumed
        .renew_lock("jobs", &token, Duration::from_secs(20))
        .await
        .unwrap();
    resumed.unlock("jobs", &token).await.unwrap();
    assert!(!store.exists("jobs").await.unwrap());

    assert!(
        keylatch
            .renew_lock("jobs", &token, Duration::from_secs(20))
            .await
            .unwrap_err()
            .is_held_by_another()
    );
}

#[tokio::test]
async fn test_store_failure_surfaces() {
    let (store, keylatch) = keylatch_in(ModePreference::Auto).await;
    store.set_available(false);

    let err = keylatch
        .acquire_auto_lock("L", Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_cancellation_token() {
    let (_store, keylatch) = keylatch_in(ModePreference::Auto).await;
    let token = CancellationToken::new();
    token.cancel();

    let result = cancellable(
        &token,
        keylatch.acquire_auto_lock("L", Duration::from_secs(10)),
    )
    .await;
    assert_eq!(result.unwrap_err(), LockError::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_outlives_lease() {
    let store = Arc::new(MemoryStore::new());
    let keylatch = Keylatch::new(store.clone());

    let guard = keylatch
        .acquire_auto_lock("L", Duration::from_secs(2))
        .await
        .unwrap();
    let keep_alive = keylatch.keep_alive(&guard);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!keep_alive.lost());
    assert!(
        keylatch
            .acquire_auto_lock("L", Duration::from_secs(2))
            .await
            .unwrap_err()
            .is_held_by_another()
    );

    guard.release().await.unwrap();
    keep_alive.stop().await;
    assert!(!store.exists("L").await.unwrap());
}

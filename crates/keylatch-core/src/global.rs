//! Process-wide instance
//!
//! `init` installs one `Keylatch` for the process and negotiates its
//! execution mode. The free functions below forward to it and fail with
//! `NotInitialized` when called before `init`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use keylatch_store::KvStore;
use tracing::warn;

use crate::client::Keylatch;
use crate::config::KeylatchConfig;
use crate::error::{LockError, Result};
use crate::lock::LockGuard;
use crate::negotiate::ExecutionMode;

static GLOBAL: OnceLock<Keylatch> = OnceLock::new();

/// Install the process instance over `store` and negotiate.
///
/// Only the first call installs; later calls return the mode of the
/// instance already installed.
pub async fn init(store: Arc<dyn KvStore>, config: KeylatchConfig) -> ExecutionMode {
    let candidate = Keylatch::builder().store(store).config(config).build();
    if GLOBAL.set(candidate).is_err() {
        warn!("Keylatch already initialized; keeping the existing instance");
    }
    match GLOBAL.get() {
        Some(keylatch) => keylatch.negotiate().await,
        None => ExecutionMode::Uninitialized,
    }
}

/// Install the process instance from `config`, connecting with a `RedisStore`.
pub async fn init_from_config(config: KeylatchConfig) -> ExecutionMode {
    let store = Arc::new(keylatch_store::RedisStore::new(config.store.clone()));
    init(store, config).await
}

/// The process instance.
pub fn instance() -> Result<&'static Keylatch> {
    GLOBAL.get().ok_or(LockError::NotInitialized)
}

pub fn is_initialized() -> bool {
    GLOBAL.get().is_some()
}

pub async fn compare_and_swap(key: &str, expected: &str, new_value: &str) -> Result<bool> {
    instance()?.compare_and_swap(key, expected, new_value).await
}

pub async fn compare_and_delete(key: &str, expected: &str) -> Result<bool> {
    instance()?.compare_and_delete(key, expected).await
}

pub async fn compare_and_expire(key: &str, expected: &str, ttl: Duration) -> Result<bool> {
    instance()?.compare_and_expire(key, expected, ttl).await
}

pub async fn acquire_auto_lock(key: &str, ttl: Duration) -> Result<LockGuard> {
    instance()?.acquire_auto_lock(key, ttl).await
}

pub async fn lock(key: &str, ttl: Duration) -> Result<String> {
    instance()?.lock(key, ttl).await
}

pub async fn unlock(key: &str, token: &str) -> Result<()> {
    instance()?.unlock(key, token).await
}

pub async fn renew_lock(key: &str, token: &str, ttl: Duration) -> Result<()> {
    instance()?.renew_lock(key, token, ttl).await
}

pub async fn verify_lock(key: &str, token: &str) -> Result<()> {
    instance()?.verify_lock(key, token).await
}

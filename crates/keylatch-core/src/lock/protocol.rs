//! Token-level lock protocol
//!
//! The lock record is a key whose value is the holder's ownership token and
//! whose expiry is the lease. Only a caller presenting the stored token may
//! delete or renew it. These functions carry the token explicitly so it can
//! be persisted and handed across process boundaries.

use std::time::Duration;

use tracing::{debug, error};

use super::token;
use crate::atomic;
use crate::error::{LockError, Result};
use crate::executor::Executor;
use crate::metrics;

/// Shortest lease the store can express with millisecond expiry
pub const MIN_LEASE: Duration = Duration::from_millis(1);

fn record<T>(operation: &'static str, key: &str, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) if e.is_held_by_another() => "held",
        Err(_) => "error",
    };
    metrics::record_lock_operation(operation, outcome);
    if let Err(e) = result {
        error!(key = %key, operation, error = %e, "Lock operation failed");
    }
}

/// Acquire `key` for `ttl`, returning the new ownership token.
pub async fn lock(executor: &Executor, key: &str, ttl: Duration) -> Result<String> {
    let result = try_lock(executor, key, ttl).await;
    record("acquire", key, &result);
    result
}

async fn try_lock(executor: &Executor, key: &str, ttl: Duration) -> Result<String> {
    if ttl < MIN_LEASE {
        return Err(LockError::StoreCommand(format!(
            "invalid lease {:?} for '{}': must be at least 1ms",
            ttl, key
        )));
    }
    let token = token::generate();
    let acquired = executor
        .bounded(executor.store().set_if_absent(key, &token, ttl))
        .await?;
    if !acquired {
        return Err(LockError::held_by_another(key));
    }
    debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
    Ok(token)
}

/// Release `key` if it is still held with `token`.
///
/// An absent key counts as released.
pub async fn unlock(executor: &Executor, key: &str, token: &str) -> Result<()> {
    let result = match atomic::compare_and_delete(executor, key, token).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(LockError::held_by_another(key)),
        Err(e) => Err(e),
    };
    record("release", key, &result);
    result
}

/// Extend the lease on `key` to `ttl` if it is still held with `token`.
pub async fn renew_lock(executor: &Executor, key: &str, token: &str, ttl: Duration) -> Result<()> {
    let result = match atomic::compare_and_expire(executor, key, token, ttl).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(LockError::held_by_another(key)),
        Err(e) => Err(e),
    };
    record("renew", key, &result);
    result
}

/// Check that `key` currently holds `token`. Absence is a mismatch.
pub async fn verify_lock(executor: &Executor, key: &str, token: &str) -> Result<()> {
    let result = match executor.bounded(executor.store().get(key)).await {
        Ok(Some(current)) if current == token => Ok(()),
        Ok(_) => Err(LockError::held_by_another(key)),
        Err(e) => Err(e),
    };
    record("verify", key, &result);
    result
}

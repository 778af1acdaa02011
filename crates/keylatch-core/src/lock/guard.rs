//! Lock handle returned by auto-lock acquisition

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::keep_alive::{self, KeepAlive};
use super::protocol;
use crate::error::Result;
use crate::executor::Executor;

/// A held lock.
///
/// `release` runs the underlying compare-and-delete at most once per guard,
/// however many times or from however many tasks it is called. The guard is
/// claimed before the store call starts, so a release whose future is
/// dropped mid-flight still counts as spent.
///
/// Dropping the guard does not release the lock; the lease expires on its own.
pub struct LockGuard {
    executor: Arc<Executor>,
    key: String,
    token: String,
    ttl: Duration,
    released: AtomicBool,
    renewals: CancellationToken,
}

impl LockGuard {
    pub(crate) fn new(executor: Arc<Executor>, key: String, token: String, ttl: Duration) -> Self {
        Self {
            executor,
            key,
            token,
            ttl,
            released: AtomicBool::new(false),
            renewals: CancellationToken::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The ownership token stored as the lock's value.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Lease requested at acquisition.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release the lock. Calls after the first are no-op successes.
    pub async fn release(&self) -> Result<()> {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(key = %self.key, "Lock already released");
            return Ok(());
        }
        self.renewals.cancel();
        protocol::unlock(&self.executor, &self.key, &self.token).await
    }

    /// Extend the lease to `ttl`.
    pub async fn renew(&self, ttl: Duration) -> Result<()> {
        protocol::renew_lock(&self.executor, &self.key, &self.token, ttl).await
    }

    /// Check that the store still holds this guard's token.
    pub async fn verify(&self) -> Result<()> {
        protocol::verify_lock(&self.executor, &self.key, &self.token).await
    }

    /// Spawn a background task renewing the lease every `ttl / divisor`.
    ///
    /// The task stops on the first failed renewal, on `KeepAlive::stop`, when
    /// the `KeepAlive` is dropped, or when this guard is released.
    pub fn keep_alive(&self, divisor: u32) -> KeepAlive {
        keep_alive::spawn(
            self.executor.clone(),
            self.key.clone(),
            self.token.clone(),
            self.ttl,
            divisor,
            self.renewals.child_token(),
        )
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("released", &self.is_released())
            .finish()
    }
}

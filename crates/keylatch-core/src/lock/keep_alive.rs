//! Background lease renewal for a held lock

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::protocol;
use crate::executor::Executor;

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Smallest divisor that renews before the lease runs out
pub const MIN_DIVISOR: u32 = 2;

/// Handle to a running renewal task. Dropping it stops the task.
pub struct KeepAlive {
    cancel: CancellationToken,
    lost: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl KeepAlive {
    /// True once a renewal failed; the critical section is no longer protected.
    pub fn lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// True while the renewal task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop renewing and wait for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Renewal period for a lease: `ttl / divisor`, never below 10ms.
///
/// Divisors below `MIN_DIVISOR` are raised to it.
pub fn renewal_period(ttl: Duration, divisor: u32) -> Duration {
    (ttl / divisor.max(MIN_DIVISOR)).max(MIN_PERIOD)
}

pub(crate) fn spawn(
    executor: Arc<Executor>,
    key: String,
    token: String,
    ttl: Duration,
    divisor: u32,
    cancel: CancellationToken,
) -> KeepAlive {
    let lost = Arc::new(AtomicBool::new(false));
    let period = renewal_period(ttl, divisor);

    let handle = tokio::spawn({
        let cancel = cancel.clone();
        let lost = lost.clone();
        async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(key = %key, period_ms = period.as_millis() as u64, "Lock keep-alive started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(key = %key, "Lock keep-alive stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = protocol::renew_lock(&executor, &key, &token, ttl).await {
                            lost.store(true, Ordering::Release);
                            if e.is_held_by_another() {
                                error!(key = %key, "Lock ownership lost; keep-alive stopped");
                            } else {
                                error!(key = %key, error = %e, "Lock renewal failed; keep-alive stopped");
                            }
                            break;
                        }
                    }
                }
            }
            info!(key = %key, lost = lost.load(Ordering::Acquire), "Lock keep-alive exited");
        }
    });

    KeepAlive {
        cancel,
        lost,
        handle: Some(handle),
    }
}

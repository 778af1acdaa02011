//! Caller-driven cancellation and deadlines
//!
//! Every operation is an `async fn`; dropping its future aborts the store
//! round trip. These helpers turn a cancellation token or a deadline into
//! an error instead.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{LockError, Result};

/// Run `fut` until it completes or `token` is cancelled.
///
/// A cancelled mutation may still have reached the store; its outcome is unknown.
pub async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LockError::Cancelled),
        result = fut => result,
    }
}

/// Run `fut` with a deadline.
pub async fn with_timeout<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(LockError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_before_completion() {
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> = cancellable(&token, std::future::pending()).await;
        assert_eq!(result, Err(LockError::Cancelled));
    }

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let result = cancellable(&token, async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let result: Result<()> =
            with_timeout(Duration::from_millis(50), std::future::pending()).await;
        assert_eq!(result, Err(LockError::Timeout));
    }
}

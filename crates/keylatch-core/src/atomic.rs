//! Compare primitives
//!
//! Each primitive reads the current value, compares it to `expected` and
//! conditionally mutates, all in one server-side script:
//! - `compare_and_swap`: set to `new_value` on match
//! - `compare_and_delete`: delete on match, succeeds when already absent
//! - `compare_and_expire`: replace the expiry on match
//!
//! An absent key never matches `expected` for swap and expire.

use std::time::Duration;

use crate::error::Result;
use crate::executor::Executor;
use crate::script::OpId;

/// Lease in whole seconds, rounded up and never below one second.
pub fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

pub async fn compare_and_swap(
    executor: &Executor,
    key: &str,
    expected: &str,
    new_value: &str,
) -> Result<bool> {
    executor
        .execute_bool(
            OpId::CompareAndSwap,
            &[key.to_string()],
            &[expected.to_string(), new_value.to_string()],
        )
        .await
}

pub async fn compare_and_delete(executor: &Executor, key: &str, expected: &str) -> Result<bool> {
    executor
        .execute_bool(
            OpId::CompareAndDelete,
            &[key.to_string()],
            &[expected.to_string()],
        )
        .await
}

pub async fn compare_and_expire(
    executor: &Executor,
    key: &str,
    expected: &str,
    ttl: Duration,
) -> Result<bool> {
    executor
        .execute_bool(
            OpId::CompareAndExpire,
            &[key.to_string()],
            &[expected.to_string(), ttl_seconds(ttl).to_string()],
        )
        .await
}

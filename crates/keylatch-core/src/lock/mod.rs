//! Distributed lock
//!
//! This module provides:
//! - Token-level lock, unlock, renew and verify
//! - `LockGuard`: a held lock with once-only release
//! - `KeepAlive`: background lease renewal for a guard

mod guard;
mod keep_alive;
mod protocol;
pub mod token;

pub use guard::LockGuard;
pub use keep_alive::{KeepAlive, MIN_DIVISOR, renewal_period};
pub use protocol::{MIN_LEASE, lock, renew_lock, unlock, verify_lock};

//! Keylatch Core - compare primitives and distributed locks
//!
//! This crate provides:
//! - Atomic compare-and-swap, compare-and-delete and compare-and-expire,
//!   run as server-side scripts
//! - One-time negotiation of how scripts are invoked (installed functions,
//!   cached scripts or inline evaluation)
//! - A lease-based distributed lock with ownership tokens
//! - `MemoryStore`, an in-process store that runs the scripts in embedded Lua
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use keylatch_core::{Keylatch, MemoryStore};
//!
//! let keylatch = Keylatch::new(Arc::new(MemoryStore::new()));
//! let guard = keylatch.acquire_auto_lock("jobs:nightly", Duration::from_secs(30)).await?;
//! // critical section
//! guard.release().await?;
//! ```

pub mod atomic;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod global;
pub mod lock;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod negotiate;
pub mod script;

pub use cancel::{cancellable, with_timeout};
pub use client::{Keylatch, KeylatchBuilder};
pub use config::KeylatchConfig;
pub use error::{LockError, Result};
pub use executor::Executor;
pub use lock::{KeepAlive, LockGuard};
pub use memory::{MemoryStore, MemoryStoreBuilder, MemoryStoreStats};
pub use negotiate::{ExecutionMode, ModePreference, Strategy};
pub use script::{OpId, ScriptMeta, ScriptRegistry};

pub use keylatch_store::{KeyTtl, KvStore, RedisStore, StoreConfig, StoreError, StoreValue};

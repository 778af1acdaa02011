//! Key-value store boundary
//!
//! `KvStore` is the narrow interface the lock core calls through. It covers
//! plain key operations plus the three server-side script tiers:
//! - installable function libraries (`FUNCTION LOAD` / `FCALL`)
//! - the script cache (`SCRIPT LOAD` / `EVALSHA`)
//! - inline evaluation (`EVAL`)

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::value::{KeyTtl, StoreValue};

/// Remote key-value store with atomic script execution.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Check that the store is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Read a key, `None` when absent.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a key, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Write a key only if it is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete a key. Returns whether a key was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn time_to_live(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Lightweight probe for function library support.
    async fn function_stats(&self) -> StoreResult<()>;

    /// Whether a function library with this name is installed.
    async fn function_exists(&self, library: &str) -> StoreResult<bool>;

    /// Install a function library, replacing an existing one of the same name.
    /// Returns the library name reported by the store.
    async fn function_load_replace(&self, code: &str) -> StoreResult<String>;

    /// Call an installed function.
    async fn fcall(
        &self,
        function: &str,
        keys: &[String],
        args: &[String],
    ) -> StoreResult<StoreValue>;

    /// Load a script into the script cache, returning its SHA1 handle.
    async fn script_load(&self, source: &str) -> StoreResult<String>;

    /// Run a cached script by handle.
    async fn eval_sha(&self, sha: &str, keys: &[String], args: &[String])
    -> StoreResult<StoreValue>;

    /// Run a script from its source text.
    async fn eval(&self, source: &str, keys: &[String], args: &[String])
    -> StoreResult<StoreValue>;
}
